//! Workspace edits and the files they touch.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use lspbridge_types::DocumentUri;
use serde::Deserialize;

/// LSP `WorkspaceEdit`. Only the parts needed to locate affected files are typed.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceEdit {
    #[serde(default)]
    pub changes: HashMap<String, Vec<TextEdit>>,
    #[serde(default)]
    pub document_changes: Vec<DocumentChange>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEdit {
    pub range: serde_json::Value,
    pub new_text: String,
}

/// One entry of `documentChanges`: a text edit, or a create/rename/delete
/// resource operation.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DocumentChange {
    TextDocumentEdit(TextDocumentEdit),
    ResourceOperation(serde_json::Value),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentEdit {
    pub text_document: VersionedTextDocumentIdentifier,
    pub edits: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct VersionedTextDocumentIdentifier {
    pub uri: String,
    pub version: Option<i32>,
}

/// Unique file paths touched by `edit`, from both `changes` and
/// `documentChanges`. Resource operations and non-file URIs are skipped.
/// Sorted so callers get a stable order.
#[must_use]
pub fn affected_files(edit: &WorkspaceEdit) -> Vec<PathBuf> {
    let text_edit_uris = edit.document_changes.iter().filter_map(|change| match change {
        DocumentChange::TextDocumentEdit(edit) => Some(edit.text_document.uri.as_str()),
        DocumentChange::ResourceOperation(_) => None,
    });

    let mut seen = BTreeSet::new();
    for uri in edit.changes.keys().map(String::as_str).chain(text_edit_uris) {
        match DocumentUri::parse(uri).ok().and_then(|u| u.to_file_path()) {
            Some(path) => {
                seen.insert(path);
            }
            None => tracing::debug!(%uri, "Skipping non-file URI in workspace edit"),
        }
    }
    seen.into_iter().collect()
}
