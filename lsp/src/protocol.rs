//! Internal LSP message serde types for JSON-RPC communication.

use serde::{Deserialize, Serialize};

use lspbridge_types::{Diagnostic, DiagnosticSeverity};

/// JSON-RPC error code for an unhandled server-to-client request.
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Successful reply to a request the server sent us.
pub(crate) fn result_response(id: &serde_json::Value, result: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

pub(crate) fn error_response(id: &serde_json::Value, code: i64, message: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message,
        }
    })
}

pub(crate) fn initialize_params(root_uri: &str, workspace_name: &str) -> serde_json::Value {
    serde_json::json!({
        "processId": std::process::id(),
        "clientInfo": {
            "name": "lspbridge",
            "version": env!("CARGO_PKG_VERSION")
        },
        "rootUri": root_uri,
        "capabilities": {
            "workspace": {
                "configuration": true,
                "didChangeWatchedFiles": {
                    "dynamicRegistration": true,
                    "relativePatternSupport": true
                }
            },
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": false
                },
                "publishDiagnostics": {
                    "relatedInformation": false,
                    "versionSupport": false
                }
            }
        },
        "workspaceFolders": [{
            "uri": root_uri,
            "name": workspace_name
        }]
    })
}

pub(crate) fn did_open_params(
    uri: &str,
    language_id: &str,
    version: i32,
    text: &str,
) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(uri: &str, version: i32, text: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

pub(crate) fn did_close_params(uri: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri
        }
    })
}

/// `FileChangeType` from the LSP spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeType {
    Created = 1,
    Changed = 2,
    Deleted = 3,
}

pub(crate) fn did_change_watched_files_params(
    changes: &[(&str, FileChangeType)],
) -> serde_json::Value {
    let changes: Vec<serde_json::Value> = changes
        .iter()
        .map(|(uri, kind)| serde_json::json!({ "uri": uri, "type": *kind as u8 }))
        .collect();
    serde_json::json!({ "changes": changes })
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<LspDiagnostic>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspDiagnostic {
    pub range: LspRange,
    pub severity: Option<u64>,
    pub source: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspRange {
    pub start: LspPosition,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspPosition {
    pub line: u32,
    pub character: u32,
}

impl LspDiagnostic {
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::new(
            self.severity
                .and_then(DiagnosticSeverity::from_lsp)
                .unwrap_or(DiagnosticSeverity::Warning),
            self.message.clone(),
            self.range.start.line,
            self.range.start.character,
            self.source
                .clone()
                .unwrap_or_else(|| String::from("unknown")),
        )
    }
}

// ── Dynamic capability registration ────────────────────────────────────

pub(crate) const DID_CHANGE_WATCHED_FILES: &str = "workspace/didChangeWatchedFiles";

#[derive(Debug, Deserialize)]
pub(crate) struct RegistrationParams {
    pub registrations: Vec<Registration>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Registration {
    pub id: String,
    pub method: String,
    pub register_options: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UnregistrationParams {
    // Misspelled in the LSP specification itself.
    pub unregisterations: Vec<Unregistration>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Unregistration {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DidChangeWatchedFilesRegistrationOptions {
    pub watchers: Vec<FileSystemWatcher>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileSystemWatcher {
    pub glob_pattern: GlobPattern,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum GlobPattern {
    Pattern(String),
    Relative(RelativePattern),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RelativePattern {
    pub base_uri: BaseUri,
    pub pattern: String,
}

/// Either a bare URI or a `WorkspaceFolder`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum BaseUri {
    Uri(String),
    Folder { uri: String },
}

impl BaseUri {
    pub fn uri(&self) -> &str {
        match self {
            Self::Uri(uri) | Self::Folder { uri } => uri,
        }
    }
}
