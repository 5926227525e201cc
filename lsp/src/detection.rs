//! Pick a language server for a workspace from its marker files.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Command line used to launch a language server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    pub command: String,
    pub args: Vec<String>,
}

impl ServerCommand {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[derive(Debug, Error)]
#[error(
    "could not detect LSP server for workspace {}: no recognized project files found. \
     Looked for: {}. Use --lsp to specify the server manually",
    workspace.display(),
    markers.join(", ")
)]
pub struct DetectError {
    workspace: PathBuf,
    markers: Vec<&'static str>,
}

struct DetectionRule {
    marker: &'static str,
    command: &'static str,
    args: &'static [&'static str],
}

/// Ordered: the first marker present wins.
const DETECTION_RULES: &[DetectionRule] = &[
    DetectionRule { marker: "go.mod", command: "gopls", args: &[] },
    DetectionRule { marker: "go.sum", command: "gopls", args: &[] },
    DetectionRule { marker: "Cargo.toml", command: "rust-analyzer", args: &[] },
    DetectionRule { marker: "tsconfig.json", command: "typescript-language-server", args: &["--stdio"] },
    DetectionRule { marker: "package.json", command: "typescript-language-server", args: &["--stdio"] },
    DetectionRule { marker: "pyproject.toml", command: "pyright-langserver", args: &["--stdio"] },
    DetectionRule { marker: "setup.py", command: "pyright-langserver", args: &["--stdio"] },
    DetectionRule { marker: "requirements.txt", command: "pyright-langserver", args: &["--stdio"] },
    DetectionRule { marker: "compile_commands.json", command: "clangd", args: &[] },
    DetectionRule { marker: "CMakeLists.txt", command: "clangd", args: &[] },
];

pub fn detect_server(workspace: &Path) -> Result<ServerCommand, DetectError> {
    DETECTION_RULES
        .iter()
        .find(|rule| workspace.join(rule.marker).exists())
        .map(|rule| {
            tracing::debug!(marker = rule.marker, command = rule.command, "Detected language server");
            ServerCommand::new(
                rule.command,
                rule.args.iter().map(ToString::to_string).collect(),
            )
        })
        .ok_or_else(|| DetectError {
            workspace: workspace.to_path_buf(),
            markers: DETECTION_RULES.iter().map(|rule| rule.marker).collect(),
        })
}

/// LSP `languageId` for a file, by extension. Unknown extensions get `plaintext`.
#[must_use]
pub fn language_id_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("go") => "go",
        Some("mod") if path.file_name().is_some_and(|n| n == "go.mod") => "go.mod",
        Some("rs") => "rust",
        Some("ts" | "mts" | "cts") => "typescript",
        Some("tsx") => "typescriptreact",
        Some("js" | "mjs" | "cjs") => "javascript",
        Some("jsx") => "javascriptreact",
        Some("py" | "pyi") => "python",
        Some("c" | "h") => "c",
        Some("cc" | "cpp" | "cxx" | "hpp" | "hh" | "hxx") => "cpp",
        Some("json") => "json",
        Some("toml") => "toml",
        _ => "plaintext",
    }
}
