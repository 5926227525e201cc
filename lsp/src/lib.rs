//! LSP bridge: drive a language server over stdio and wait for its
//! diagnostics to settle.

pub mod codec;

pub(crate) mod diagnostics;
pub(crate) mod protocol;
pub(crate) mod server;
pub(crate) mod settle;
pub(crate) mod waiters;
pub(crate) mod watch;

mod client;
mod detection;
mod edit;
mod env;

pub use client::LspClient;
pub use detection::{DetectError, ServerCommand, detect_server, language_id_for_path};
pub use diagnostics::DiagnosticHub;
pub use edit::{DocumentChange, TextDocumentEdit, TextEdit, WorkspaceEdit, affected_files};
pub use lspbridge_types::{
    Diagnostic, DiagnosticSeverity, DiagnosticsWait, DocumentUri, InvalidDocumentUri, WaitOutcome,
};
pub use protocol::FileChangeType;
pub use server::ServerStopReason;
pub use settle::{DIAGNOSTIC_SETTLE_TIME, PendingWait};
