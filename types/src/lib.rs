//! Core domain types for lspbridge.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the bridge.

mod diagnostic;
mod document;

pub use diagnostic::{Diagnostic, DiagnosticSeverity, DiagnosticsWait, WaitOutcome};
pub use document::{DocumentUri, InvalidDocumentUri, normalize_path};
