//! `LspClient`: one language server session for one workspace.
//!
//! The client owns the server handle and the session's [`DiagnosticHub`].
//! Construction IS initialization: `start()` spawns the server and completes
//! the `initialize` handshake before returning.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use lspbridge_types::{Diagnostic, DiagnosticsWait, DocumentUri, normalize_path};
use tokio_util::sync::CancellationToken;

use crate::detection::{ServerCommand, language_id_for_path};
use crate::diagnostics::DiagnosticHub;
use crate::protocol::FileChangeType;
use crate::server::{RunningServer, ServerStopReason};

pub struct LspClient {
    server: RunningServer,
    hub: Arc<DiagnosticHub>,
    workspace_root: PathBuf,
}

impl LspClient {
    pub async fn start(command: &ServerCommand, workspace_root: &Path) -> Result<Self> {
        let workspace_root = if workspace_root.is_absolute() {
            normalize_path(workspace_root)
        } else {
            let cwd = std::env::current_dir().context("resolving current directory")?;
            normalize_path(&cwd.join(workspace_root))
        };
        // Servers report canonical paths; a symlinked root would otherwise
        // reject every publication as outside the workspace.
        let workspace_root = tokio::fs::canonicalize(&workspace_root)
            .await
            .unwrap_or(workspace_root);

        tracing::info!(
            workspace = %workspace_root.display(),
            "Starting LSP server '{}'...",
            command.command
        );
        let hub = Arc::new(DiagnosticHub::new());
        let server = RunningServer::start(command, &workspace_root, hub.clone())
            .await
            .with_context(|| format!("starting LSP server '{}'", command.command))?;
        tracing::info!("LSP server '{}' started successfully", server.name());

        Ok(Self {
            server,
            hub,
            workspace_root,
        })
    }

    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Shared handle for waiting on diagnostics without borrowing the client.
    #[must_use]
    pub fn hub(&self) -> Arc<DiagnosticHub> {
        self.hub.clone()
    }

    /// Document identity for `path`. Relative paths resolve against the
    /// workspace root.
    pub fn document_uri(&self, path: &Path) -> Result<DocumentUri> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        };
        Ok(DocumentUri::from_path(&absolute)?)
    }

    /// Send `didOpen` for `path`. Opening an already open file is a no-op.
    pub async fn open_file(&mut self, path: &Path) -> Result<()> {
        self.ensure_running()?;
        let uri = self.document_uri(path)?;
        if self.server.is_open(&uri) {
            tracing::debug!(%uri, "File already open");
            return Ok(());
        }

        let text = read_document(&uri).await?;
        self.server
            .did_open(&uri, language_id_for_path(path), &text)
            .await?;
        tracing::debug!(%uri, "Opened file");
        Ok(())
    }

    /// Tell the server `path` changed on disk. Files that were never opened
    /// are ignored.
    pub async fn notify_change(&mut self, path: &Path) -> Result<()> {
        self.ensure_running()?;
        let uri = self.document_uri(path)?;
        if !self.server.is_open(&uri) {
            return Ok(());
        }

        let text = read_document(&uri).await?;
        self.server.did_change(&uri, &text).await?;

        let absolute = uri.to_file_path().unwrap_or_else(|| path.to_path_buf());
        if self.server.watches_file(&absolute) {
            self.server
                .did_change_watched_files(&[(&uri, FileChangeType::Changed)])
                .await?;
        }
        Ok(())
    }

    pub async fn close_file(&mut self, path: &Path) -> Result<()> {
        let uri = self.document_uri(path)?;
        self.server.did_close(&uri).await
    }

    /// Wait for the server to publish and then settle diagnostics for `path`.
    /// See [`DiagnosticHub::wait_for_diagnostics`].
    pub async fn wait_for_diagnostics(
        &self,
        path: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<DiagnosticsWait> {
        let uri = self.document_uri(path)?;
        Ok(self.hub.wait_for_diagnostics(&uri, timeout, cancel).await)
    }

    /// Latest diagnostics the server published for `path`.
    pub fn diagnostics(&self, path: &Path) -> Result<Vec<Diagnostic>> {
        let uri = self.document_uri(path)?;
        Ok(self.hub.diagnostics(&uri))
    }

    fn ensure_running(&self) -> Result<()> {
        match self.server.stop_reason() {
            None => Ok(()),
            Some(ServerStopReason::Exited) => {
                bail!("LSP server '{}' exited", self.server.name())
            }
            Some(ServerStopReason::Failed(msg)) => {
                bail!("LSP server '{}' failed: {msg}", self.server.name())
            }
        }
    }

    /// Gracefully shut down the server.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down LSP server '{}'...", self.server.name());
        self.server.shutdown().await;
    }
}

async fn read_document(uri: &DocumentUri) -> Result<String> {
    let Some(path) = uri.to_file_path() else {
        bail!("not a file URI: {uri}");
    };
    tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}
