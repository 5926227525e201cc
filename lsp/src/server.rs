//! Server handle: owns a child process and manages the LSP lifecycle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use lspbridge_types::{DocumentUri, normalize_path};
use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use crate::codec::{FrameReader, FrameWriter};
use crate::detection::ServerCommand;
use crate::diagnostics::DiagnosticHub;
use crate::env::secret_env_denylist;
use crate::protocol::{
    self, DID_CHANGE_WATCHED_FILES, DidChangeWatchedFilesRegistrationOptions, FileChangeType,
    Notification, PublishDiagnosticsParams, RegistrationParams, Request, UnregistrationParams,
};
use crate::watch::WatchRegistry;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

const WRITER_CHANNEL_CAPACITY: usize = 64;

type PendingMap = Arc<tokio::sync::Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>;

/// Why a server stopped on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStopReason {
    /// The server closed stdout.
    Exited,
    /// Reading from the server failed.
    Failed(String),
}

enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

enum IncomingFrame {
    Response {
        id: u64,
        body: serde_json::Value,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
        params: Option<serde_json::Value>,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

fn parse_incoming(frame: &serde_json::Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let has_result_or_error = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, has_result_or_error) {
        (Some(id_val), None, true) => Some(IncomingFrame::Response {
            id: id_val.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id_val), Some(method), _) => Some(IncomingFrame::ServerRequest {
            id: id_val.clone(),
            method,
            params: frame.get("params").cloned(),
        }),
        (None, Some(method), _) => Some(IncomingFrame::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

/// Everything the reader task needs to route one inbound frame.
#[derive(Clone)]
struct Dispatcher {
    server_name: String,
    workspace_root: PathBuf,
    pending: PendingMap,
    writer_tx: mpsc::Sender<WriterCommand>,
    hub: Arc<DiagnosticHub>,
    watches: Arc<Mutex<WatchRegistry>>,
}

impl Dispatcher {
    async fn dispatch_frame(&self, frame: &serde_json::Value) {
        let Some(incoming) = parse_incoming(frame) else {
            tracing::trace!(server = %self.server_name, "Ignoring malformed JSON-RPC frame");
            return;
        };

        match incoming {
            IncomingFrame::Response { id, body } => {
                let sender = self.pending.lock().await.remove(&id);
                if let Some(tx) = sender {
                    let _ = tx.send(body);
                }
            }
            IncomingFrame::ServerRequest { id, method, params } => {
                let response = self.handle_server_request(&id, &method, params);
                let _ = self.writer_tx.send(WriterCommand::Send(response)).await;
            }
            IncomingFrame::Notification { method, params } => {
                self.handle_notification(&method, params);
            }
        }
    }

    /// Servers block on some of their own requests, so every one gets a reply.
    fn handle_server_request(
        &self,
        id: &serde_json::Value,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> serde_json::Value {
        match method {
            "client/registerCapability" => {
                match params.map(serde_json::from_value::<RegistrationParams>) {
                    Some(Ok(params)) => self.register_watchers(params),
                    Some(Err(e)) => {
                        tracing::debug!(server = %self.server_name, "Bad registerCapability params: {e}");
                    }
                    None => {}
                }
                protocol::result_response(id, serde_json::Value::Null)
            }
            "client/unregisterCapability" => {
                if let Some(Ok(params)) =
                    params.map(serde_json::from_value::<UnregistrationParams>)
                {
                    let mut watches = self.watches.lock();
                    for unregistration in params.unregisterations {
                        watches.unregister(&unregistration.id);
                    }
                }
                protocol::result_response(id, serde_json::Value::Null)
            }
            "workspace/configuration" => {
                // No client-side settings: one null per requested item.
                let count = params
                    .as_ref()
                    .and_then(|p| p.get("items"))
                    .and_then(|items| items.as_array())
                    .map_or(0, Vec::len);
                protocol::result_response(id, serde_json::Value::Array(vec![serde_json::Value::Null; count]))
            }
            "window/workDoneProgress/create" => {
                protocol::result_response(id, serde_json::Value::Null)
            }
            _ => {
                tracing::debug!(
                    server = %self.server_name,
                    "Server sent request {method}; replying method not found"
                );
                protocol::error_response(
                    id,
                    protocol::METHOD_NOT_FOUND,
                    &format!("Method not found: {method}"),
                )
            }
        }
    }

    fn register_watchers(&self, params: RegistrationParams) {
        let mut watches = self.watches.lock();
        for registration in params.registrations {
            if registration.method != DID_CHANGE_WATCHED_FILES {
                tracing::trace!(method = %registration.method, "Ignoring capability registration");
                continue;
            }
            let Some(options) = registration.register_options else {
                continue;
            };
            match serde_json::from_value::<DidChangeWatchedFilesRegistrationOptions>(options) {
                Ok(options) => watches.register(registration.id, options),
                Err(e) => tracing::debug!("Bad didChangeWatchedFiles options: {e}"),
            }
        }
    }

    fn handle_notification(&self, method: &str, params: Option<serde_json::Value>) {
        match method {
            "textDocument/publishDiagnostics" => {
                let Some(params) = params else { return };
                match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                    Ok(params) => self.publish_diagnostics(params),
                    Err(e) => {
                        tracing::debug!(
                            server = %self.server_name,
                            "Failed to parse publishDiagnostics: {e}"
                        );
                    }
                }
            }
            _ => {
                tracing::trace!(server = %self.server_name, "Ignoring notification: {method}");
            }
        }
    }

    fn publish_diagnostics(&self, params: PublishDiagnosticsParams) {
        let uri = match DocumentUri::parse(&params.uri) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::debug!(server = %self.server_name, "Dropping diagnostics: {e}");
                return;
            }
        };
        let Some(path) = uri.to_file_path() else {
            tracing::debug!(server = %self.server_name, %uri, "Dropping diagnostics for non-file URI");
            return;
        };
        if !path.starts_with(&self.workspace_root) {
            tracing::warn!(
                server = %self.server_name,
                "Server reported diagnostics for path outside workspace: {}",
                path.display()
            );
            return;
        }

        let items = params
            .diagnostics
            .iter()
            .map(protocol::LspDiagnostic::to_diagnostic)
            .collect();
        self.hub.publish(uri, items);
    }
}

pub(crate) struct RunningServer {
    name: String,
    child: Child,
    writer_tx: mpsc::Sender<WriterCommand>,
    next_id: u64,
    pending: PendingMap,
    /// Open documents and their last sent version.
    open_docs: HashMap<DocumentUri, i32>,
    watches: Arc<Mutex<WatchRegistry>>,
    stopped: Arc<Mutex<Option<ServerStopReason>>>,
    #[allow(dead_code)]
    reader_handle: tokio::task::JoinHandle<()>,
    #[allow(dead_code)]
    writer_handle: tokio::task::JoinHandle<()>,
}

impl RunningServer {
    pub async fn start(
        command: &ServerCommand,
        workspace_root: &Path,
        hub: Arc<DiagnosticHub>,
    ) -> Result<Self> {
        let resolved_cmd = which::which(&command.command)
            .with_context(|| format!("{} not found in PATH", command.command))?;
        let mut cmd = Command::new(&resolved_cmd);
        cmd.args(&command.args)
            .current_dir(workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let denylist = secret_env_denylist().context("compiling env denylist")?;
        for (key, _) in std::env::vars_os() {
            if denylist.is_match(Path::new(&key)) {
                cmd.env_remove(&key);
            }
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning {}", command.command))?;

        let stdout = child.stdout.take().context("no stdout from child")?;
        let stdin = child.stdin.take().context("no stdin from child")?;

        let pending: PendingMap = Arc::new(tokio::sync::Mutex::new(HashMap::new()));

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(stdin);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("LSP write error: {e}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let workspace_root = normalize_path(workspace_root);
        let watches = Arc::new(Mutex::new(WatchRegistry::new(&workspace_root)));
        let stopped = Arc::new(Mutex::new(None));
        let name = command.command.clone();

        let dispatcher = Dispatcher {
            server_name: name.clone(),
            workspace_root: workspace_root.clone(),
            pending: pending.clone(),
            writer_tx: writer_tx.clone(),
            hub,
            watches: watches.clone(),
        };
        let reader_stopped = stopped.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(stdout);
            let reason = loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => dispatcher.dispatch_frame(&frame).await,
                    Ok(None) => {
                        tracing::info!(server = %dispatcher.server_name, "LSP server closed stdout");
                        break ServerStopReason::Exited;
                    }
                    Err(e) => {
                        tracing::warn!(server = %dispatcher.server_name, "LSP reader error: {e}");
                        break ServerStopReason::Failed(e.to_string());
                    }
                }
            };
            *reader_stopped.lock() = Some(reason);
            // Fail in-flight requests now instead of at their timeout.
            dispatcher.pending.lock().await.clear();
        });

        let mut handle = Self {
            name,
            child,
            writer_tx,
            next_id: 1,
            pending,
            open_docs: HashMap::new(),
            watches,
            stopped,
            reader_handle,
            writer_handle,
        };

        handle.initialize(&workspace_root).await?;

        Ok(handle)
    }

    async fn initialize(&mut self, workspace_root: &Path) -> Result<()> {
        let root_uri =
            DocumentUri::from_path(workspace_root).context("converting workspace root to URI")?;
        let workspace_name = workspace_root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("workspace");

        let params = protocol::initialize_params(root_uri.as_str(), workspace_name);
        let response = self.send_request("initialize", Some(params)).await?;

        if let Some(error) = response.get("error") {
            bail!(
                "LSP initialize failed: {}",
                error["message"].as_str().unwrap_or("unknown error")
            );
        }

        self.send_notification("initialized", Some(serde_json::json!({})))
            .await?;

        tracing::info!(server = %self.name, "LSP server initialized");
        Ok(())
    }

    async fn send_request(
        &mut self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.ensure_reader_alive(method)?;
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        // The reader records its stop reason before clearing `pending`, so an
        // insert that lands after the clear is caught here.
        if let Err(e) = self.ensure_reader_alive(method) {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let request = Request::new(id, method, params);
        let frame = serde_json::to_value(&request).context("serializing request")?;
        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            bail!("writer channel closed");
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                bail!("{method}: server stopped before responding");
            }
            Err(_) => {
                // Remove the entry so repeated timeouts don't grow the map.
                self.pending.lock().await.remove(&id);
                bail!("{method}: request timed out");
            }
        }
    }

    fn ensure_reader_alive(&self, method: &str) -> Result<()> {
        match self.stop_reason() {
            None => Ok(()),
            Some(reason) => bail!("{method}: server '{}' already stopped ({reason:?})", self.name),
        }
    }

    async fn send_notification(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<()> {
        let notification = Notification::new(method, params);
        let frame = serde_json::to_value(&notification).context("serializing notification")?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| anyhow::anyhow!("writer channel closed"))?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self, uri: &DocumentUri) -> bool {
        self.open_docs.contains_key(uri)
    }

    pub fn stop_reason(&self) -> Option<ServerStopReason> {
        self.stopped.lock().clone()
    }

    pub fn watches_file(&self, path: &Path) -> bool {
        self.watches.lock().matches(path)
    }

    pub async fn did_open(&mut self, uri: &DocumentUri, language_id: &str, text: &str) -> Result<()> {
        let version = 1;
        let params = protocol::did_open_params(uri.as_str(), language_id, version, text);
        self.send_notification("textDocument/didOpen", Some(params))
            .await?;
        self.open_docs.insert(uri.clone(), version);
        Ok(())
    }

    /// Full-text change with a monotonically increasing version.
    pub async fn did_change(&mut self, uri: &DocumentUri, text: &str) -> Result<()> {
        let Some(version) = self.open_docs.get_mut(uri) else {
            bail!("didChange for unopened document {uri}");
        };
        *version += 1;
        let params = protocol::did_change_params(uri.as_str(), *version, text);
        self.send_notification("textDocument/didChange", Some(params))
            .await
    }

    pub async fn did_close(&mut self, uri: &DocumentUri) -> Result<()> {
        if self.open_docs.remove(uri).is_none() {
            return Ok(());
        }
        let params = protocol::did_close_params(uri.as_str());
        self.send_notification("textDocument/didClose", Some(params))
            .await
    }

    pub async fn did_change_watched_files(
        &self,
        changes: &[(&DocumentUri, FileChangeType)],
    ) -> Result<()> {
        let changes: Vec<(&str, FileChangeType)> = changes
            .iter()
            .map(|(uri, kind)| (uri.as_str(), *kind))
            .collect();
        let params = protocol::did_change_watched_files_params(&changes);
        self.send_notification("workspace/didChangeWatchedFiles", Some(params))
            .await
    }

    /// Gracefully shut down the server. A server that already stopped is
    /// only reaped.
    pub async fn shutdown(mut self) {
        if let Some(reason) = self.stop_reason() {
            tracing::debug!(server = %self.name, ?reason, "Server already stopped; skipping shutdown request");
        } else if let Ok(response) = self.send_request("shutdown", None).await
            && response.get("error").is_none()
        {
            let _ = self.send_notification("exit", None).await;
        }

        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.child.wait())
            .await
            .is_err()
        {
            tracing::debug!(server = %self.name, "LSP server didn't exit in time, killing");
            let _ = self.child.kill().await;
        }
    }
}
