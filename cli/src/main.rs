//! lspbridge CLI - run a language server against a workspace and report
//! diagnostics once the server has settled.
//!
//! ```text
//! main() -> resolve server command -> LspClient::start()
//!        -> register waits -> didOpen / didChange -> wait -> print
//! ```
//!
//! Stdout carries only the report; logs go to a file.

mod cli;
mod config;

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Mutex,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::future::join_all;
use lspbridge_lsp::{
    DiagnosticsWait, LspClient, ServerCommand, WorkspaceEdit, affected_files, detect_server,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::{Cli, Command, ServerArgs};
use crate::config::BridgeConfig;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No log file: stay silent rather than interleave logs with the report.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.lspbridge/logs/lspbridge.log
    if let Some(dir) = config::data_dir() {
        candidates.push(dir.join("logs").join("lspbridge.log"));
    }

    // Fallback: ./.lspbridge/logs/lspbridge.log
    candidates.push(PathBuf::from(".lspbridge").join("logs").join("lspbridge.log"));

    candidates
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    init_tracing();

    let cli = Cli::parse();
    let config = BridgeConfig::load(cli.config.as_deref()).inspect_err(|e| {
        tracing::error!(path = %e.path().display(), "Config error: {e}");
    })?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted; cancelling waits");
            ctrl_c.cancel();
        }
    });

    match cli.command {
        Command::Detect { workspace } => {
            let command = detect_server(&workspace)?;
            println!("{}", format_command(&command));
            Ok(ExitCode::SUCCESS)
        }
        Command::Diagnostics { server, files } => {
            let command = resolve_command(&config, &server)?;
            let timeout = resolve_timeout(&config, &server);
            run_session(&command, &server.workspace, &files, false, timeout, &cancel).await
        }
        Command::NotifyEdit { server, edit } => {
            let command = resolve_command(&config, &server)?;
            let timeout = resolve_timeout(&config, &server);
            let raw = tokio::fs::read_to_string(&edit)
                .await
                .with_context(|| format!("reading {}", edit.display()))?;
            let workspace_edit: WorkspaceEdit = serde_json::from_str(&raw)
                .with_context(|| format!("parsing workspace edit {}", edit.display()))?;
            let files = affected_files(&workspace_edit);
            if files.is_empty() {
                println!("Edit touches no files");
                return Ok(ExitCode::SUCCESS);
            }
            run_session(&command, &server.workspace, &files, true, timeout, &cancel).await
        }
    }
}

/// `--lsp` wins over the config file, which wins over detection.
fn resolve_command(config: &BridgeConfig, server: &ServerArgs) -> Result<ServerCommand> {
    if let Some(lsp) = &server.lsp {
        return Ok(ServerCommand::new(lsp.clone(), server.lsp_args.clone()));
    }
    if let Some(command) = config.server_command() {
        return Ok(command);
    }
    Ok(detect_server(&server.workspace)?)
}

fn resolve_timeout(config: &BridgeConfig, server: &ServerArgs) -> Duration {
    server
        .timeout_ms
        .map_or_else(|| config.timeout(), Duration::from_millis)
}

fn format_command(command: &ServerCommand) -> String {
    std::iter::once(command.command.as_str())
        .chain(command.args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Start the server, open (and for edits, re-sync) `files`, wait for each,
/// print the report and shut down. Exit code 1 if any error was reported.
async fn run_session(
    command: &ServerCommand,
    workspace: &Path,
    files: &[PathBuf],
    changed: bool,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let mut client = LspClient::start(command, workspace).await?;
    let result = collect_diagnostics(&mut client, files, changed, timeout, cancel).await;
    client.shutdown().await;

    let results = result?;
    let mut errors = 0;
    for (path, wait) in &results {
        errors += wait.error_count();
        print!("{}", format_report(path, wait));
    }
    Ok(if errors > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn collect_diagnostics(
    client: &mut LspClient,
    files: &[PathBuf],
    changed: bool,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<(PathBuf, DiagnosticsWait)>> {
    let hub = client.hub();
    let uris = files
        .iter()
        .map(|file| client.document_uri(file))
        .collect::<Result<Vec<_>>>()?;

    // Registered before any notification goes out.
    let pending: Vec<_> = uris.iter().map(|uri| hub.register_wait(uri)).collect();

    for file in files {
        client.open_file(file).await?;
        if changed {
            client.notify_change(file).await?;
        }
    }

    let waits = join_all(pending.into_iter().map(|wait| wait.wait(timeout, cancel))).await;
    for (file, wait) in files.iter().zip(&waits) {
        tracing::debug!(
            file = %file.display(),
            outcome = wait.outcome.label(),
            count = wait.diagnostics.len(),
            "Wait finished"
        );
    }

    Ok(files.iter().cloned().zip(waits).collect())
}

fn format_report(path: &Path, wait: &DiagnosticsWait) -> String {
    let mut out = String::new();
    if wait.diagnostics.is_empty() {
        out.push_str(&format!(
            "{}: no diagnostics ({})\n",
            path.display(),
            wait.outcome.label()
        ));
        return out;
    }
    out.push_str(&format!(
        "{}: {} diagnostic(s) ({})\n",
        path.display(),
        wait.diagnostics.len(),
        wait.outcome.label()
    ));
    for diag in &wait.diagnostics {
        out.push_str("  ");
        out.push_str(&diag.display_with_path(path));
        out.push('\n');
    }
    out
}
