use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "lspbridge",
    version,
    about = "Run a language server and report diagnostics once they settle",
    after_help = r"Examples:
  lspbridge detect --workspace .
  lspbridge diagnostics --workspace . src/main.go
  lspbridge diagnostics --lsp pyright-langserver --lsp-arg=--stdio app.py
  lspbridge notify-edit --workspace . edit.json
"
)]
pub struct Cli {
    /// Config file (default: ~/.lspbridge/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the language server detected for a workspace.
    Detect {
        #[arg(long, default_value = ".")]
        workspace: PathBuf,
    },
    /// Open files and print their diagnostics once the server settles.
    Diagnostics {
        #[command(flatten)]
        server: ServerArgs,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Apply the file notifications for a WorkspaceEdit JSON file and print
    /// diagnostics for every file it touches.
    NotifyEdit {
        #[command(flatten)]
        server: ServerArgs,
        edit: PathBuf,
    },
}

#[derive(Args)]
pub struct ServerArgs {
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,
    /// Language server binary. Overrides config and detection.
    #[arg(long, value_name = "CMD")]
    pub lsp: Option<String>,
    /// Argument for the --lsp server. Repeat for several.
    #[arg(long = "lsp-arg", value_name = "ARG", allow_hyphen_values = true, requires = "lsp")]
    pub lsp_args: Vec<String>,
    /// How long to wait for the first publication per file.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}
