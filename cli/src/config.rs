use std::path::{Path, PathBuf};
use std::time::Duration;

use lspbridge_lsp::ServerCommand;
use serde::Deserialize;
use thiserror::Error;

/// Phase-1 timeout when neither the config nor the command line sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Deserialize)]
pub struct BridgeConfig {
    pub lsp: Option<LspSection>,
    pub diagnostics: Option<DiagnosticsSection>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LspSection {
    /// Server binary. When absent the server is detected from marker files.
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DiagnosticsSection {
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

impl BridgeConfig {
    /// Load `explicit` if given, otherwise `~/.lspbridge/config.toml`.
    ///
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            ConfigError::Read {
                path: path.clone(),
                source,
            }
        })?;

        let config = toml::from_str(&content).map_err(|source| {
            tracing::warn!("Failed to parse config at {}: {source}", path.display());
            ConfigError::Parse {
                path: path.clone(),
                source,
            }
        })?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Configured server command, if one is set.
    #[must_use]
    pub fn server_command(&self) -> Option<ServerCommand> {
        let lsp = self.lsp.as_ref()?;
        let command = lsp.command.as_ref()?;
        Some(ServerCommand::new(command.clone(), lsp.args.clone()))
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.diagnostics
            .as_ref()
            .and_then(|d| d.timeout_ms)
            .map_or(DEFAULT_TIMEOUT, Duration::from_millis)
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join("config.toml"))
}

/// `~/.lspbridge`, home of the config file and logs.
#[must_use]
pub fn data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".lspbridge"))
}
