//! Document identity.
//!
//! A [`DocumentUri`] is the key that links cached diagnostics to the callers
//! waiting on them. Both sides must agree on spelling, so every constructor
//! funnels through the same normalization: absolute path, `.`/`..` resolved,
//! re-encoded by `url`.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InvalidDocumentUri {
    #[error("document path must be absolute: {}", .0.display())]
    RelativePath(PathBuf),
    #[error("cannot convert path to file URI: {}", .0.display())]
    Unrepresentable(PathBuf),
    #[error("invalid document URI '{uri}': {source}")]
    Parse {
        uri: String,
        #[source]
        source: url::ParseError,
    },
}

/// Lexically resolve `.` and `..` components without touching the filesystem.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Normalized `file://` URI identifying one document in the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentUri(String);

impl DocumentUri {
    pub fn from_path(path: &Path) -> Result<Self, InvalidDocumentUri> {
        if !path.is_absolute() {
            return Err(InvalidDocumentUri::RelativePath(path.to_path_buf()));
        }
        let normalized = normalize_path(path);
        let url = url::Url::from_file_path(&normalized)
            .map_err(|()| InvalidDocumentUri::Unrepresentable(normalized))?;
        Ok(Self(url.into()))
    }

    /// Parse a URI as sent by a language server.
    ///
    /// `file` URIs are round-tripped through a path so they compare equal to
    /// identities built with [`DocumentUri::from_path`]. Other schemes are
    /// kept as `url` serializes them.
    pub fn parse(uri: &str) -> Result<Self, InvalidDocumentUri> {
        let url = url::Url::parse(uri).map_err(|source| InvalidDocumentUri::Parse {
            uri: uri.to_string(),
            source,
        })?;
        if url.scheme() == "file"
            && let Ok(path) = url.to_file_path()
        {
            return Self::from_path(&path);
        }
        Ok(Self(url.into()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The filesystem path, for `file` URIs.
    #[must_use]
    pub fn to_file_path(&self) -> Option<PathBuf> {
        url::Url::parse(&self.0)
            .ok()
            .and_then(|u| u.to_file_path().ok())
    }
}

impl fmt::Display for DocumentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
