//! Watched-file registrations.
//!
//! Servers such as gopls register `workspace/didChangeWatchedFiles` at
//! runtime with glob patterns like `**/*.{go,mod,sum,work}`. The bridge has
//! no filesystem watcher of its own; it consults these registrations when it
//! is told a file changed and forwards the change only if some server
//! pattern asks for it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use lspbridge_types::{DocumentUri, normalize_path};

use crate::protocol::{DidChangeWatchedFilesRegistrationOptions, GlobPattern};

struct Watcher {
    /// Paths are made relative to this before matching.
    base: PathBuf,
    matcher: GlobMatcher,
}

impl Watcher {
    fn matches(&self, path: &Path) -> bool {
        match path.strip_prefix(&self.base) {
            Ok(relative) => self.matcher.is_match(relative),
            Err(_) => false,
        }
    }
}

pub(crate) struct WatchRegistry {
    root: PathBuf,
    registrations: HashMap<String, Vec<Watcher>>,
}

impl WatchRegistry {
    pub fn new(root: &Path) -> Self {
        Self {
            root: normalize_path(root),
            registrations: HashMap::new(),
        }
    }

    /// Compile and store a registration. Patterns that fail to compile are
    /// logged and skipped; the rest of the registration still applies.
    pub fn register(&mut self, id: String, options: DidChangeWatchedFilesRegistrationOptions) {
        let mut watchers = Vec::with_capacity(options.watchers.len());
        for watcher in options.watchers {
            let (base, pattern) = match watcher.glob_pattern {
                GlobPattern::Pattern(pattern) => (self.root.clone(), pattern),
                GlobPattern::Relative(rel) => {
                    let base = DocumentUri::parse(rel.base_uri.uri())
                        .ok()
                        .and_then(|uri| uri.to_file_path());
                    let Some(base) = base else {
                        tracing::warn!(
                            base = rel.base_uri.uri(),
                            "Ignoring watcher with non-file base URI"
                        );
                        continue;
                    };
                    (base, rel.pattern)
                }
            };

            match GlobBuilder::new(&pattern).literal_separator(true).build() {
                Ok(glob) => watchers.push(Watcher {
                    base,
                    matcher: glob.compile_matcher(),
                }),
                Err(e) => {
                    tracing::warn!(%pattern, "Ignoring invalid watch pattern: {e}");
                }
            }
        }

        tracing::debug!(id = %id, count = watchers.len(), "Registered file watchers");
        self.registrations.insert(id, watchers);
    }

    pub fn unregister(&mut self, id: &str) -> bool {
        self.registrations.remove(id).is_some()
    }

    /// Whether a change to `path` is relevant to any registered watcher.
    pub fn matches(&self, path: &Path) -> bool {
        let path = normalize_path(path);
        self.registrations
            .values()
            .flatten()
            .any(|watcher| watcher.matches(&path))
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;

    fn options(json: serde_json::Value) -> DidChangeWatchedFilesRegistrationOptions {
        serde_json::from_value(json).unwrap()
    }

    fn registry_with(patterns: &[&str]) -> WatchRegistry {
        let mut registry = WatchRegistry::new(Path::new("/workspace"));
        let watchers: Vec<_> = patterns
            .iter()
            .map(|p| serde_json::json!({ "globPattern": p }))
            .collect();
        registry.register("w".into(), options(serde_json::json!({ "watchers": watchers })));
        registry
    }

    #[test]
    fn test_braced_glob() {
        // gopls registers patterns like **/*.{go,mod,sum,work}
        let registry = registry_with(&["**/*.{go,mod,sum,work}"]);

        let cases = [
            ("/workspace/main.go", true),
            ("/workspace/internal/foo/bar.go", true),
            ("/workspace/go.mod", true),
            ("/workspace/go.sum", true),
            ("/workspace/go.work", true),
            ("/workspace/readme.txt", false),
            ("/workspace/main.rs", false),
        ];
        for (path, want) in cases {
            assert_eq!(registry.matches(Path::new(path)), want, "{path}");
        }
    }

    #[test]
    fn test_simple_glob() {
        let registry = registry_with(&["**/*.go"]);
        assert!(registry.matches(Path::new("/workspace/main.go")));
        assert!(registry.matches(Path::new("/workspace/internal/foo.go")));
        assert!(!registry.matches(Path::new("/workspace/readme.txt")));
    }

    #[test]
    fn test_single_star_does_not_cross_directories() {
        let registry = registry_with(&["*.toml"]);
        assert!(registry.matches(Path::new("/workspace/Cargo.toml")));
        assert!(!registry.matches(Path::new("/workspace/crates/a/Cargo.toml")));
    }

    #[test]
    fn test_paths_outside_root_never_match() {
        let registry = registry_with(&["**/*.go"]);
        assert!(!registry.matches(Path::new("/elsewhere/main.go")));
        assert!(!registry.matches(Path::new("/workspace/../elsewhere/main.go")));
    }

    #[test]
    fn test_relative_pattern_uses_base_uri() {
        let mut registry = WatchRegistry::new(Path::new("/workspace"));
        registry.register(
            "rel".into(),
            options(serde_json::json!({
                "watchers": [{
                    "globPattern": { "baseUri": "file:///workspace/config", "pattern": "*.json" }
                }]
            })),
        );
        assert!(registry.matches(Path::new("/workspace/config/app.json")));
        assert!(!registry.matches(Path::new("/workspace/app.json")));
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let registry = registry_with(&["[invalid", "**/*.py"]);
        assert!(registry.matches(Path::new("/workspace/app.py")));
    }

    #[test]
    fn test_unregister() {
        let mut registry = registry_with(&["**/*.go"]);
        assert!(registry.unregister("w"));
        assert!(!registry.unregister("w"));
        assert!(registry.is_empty());
        assert!(!registry.matches(Path::new("/workspace/main.go")));
    }
}
