//! Environment variables that must not leak into a spawned language server.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Glob patterns (matched case-insensitively) for secret-bearing env vars.
pub(crate) const ENV_SECRET_DENYLIST: &[&str] = &[
    "*_KEY",
    "*_API_KEY",
    "*_TOKEN",
    "*_SECRET",
    "*_PASSWORD",
    "*_CREDENTIAL*",
    "AWS_*",
    "AZURE_*",
    "GITHUB_TOKEN",
    "ANTHROPIC_*",
    "OPENAI_*",
];

pub(crate) fn secret_env_denylist() -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in ENV_SECRET_DENYLIST {
        builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denied(key: &str) -> bool {
        secret_env_denylist().unwrap().is_match(key)
    }

    #[test]
    fn test_suffix_patterns() {
        assert!(denied("API_KEY"));
        assert!(denied("MY_SECRET_KEY"));
        assert!(denied("NPM_TOKEN"));
        assert!(!denied("KEYRING"));
    }

    #[test]
    fn test_prefix_patterns() {
        assert!(denied("AWS_ACCESS_KEY_ID"));
        assert!(denied("OPENAI_ORG"));
        assert!(!denied("MY_AWS"));
    }

    #[test]
    fn test_infix_pattern() {
        assert!(denied("DB_CREDENTIAL_FILE"));
        assert!(!denied("CREDENTIAL"));
    }

    #[test]
    fn test_case_insensitive_exact() {
        assert!(denied("github_token"));
        assert!(denied("GITHUB_TOKEN"));
        assert!(!denied("GITHUB_TOKENS"));
    }

    #[test]
    fn test_build_environment_passes_through() {
        for key in ["PATH", "HOME", "GOPATH", "CARGO_HOME", "RUST_LOG"] {
            assert!(!denied(key), "{key} must be passed through");
        }
    }
}
