//! # Configuration
//!
//! Spectra configuration is managed by [`clapfig`], which handles layered loading
//! from TOML files, environment variables, and programmatic overrides.
//!
//! ## Storage Hierarchy
//!
//! Configuration is resolved in priority order:
//! 1. **Environment variables**: `SPECTRA__DATABASE`, `SPECTRA__JOURNAL_MODE`, etc.
//! 2. **Working directory**: `./spectra.toml`.
//! 3. **Global Config**: OS-appropriate config directory (via `directories` crate).
//! 4. **Compiled Defaults**: Built-in fallbacks via `#[config(default = ...)]`.
//!
//! ## Available Settings
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | `database` | `spectra.db` | SQLite file; relative paths resolve against the data dir |
//! | `busy_timeout_ms` | `5000` | How long a writer waits for a locked database |
//! | `journal_mode` | `WAL` | SQLite journal mode |
//! | `log_filter` | `warn` | Default `tracing` filter used by the CLI |

use confique::Config;
use serde::{Deserialize, Serialize};

const JOURNAL_MODES: [&str; 6] = ["DELETE", "TRUNCATE", "PERSIST", "MEMORY", "WAL", "OFF"];

/// Configuration for spectra, stored in `spectra.toml`.
#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SpectraConfig {
    /// SQLite database file.
    #[config(default = "spectra.db")]
    pub database: String,

    /// Milliseconds a connection waits on a locked database before failing.
    #[config(default = 5000)]
    pub busy_timeout_ms: u64,

    #[config(default = "WAL")]
    pub journal_mode: String,

    /// `tracing` filter directive used when `RUST_LOG` is not set.
    #[config(default = "warn")]
    pub log_filter: String,
}

impl Default for SpectraConfig {
    fn default() -> Self {
        Self {
            database: "spectra.db".to_string(),
            busy_timeout_ms: 5000,
            journal_mode: "WAL".to_string(),
            log_filter: "warn".to_string(),
        }
    }
}

impl SpectraConfig {
    /// The journal mode, upper-cased, if SQLite knows it.
    pub fn journal_mode(&self) -> Option<String> {
        let mode = self.journal_mode.trim().to_ascii_uppercase();
        JOURNAL_MODES.contains(&mode.as_str()).then_some(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SpectraConfig::default();
        assert_eq!(config.database, "spectra.db");
        assert_eq!(config.busy_timeout_ms, 5000);
        assert_eq!(config.journal_mode().as_deref(), Some("WAL"));
        assert_eq!(config.log_filter, "warn");
    }

    #[test]
    fn test_journal_mode_is_normalized() {
        let config = SpectraConfig {
            journal_mode: " truncate ".to_string(),
            ..Default::default()
        };
        assert_eq!(config.journal_mode().as_deref(), Some("TRUNCATE"));
    }

    #[test]
    fn test_unknown_journal_mode() {
        let config = SpectraConfig {
            journal_mode: "fast".to_string(),
            ..Default::default()
        };
        assert_eq!(config.journal_mode(), None);
    }

    #[test]
    fn test_parses_from_toml() {
        let config: SpectraConfig = toml::from_str(
            r#"
            database = "/srv/spectra/meta.db"
            busy_timeout_ms = 250
            journal_mode = "DELETE"
            log_filter = "spectra_core=debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.database, "/srv/spectra/meta.db");
        assert_eq!(config.busy_timeout_ms, 250);
        assert_eq!(config.log_filter, "spectra_core=debug");
    }
}
