//! # Context Initialization
//!
//! Clients start here. [`initialize`] turns a working directory (and an optional
//! explicit database path) into a ready [`SpectraContext`]:
//!
//! 1. Load [`SpectraConfig`] through `clapfig`, merging `spectra.toml` from the global
//!    config directory with `spectra.toml` in the working directory.
//! 2. Resolve the database path: the override if given, else the configured
//!    `database`. Relative paths resolve against the OS data directory (via the
//!    `directories` crate), so the same store is found from any working directory.
//! 3. Open the database (creating it and its schema if needed) and wrap it in an
//!    unrestricted [`SpectraApi`].
//!
//! ## Data Directory Override
//!
//! `SPECTRA_DATA_DIR` replaces the OS data directory. It is mostly used by tests and
//! by deployments that keep the store on a dedicated volume.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clapfig::{Clapfig, SearchMode, SearchPath};
use directories::ProjectDirs;
use tracing::debug;

use crate::api::SpectraApi;
use crate::config::SpectraConfig;
use crate::error::{Result, SpectraError};
use crate::store::Database;

pub struct SpectraContext {
    pub api: SpectraApi,
    pub config: SpectraConfig,
    /// The database file actually opened.
    pub database_path: PathBuf,
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("org", "spectra", "spectra")
        .ok_or_else(|| SpectraError::Config("could not determine the home directory".into()))
}

/// Directory that relative database paths resolve against.
pub fn data_dir() -> Result<PathBuf> {
    match std::env::var_os("SPECTRA_DATA_DIR") {
        Some(dir) => Ok(PathBuf::from(dir)),
        None => Ok(project_dirs()?.data_dir().to_path_buf()),
    }
}

/// Load configuration for `cwd`. Missing or unreadable files fall back to defaults.
pub fn load_config(cwd: &Path) -> SpectraConfig {
    let mut search_paths = Vec::new();
    if let Ok(dirs) = project_dirs() {
        search_paths.push(SearchPath::Path(dirs.config_dir().to_path_buf()));
    }
    search_paths.push(SearchPath::Path(cwd.to_path_buf()));

    Clapfig::builder()
        .app_name("spectra")
        .file_name("spectra.toml")
        .search_paths(search_paths)
        .search_mode(SearchMode::Merge)
        .load()
        .unwrap_or_default()
}

/// Resolve `raw` against `base` unless it is already absolute.
pub fn resolve_database_path(raw: &Path, base: &Path) -> PathBuf {
    if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        base.join(raw)
    }
}

pub fn initialize(cwd: &Path, database_override: Option<PathBuf>) -> Result<SpectraContext> {
    let config = load_config(cwd);

    let database_path = match database_override {
        // an explicit path on the command line is relative to where the user is
        Some(path) => resolve_database_path(&path, cwd),
        None => resolve_database_path(Path::new(&config.database), &data_dir()?),
    };
    debug!(path = %database_path.display(), "resolved database path");

    let db = Database::open(&database_path, &config)?;
    let api = SpectraApi::new(Arc::new(db));

    Ok(SpectraContext {
        api,
        config,
        database_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewCampaign;
    use tempfile::TempDir;

    #[test]
    fn test_relative_paths_resolve_against_base() {
        let base = Path::new("/var/lib/spectra");
        assert_eq!(
            resolve_database_path(Path::new("meta.db"), base),
            PathBuf::from("/var/lib/spectra/meta.db")
        );
        assert_eq!(
            resolve_database_path(Path::new("/tmp/x.db"), base),
            PathBuf::from("/tmp/x.db")
        );
    }

    #[test]
    fn test_initialize_with_override_opens_that_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store").join("spectra.db");

        let mut ctx = initialize(temp.path(), Some(path.clone())).unwrap();
        assert_eq!(ctx.database_path, path);
        ctx.api.insert_campaign(&NewCampaign::new("C")).unwrap();
        assert!(path.exists());

        let ctx = initialize(temp.path(), Some(path)).unwrap();
        assert_eq!(ctx.api.list_campaigns().unwrap().len(), 1);
    }

    #[test]
    fn test_relative_override_is_relative_to_cwd() {
        let temp = TempDir::new().unwrap();
        let ctx = initialize(temp.path(), Some(PathBuf::from("local.db"))).unwrap();
        assert_eq!(ctx.database_path, temp.path().join("local.db"));
    }

    #[test]
    fn test_config_file_in_cwd_is_read() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("spectra.toml"),
            "journal_mode = \"DELETE\"\nbusy_timeout_ms = 100\n",
        )
        .unwrap();
        let config = load_config(temp.path());
        assert_eq!(config.journal_mode, "DELETE");
        assert_eq!(config.busy_timeout_ms, 100);
    }
}
