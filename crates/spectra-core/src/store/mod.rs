//! # Storage Layer
//!
//! All persistent state lives in one SQLite database. [`Database`] owns the connection
//! and hands it out to the command layer through two entry points:
//!
//! - [`Database::read`]: runs a closure against the connection.
//! - [`Database::write`]: runs a closure inside an `IMMEDIATE` transaction. The
//!   transaction commits when the closure returns `Ok` and rolls back when it returns
//!   `Err`, so a top-level operation is applied either completely or not at all.
//!
//! The connection sits behind a `Mutex`, and sessions on different threads share the
//! database through an `Arc<Database>`. Holding the lock for the whole operation
//! means a reader can never observe a cascade half applied.
//!
//! ## Referential Integrity
//!
//! Foreign keys are switched on for every connection. Cascades are performed by the
//! command layer (depth-first, children before parents) rather than `ON DELETE CASCADE`,
//! so a reference the walk missed surfaces as an
//! [`IntegrityViolation`](crate::error::SpectraError::IntegrityViolation) instead of
//! disappearing silently.
//!
//! ## Bound Parameters
//!
//! Values never appear in SQL text. Statements that take a variable number of ids are
//! issued in chunks of [`MAX_BIND`] using [`placeholders`].

pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::config::SpectraConfig;
use crate::error::{Result, SpectraError, StoreContext};

/// Largest number of ids bound into a single `IN (...)` list.
pub const MAX_BIND: usize = 500;

/// SQLite database holding campaigns, hierarchy, records and EAV metadata.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database file at `path`.
    pub fn open(path: &Path, config: &SpectraConfig) -> Result<Self> {
        info!("Opening SQLite database at {:?}", path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).during("open database")?;
        conn.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
            .during("set busy timeout")?;

        // only documented modes reach the pragma text
        let requested = config.journal_mode().ok_or_else(|| {
            SpectraError::Config(format!("unknown journal_mode '{}'", config.journal_mode))
        })?;
        let mode: String = conn
            .query_row(&format!("PRAGMA journal_mode = {}", requested), [], |row| {
                row.get(0)
            })
            .during("set journal mode")?;
        debug!(journal_mode = %mode, "journal mode set");

        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory SQLite database");
        let conn = Connection::open_in_memory().during("open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .during("enable foreign keys")?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self, op: &str) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SpectraError::LockPoisoned(op.to_string()))
    }

    /// Run a read-only closure against the connection.
    pub fn read<T>(&self, op: &str, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock(op)?;
        f(&conn)
    }

    /// Run a closure inside one transaction.
    ///
    /// Commits on `Ok`. On `Err` the transaction is dropped, which rolls it back.
    pub fn write<T>(&self, op: &str, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock(op)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .during(op)?;

        match f(&tx) {
            Ok(value) => {
                tx.commit().during(op)?;
                Ok(value)
            }
            Err(err) => {
                if matches!(err, SpectraError::IntegrityViolation { .. }) {
                    warn!(op, error = %err, "aborting transaction");
                } else {
                    debug!(op, error = %err, "rolling back transaction");
                }
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Database")
    }
}

/// `?,?,?` with `n` placeholders.
pub fn placeholders(n: usize) -> String {
    let mut out = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_match_count() {
        assert_eq!(placeholders(0), "");
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?,?,?");
    }

    #[test]
    fn unknown_journal_mode_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = SpectraConfig {
            journal_mode: "wal; DROP TABLE record".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            Database::open(&dir.path().join("spectra.db"), &config),
            Err(SpectraError::Config(_))
        ));
    }

    #[test]
    fn failed_write_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<()> = db.write("insert then fail", |tx| {
            tx.execute("INSERT INTO category (name) VALUES ('Optics')", [])
                .during("insert category")?;
            Err(SpectraError::InvalidArgument("boom".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .read("count", |conn| {
                conn.query_row("SELECT COUNT(*) FROM category", [], |row| row.get(0))
                    .during("count")
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .write("orphan node", |tx| {
                tx.execute(
                    "INSERT INTO hierarchy_node (campaign_id, parent_id, name) VALUES (99, NULL, 'x')",
                    [],
                )
                .during("insert orphan node")
            })
            .unwrap_err();
        assert!(matches!(err, SpectraError::IntegrityViolation { .. }));
    }

    #[test]
    fn opens_database_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("spectra.db");
        let config = SpectraConfig::default();
        {
            let db = Database::open(&path, &config).unwrap();
            db.write("seed", |tx| {
                tx.execute("INSERT INTO category (name) VALUES ('Optics')", [])
                    .during("insert category")
            })
            .unwrap();
        }
        let db = Database::open(&path, &config).unwrap();
        let count: i64 = db
            .read("count", |conn| {
                conn.query_row("SELECT COUNT(*) FROM category", [], |row| row.get(0))
                    .during("count")
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
