use rusqlite::ErrorCode;
use std::fmt;
use thiserror::Error;

/// The kinds of entities a lookup can fail to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Attribute,
    Category,
    Record,
    HierarchyNode,
    Campaign,
    TaxonomyNode,
    EavEntry,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Attribute => "Attribute",
            EntityKind::Category => "Category",
            EntityKind::Record => "Record",
            EntityKind::HierarchyNode => "Hierarchy node",
            EntityKind::Campaign => "Campaign",
            EntityKind::TaxonomyNode => "Taxonomy node",
            EntityKind::EavEntry => "Metadata entry",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum SpectraError {
    #[error("{kind} not found: {key}")]
    NotFound { kind: EntityKind, key: String },

    #[error("Integrity violation during {op}: {detail}")]
    IntegrityViolation { op: String, detail: String },

    #[error("Invalid predicate: {0}")]
    InvalidPredicate(String),

    #[error("Attribute '{attribute}' holds {expected} values, got {found}")]
    TypeMismatch {
        attribute: String,
        expected: String,
        found: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Backing store error during {op}: {source}")]
    BackingStore {
        op: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Database lock poisoned during {0}")]
    LockPoisoned(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SpectraError {
    pub fn not_found(kind: EntityKind, key: impl fmt::Display) -> Self {
        SpectraError::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub fn integrity(op: impl Into<String>, detail: impl Into<String>) -> Self {
        SpectraError::IntegrityViolation {
            op: op.into(),
            detail: detail.into(),
        }
    }

    /// Classify a store failure. Constraint failures (foreign keys, uniqueness)
    /// are integrity violations; everything else is a backing store error.
    ///
    /// Statement text is dropped from prepare errors: a compiled query can carry
    /// thousands of placeholders, and the operation name already says where it failed.
    pub fn from_store(op: &str, source: rusqlite::Error) -> Self {
        let source = match source {
            rusqlite::Error::SqlInputError {
                error, msg, offset, ..
            } => rusqlite::Error::SqliteFailure(
                error,
                Some(format!("{} at offset {}", msg, offset)),
            ),
            other => other,
        };
        if let rusqlite::Error::SqliteFailure(failure, message) = &source {
            if failure.code == ErrorCode::ConstraintViolation {
                return SpectraError::IntegrityViolation {
                    op: op.to_string(),
                    detail: message.clone().unwrap_or_else(|| failure.to_string()),
                };
            }
        }
        SpectraError::BackingStore {
            op: op.to_string(),
            source,
        }
    }

    /// True for errors caused by the caller's request rather than the store.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            SpectraError::NotFound { .. }
                | SpectraError::InvalidPredicate(_)
                | SpectraError::TypeMismatch { .. }
                | SpectraError::InvalidArgument(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SpectraError>;

/// Attaches an operation description to raw store results.
pub(crate) trait StoreContext<T> {
    fn during(self, op: &str) -> Result<T>;
}

impl<T> StoreContext<T> for std::result::Result<T, rusqlite::Error> {
    fn during(self, op: &str) -> Result<T> {
        self.map_err(|e| SpectraError::from_store(op, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_failures_become_integrity_violations() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER UNIQUE); INSERT INTO t VALUES (1);")
            .unwrap();
        let err = conn
            .execute("INSERT INTO t VALUES (1)", [])
            .during("insert duplicate")
            .unwrap_err();
        assert!(matches!(err, SpectraError::IntegrityViolation { .. }));
        assert!(err.to_string().contains("insert duplicate"));
    }

    #[test]
    fn other_failures_become_backing_store_errors() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err = conn
            .execute("SELECT * FROM missing_table", [])
            .during("select missing")
            .unwrap_err();
        assert!(matches!(err, SpectraError::BackingStore { .. }));
        assert!(!err.is_caller_error());
    }

    #[test]
    fn statement_text_is_left_out_of_store_errors() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let filler = "?,".repeat(2000);
        let sql = format!("SELECT * FROM missing_table WHERE x IN ({}?)", filler);
        let err = conn
            .prepare(&sql)
            .map(|_| ())
            .during("prepare wide select")
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("prepare wide select"));
        assert!(message.contains("missing_table"));
        assert!(!message.contains("?,?,?"));
        assert!(message.len() < 200);
    }

    #[test]
    fn not_found_formats_kind_and_key() {
        let err = SpectraError::not_found(EntityKind::HierarchyNode, 42);
        assert_eq!(err.to_string(), "Hierarchy node not found: 42");
        assert!(err.is_caller_error());
    }
}
