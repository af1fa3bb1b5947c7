//! Query execution.
//!
//! Compiles a [`Query`] against the session's registry and visibility, then runs it in
//! a single read. See [`crate::query::compiler`] for the SQL shape.

use rusqlite::params_from_iter;

use crate::error::{Result, StoreContext};
use crate::model::RecordId;
use crate::query::{compile, Predicate, Query, Shape};
use crate::session::Session;

/// Distinct record ids matching `query`, in the requested order.
pub fn execute(session: &mut Session, query: &Query) -> Result<Vec<RecordId>> {
    let registry = session.registry()?;
    let compiled = compile(query, &registry, &session.visibility, Shape::Ids)?;
    session.db.read("execute query", |conn| {
        let mut stmt = conn.prepare(&compiled.sql).during("execute query")?;
        let ids = stmt
            .query_map(params_from_iter(compiled.params.iter()), |row| {
                row.get::<_, RecordId>(0)
            })
            .during("execute query")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .during("execute query")?;
        Ok(ids)
    })
}

/// Number of distinct records matching `predicate` (`None` counts every visible record).
pub fn count(session: &mut Session, predicate: Option<&Predicate>) -> Result<u64> {
    let query = Query {
        predicate: predicate.cloned(),
        ..Default::default()
    };
    let registry = session.registry()?;
    let compiled = compile(&query, &registry, &session.visibility, Shape::Count)?;
    session.db.read("count query", |conn| {
        let n: i64 = conn
            .query_row(
                &compiled.sql,
                params_from_iter(compiled.params.iter()),
                |row| row.get(0),
            )
            .during("count query")?;
        Ok(n as u64)
    })
}
