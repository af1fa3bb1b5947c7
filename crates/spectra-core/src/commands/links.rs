//! Target/reference links.
//!
//! A directed many-to-many relation between target records and the reference records
//! they were measured against. Both endpoints must be visible records.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter};
use tracing::debug;

use crate::commands::helpers::{require_record, require_records};
use crate::error::{Result, SpectraError, StoreContext};
use crate::model::{CampaignId, Link, RecordId};
use crate::session::Session;

/// Link `target` to every reference. Returns how many links were actually created;
/// links that already exist are skipped without error.
pub fn link_targets_to_references(
    session: &mut Session,
    target: RecordId,
    references: &[RecordId],
) -> Result<usize> {
    if references.contains(&target) {
        return Err(SpectraError::InvalidArgument(format!(
            "record {} cannot be its own reference",
            target
        )));
    }
    let visibility = &session.visibility;
    let created = session.db.write("link records", |tx| {
        require_record(tx, visibility, target)?;
        let references = require_records(tx, visibility, references)?;
        let mut stmt = tx
            .prepare(
                "INSERT OR IGNORE INTO target_reference_link (target_id, reference_id)
                 VALUES (?, ?)",
            )
            .during("link records")?;
        let mut created = 0;
        for reference in references {
            created += stmt
                .execute(params![target, reference])
                .during("link records")?;
        }
        Ok(created)
    })?;
    debug!(target = %target, created, "records linked");
    Ok(created)
}

/// Links matching both endpoints; `None` matches any record.
pub fn get_links(
    session: &Session,
    target: Option<RecordId>,
    reference: Option<RecordId>,
) -> Result<Vec<Link>> {
    session.db.read("get links", |conn| {
        let mut sql = String::from(
            "SELECT l.target_id, l.reference_id, t.campaign_id, r.campaign_id
             FROM target_reference_link l
             JOIN record t ON t.record_id = l.target_id
             JOIN record r ON r.record_id = l.reference_id",
        );
        let mut conditions = Vec::new();
        let mut params = Vec::new();
        if let Some(target) = target {
            conditions.push("l.target_id = ?");
            params.push(Value::Integer(target.0));
        }
        if let Some(reference) = reference {
            conditions.push("l.reference_id = ?");
            params.push(Value::Integer(reference.0));
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY l.target_id, l.reference_id");

        let mut stmt = conn.prepare(&sql).during("get links")?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok((
                    Link {
                        target_id: row.get(0)?,
                        reference_id: row.get(1)?,
                    },
                    row.get::<_, CampaignId>(2)?,
                    row.get::<_, CampaignId>(3)?,
                ))
            })
            .during("get links")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .during("get links")?;
        Ok(rows
            .into_iter()
            .filter(|(_, t, r)| session.visibility.allows(*t) && session.visibility.allows(*r))
            .map(|(link, _, _)| link)
            .collect())
    })
}

/// Remove every link whose target is `target`. Returns the number removed.
pub fn delete_links_by_target(session: &mut Session, target: RecordId) -> Result<usize> {
    let visibility = &session.visibility;
    session.db.write("delete links", |tx| {
        require_record(tx, visibility, target)?;
        tx.execute(
            "DELETE FROM target_reference_link WHERE target_id = ?",
            [target],
        )
        .during("delete links")
    })
}

/// Remove a single link. Returns whether it existed.
pub fn remove_link(session: &mut Session, target: RecordId, reference: RecordId) -> Result<bool> {
    let visibility = &session.visibility;
    session.db.write("remove link", |tx| {
        require_record(tx, visibility, target)?;
        let removed = tx
            .execute(
                "DELETE FROM target_reference_link WHERE target_id = ? AND reference_id = ?",
                params![target, reference],
            )
            .during("remove link")?;
        Ok(removed > 0)
    })
}
