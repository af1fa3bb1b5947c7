//! Record lifecycle.
//!
//! A record is always attached to exactly one hierarchy node; its campaign is taken
//! from that node and kept on the record row. Deleting a record removes its EAV
//! entries and every target/reference link it takes part in.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::commands::helpers::{
    execute_in, record_from_row, require_node, require_record, require_records, select_in,
    RECORD_COLUMNS,
};
use crate::error::{Result, StoreContext};
use crate::model::{format_timestamp, NewRecord, NodeId, Record, RecordId};
use crate::session::Session;

/// A bulk rewrite of one record column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum RecordUpdate {
    /// Move the records under another node (and so possibly another campaign).
    Node(NodeId),
    Owner(Option<i64>),
    Calibration(Option<i64>),
}

pub fn insert_record(session: &mut Session, new: &NewRecord) -> Result<Record> {
    let visibility = &session.visibility;
    session.db.write("insert record", |tx| {
        let node = require_node(tx, visibility, new.node_id)?;
        tx.execute(
            "INSERT INTO record
                (node_id, campaign_id, owner_id, measurement_ref, calibration_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                node.id,
                node.campaign_id,
                new.owner_id,
                new.measurement_ref,
                new.calibration_id,
                format_timestamp(&Utc::now())
            ],
        )
        .during("insert record")?;
        let id = RecordId(tx.last_insert_rowid());
        require_record(tx, visibility, id)
    })
}

pub fn get_record(session: &Session, id: RecordId) -> Result<Record> {
    session
        .db
        .read("get record", |conn| require_record(conn, &session.visibility, id))
}

/// Copy a record to `target` (or its own node). The copy gets a new id and creation
/// time; with `with_metadata` its EAV entries are copied too.
pub fn copy_record(
    session: &mut Session,
    id: RecordId,
    target: Option<NodeId>,
    with_metadata: bool,
) -> Result<Record> {
    let visibility = &session.visibility;
    let copy = session.db.write("copy record", |tx| {
        let source = require_record(tx, visibility, id)?;
        let node = require_node(tx, visibility, target.unwrap_or(source.node_id))?;
        tx.execute(
            "INSERT INTO record
                (node_id, campaign_id, owner_id, measurement_ref, calibration_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                node.id,
                node.campaign_id,
                source.owner_id,
                source.measurement_ref,
                source.calibration_id,
                format_timestamp(&Utc::now())
            ],
        )
        .during("copy record")?;
        let copy = RecordId(tx.last_insert_rowid());

        if with_metadata {
            tx.execute(
                "INSERT INTO eav_value
                    (record_id, attribute_id, text_val, int_val, real_val, datetime_val,
                     taxonomy_id, binary_val, unit, value_key)
                 SELECT ?, attribute_id, text_val, int_val, real_val, datetime_val,
                        taxonomy_id, binary_val, unit, value_key
                 FROM eav_value WHERE record_id = ? ORDER BY eav_id",
                params![copy, source.id],
            )
            .during("copy record metadata")?;
        }
        debug!(source = %source.id, copy = %copy, with_metadata, "record copied");
        require_record(tx, visibility, copy)
    })?;
    Ok(copy)
}

/// Delete record rows together with their EAV entries and links. Callers check
/// visibility first.
pub(crate) fn delete_record_rows(conn: &Connection, ids: &[RecordId]) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    execute_in(
        conn,
        "delete record metadata",
        "DELETE FROM eav_value WHERE record_id IN ({})",
        ids,
    )?;
    execute_in(
        conn,
        "delete record links",
        "DELETE FROM target_reference_link WHERE target_id IN ({})",
        ids,
    )?;
    execute_in(
        conn,
        "delete record links",
        "DELETE FROM target_reference_link WHERE reference_id IN ({})",
        ids,
    )?;
    execute_in(
        conn,
        "delete records",
        "DELETE FROM record WHERE record_id IN ({})",
        ids,
    )
}

/// Delete one record. `privileged` bypasses the session's visibility.
pub fn delete_record(session: &mut Session, id: RecordId, privileged: bool) -> Result<()> {
    let visibility = session.scope(privileged).clone();
    session.db.write("delete record", |tx| {
        require_record(tx, &visibility, id)?;
        delete_record_rows(tx, &[id])?;
        Ok(())
    })?;
    session.memo.forget_records(&[id]);
    debug!(record = %id, "record deleted");
    Ok(())
}

/// Rewrite one column on many records. Returns the number of records changed.
pub fn update_records_field(
    session: &mut Session,
    records: &[RecordId],
    update: RecordUpdate,
) -> Result<usize> {
    let visibility = &session.visibility;
    session.db.write("update records", |tx| {
        let records = require_records(tx, visibility, records)?;
        let mut changed = 0;
        for record in &records {
            let op = format!("update record {}", record);
            changed += match update {
                RecordUpdate::Node(node) => {
                    let node = require_node(tx, visibility, node)?;
                    tx.execute(
                        "UPDATE record SET node_id = ?, campaign_id = ? WHERE record_id = ?",
                        params![node.id, node.campaign_id, record],
                    )
                }
                RecordUpdate::Owner(owner) => tx.execute(
                    "UPDATE record SET owner_id = ? WHERE record_id = ?",
                    params![owner, record],
                ),
                RecordUpdate::Calibration(calibration) => tx.execute(
                    "UPDATE record SET calibration_id = ? WHERE record_id = ?",
                    params![calibration, record],
                ),
            }
            .during(&op)?;
        }
        Ok(changed)
    })
}

/// Calibration id per record, aligned with `records`. `0` where unset.
pub fn calibration_ids(session: &Session, records: &[RecordId]) -> Result<Vec<i64>> {
    session.db.read("get calibration ids", |conn| {
        let unique = require_records(conn, &session.visibility, records)?;
        let rows = select_in(
            conn,
            "get calibration ids",
            "SELECT record_id, calibration_id FROM record WHERE record_id IN ({})",
            &[],
            &unique,
            |row| Ok((row.get::<_, RecordId>(0)?, row.get::<_, Option<i64>>(1)?)),
        )?;
        let by_record: std::collections::HashMap<_, _> = rows.into_iter().collect();
        Ok(records
            .iter()
            .map(|id| by_record.get(id).copied().flatten().unwrap_or(0))
            .collect())
    })
}

/// Records directly under `node`, in id order.
pub(crate) fn records_of_node(conn: &Connection, node: NodeId) -> Result<Vec<Record>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM record WHERE node_id = ? ORDER BY record_id",
            RECORD_COLUMNS
        ))
        .during("list node records")?;
    let records = stmt
        .query_map([node], record_from_row)
        .during("list node records")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .during("list node records")?;
    Ok(records)
}
