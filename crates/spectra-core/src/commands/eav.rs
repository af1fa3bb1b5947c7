//! # EAV Value Store
//!
//! Records carry metadata as rows of `eav_value`: one row per (record, attribute,
//! value). The value sits in the column matching the attribute's kind; the other value
//! columns stay `NULL`.
//!
//! ## Multi-valued Attributes
//!
//! An attribute may hold several values for the same record (repeated annotations), so
//! an entry is identified by its own [`EavId`], not by (record, attribute). Callers that
//! want single-valued semantics remove the old entries first or pass the previous
//! value to [`set_value`] for an in-place replacement.
//!
//! ## Redundancy Suppression
//!
//! Writing a value that the record already holds for that attribute is a no-op
//! reported as [`WriteOutcome::AlreadyPresent`]. Two layers implement it:
//!
//! 1. The session's [`RedundancyMemo`](crate::session::RedundancyMemo) answers for
//!    triples this session has already seen stored, without a round trip.
//! 2. The store's `UNIQUE (record_id, attribute_id, value_key)` constraint is the
//!    authority. Inserts use `INSERT OR IGNORE`, and an ignored insert is reported as
//!    already present, so concurrent sessions cannot create duplicates either.
//!
//! The memo is advisory: a stale hit (another session deleted the value) reports
//! "already present" until [`Session::clear_redundancy_memo`] is called.

use std::collections::HashMap;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Transaction};

use crate::attributes::{AttrValue, Attribute, ValueKind};
use crate::commands::helpers::{
    check_kind, require_records, select_in, writable_attribute, OptionalContext,
};
use crate::commands::WriteOutcome;
use crate::error::{EntityKind, Result, SpectraError, StoreContext};
use crate::model::{AttributeId, EavId, RecordId, TaxonomyId};
use crate::session::Session;

/// One stored value.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EavEntry {
    pub id: EavId,
    pub record_id: RecordId,
    pub attribute_id: AttributeId,
    pub value: AttrValue,
    pub unit: Option<String>,
}

/// The six value columns in [`ValueKind::ALL`] order, with `value` in its own column.
fn column_values(value: &AttrValue) -> Vec<Value> {
    ValueKind::ALL
        .iter()
        .map(|kind| {
            if *kind == value.kind() {
                value.to_sql_value()
            } else {
                Value::Null
            }
        })
        .collect()
}

/// Fetch every entry of `attribute` for `records`, ordered by record then entry id.
pub(crate) fn fetch_entries(
    conn: &rusqlite::Connection,
    attribute: &Attribute,
    records: &[RecordId],
) -> Result<Vec<EavEntry>> {
    let sql = format!(
        "SELECT eav_id, record_id, {}, unit FROM eav_value
         WHERE attribute_id = ? AND record_id IN ({{}})
         ORDER BY record_id, eav_id",
        attribute.kind.column()
    );
    let rows = select_in(
        conn,
        "get values",
        &sql,
        &[Value::Integer(attribute.id.0)],
        records,
        |row| {
            Ok((
                row.get::<_, EavId>(0)?,
                row.get::<_, RecordId>(1)?,
                row.get::<_, Value>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        },
    )?;

    let mut entries = Vec::with_capacity(rows.len());
    for (id, record_id, raw, unit) in rows {
        let value = AttrValue::from_stored(attribute.kind, raw)?.ok_or_else(|| {
            SpectraError::integrity(
                "get values",
                format!("entry {} has no {} value", id, attribute.kind),
            )
        })?;
        entries.push(EavEntry {
            id,
            record_id,
            attribute_id: attribute.id,
            value,
            unit,
        });
    }
    Ok(entries)
}

/// Group entries by record, keeping `records` order. Records without entries are
/// absent from the result.
fn in_record_order(records: &[RecordId], entries: Vec<EavEntry>) -> Vec<EavEntry> {
    let mut by_record: HashMap<RecordId, Vec<EavEntry>> = HashMap::new();
    for entry in entries {
        by_record.entry(entry.record_id).or_default().push(entry);
    }
    records
        .iter()
        .filter_map(|id| by_record.remove(id))
        .flatten()
        .collect()
}

/// Values of `attribute` for the given records.
///
/// Records that lack the attribute are simply absent. Multi-valued attributes yield
/// one entry per value.
pub fn get_values(
    session: &mut Session,
    records: &[RecordId],
    attribute: &str,
) -> Result<Vec<EavEntry>> {
    let registry = session.registry()?;
    let attribute = registry.resolve(attribute)?;
    let visibility = &session.visibility;
    session.db.read("get values", |conn| {
        let records = require_records(conn, visibility, records)?;
        let entries = fetch_entries(conn, attribute, &records)?;
        Ok(in_record_order(&records, entries))
    })
}

/// First value of `attribute` per record, aligned with `records`. `None` where unset.
pub fn first_values(
    session: &mut Session,
    records: &[RecordId],
    attribute: &str,
) -> Result<Vec<Option<AttrValue>>> {
    let registry = session.registry()?;
    let attribute = registry.resolve(attribute)?;
    let visibility = &session.visibility;
    session.db.read("get first values", |conn| {
        let unique = require_records(conn, visibility, records)?;
        let mut first: HashMap<RecordId, AttrValue> = HashMap::new();
        for entry in fetch_entries(conn, attribute, &unique)? {
            first.entry(entry.record_id).or_insert(entry.value);
        }
        Ok(records.iter().map(|id| first.get(id).cloned()).collect())
    })
}

/// Write `value` for `attribute` on every record. Returns one outcome per record, in
/// `records` order (duplicates in `records` are written once and share an outcome).
///
/// With `previous`, each record's entry holding `previous` is rewritten in place
/// ([`WriteOutcome::Updated`]). If that record already holds `value` as well, the old
/// entry is dropped instead and the outcome is [`WriteOutcome::AlreadyPresent`]. A
/// record with no entry matching `previous` gets a plain insert.
pub fn set_value(
    session: &mut Session,
    records: &[RecordId],
    attribute: &str,
    value: &AttrValue,
    previous: Option<&AttrValue>,
) -> Result<Vec<WriteOutcome>> {
    let registry = session.registry()?;
    let attribute = writable_attribute(&registry, attribute, value)?;
    if let Some(previous) = previous {
        check_kind(attribute, previous)?;
    }

    let key = value.value_key();
    let previous_key = previous.map(AttrValue::value_key);
    let columns = column_values(value);

    let visibility = &session.visibility;
    let memo = &session.memo;
    let progress = &mut session.progress;

    let outcomes = session.db.write("set value", |tx| {
        let unique = require_records(tx, visibility, records)?;
        if let AttrValue::Taxonomy(node) = value {
            check_taxonomy_node(tx, attribute, *node)?;
        }

        progress.begin(&format!("Writing {}", attribute.name));
        let total = unique.len();
        let mut outcomes = HashMap::with_capacity(total);
        for (done, record) in unique.iter().enumerate() {
            let outcome = match previous_key.as_deref() {
                Some(prev) if prev != key => {
                    replace_entry(tx, *record, attribute, prev, &key, &columns)?
                }
                _ => None,
            };
            let outcome = match outcome {
                Some(outcome) => outcome,
                None if memo.contains(*record, attribute.id, &key) => WriteOutcome::AlreadyPresent,
                None => insert_entry(tx, *record, attribute, &key, &columns)?,
            };
            outcomes.insert(*record, outcome);
            progress.step(done + 1, total);
        }
        Ok(outcomes)
    })?;

    for record in outcomes.keys() {
        if let Some(prev) = &previous_key {
            session.memo.forget(*record, attribute.id, prev);
        }
        session.memo.remember(*record, attribute.id, key.clone());
    }

    Ok(records
        .iter()
        .map(|id| outcomes.get(id).copied().unwrap_or(WriteOutcome::AlreadyPresent))
        .collect())
}

fn insert_entry(
    tx: &Transaction<'_>,
    record: RecordId,
    attribute: &Attribute,
    key: &str,
    columns: &[Value],
) -> Result<WriteOutcome> {
    let op = format!("insert value for record {}", record);
    let mut params: Vec<Value> = vec![Value::Integer(record.0), Value::Integer(attribute.id.0)];
    params.extend(columns.iter().cloned());
    params.push(match &attribute.default_unit {
        Some(unit) => Value::Text(unit.clone()),
        None => Value::Null,
    });
    params.push(Value::Text(key.to_string()));

    let inserted = tx
        .execute(
            "INSERT OR IGNORE INTO eav_value
                (record_id, attribute_id, text_val, int_val, real_val, datetime_val,
                 taxonomy_id, binary_val, unit, value_key)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params_from_iter(params),
        )
        .during(&op)?;

    Ok(if inserted == 0 {
        WriteOutcome::AlreadyPresent
    } else {
        WriteOutcome::Inserted(EavId(tx.last_insert_rowid()))
    })
}

/// Rewrite the entry holding `previous_key`. `None` when the record has no such entry.
fn replace_entry(
    tx: &Transaction<'_>,
    record: RecordId,
    attribute: &Attribute,
    previous_key: &str,
    key: &str,
    columns: &[Value],
) -> Result<Option<WriteOutcome>> {
    let op = format!("replace value for record {}", record);
    let find = |value_key: &str| -> Result<Option<EavId>> {
        tx.query_row(
            "SELECT eav_id FROM eav_value
             WHERE record_id = ? AND attribute_id = ? AND value_key = ?",
            params![record, attribute.id, value_key],
            |row| row.get(0),
        )
        .optional_during(&op)
    };

    let Some(old) = find(previous_key)? else {
        return Ok(None);
    };

    if find(key)?.is_some() {
        tx.execute("DELETE FROM eav_value WHERE eav_id = ?", [old])
            .during(&op)?;
        return Ok(Some(WriteOutcome::AlreadyPresent));
    }

    let mut params: Vec<Value> = columns.to_vec();
    params.push(Value::Text(key.to_string()));
    params.push(Value::Integer(old.0));
    tx.execute(
        "UPDATE eav_value
         SET text_val = ?, int_val = ?, real_val = ?, datetime_val = ?,
             taxonomy_id = ?, binary_val = ?, value_key = ?
         WHERE eav_id = ?",
        params_from_iter(params),
    )
    .during(&op)?;
    Ok(Some(WriteOutcome::Updated(old)))
}

/// A taxonomy value must name a node of the attribute's own vocabulary.
fn check_taxonomy_node(tx: &Transaction<'_>, attribute: &Attribute, node: TaxonomyId) -> Result<()> {
    let owner: Option<AttributeId> = tx
        .query_row(
            "SELECT attribute_id FROM taxonomy WHERE taxonomy_id = ?",
            [node],
            |row| row.get(0),
        )
        .optional_during("check taxonomy value")?;
    match owner {
        None => Err(SpectraError::not_found(EntityKind::TaxonomyNode, node)),
        Some(owner) if owner != attribute.id => Err(SpectraError::InvalidArgument(format!(
            "taxonomy node {} does not belong to attribute '{}'",
            node, attribute.name
        ))),
        Some(_) => Ok(()),
    }
}

/// Remove entries of `attribute` from every record, optionally only those equal to
/// `value`. Runs as one transaction, so no record is left half cleaned.
pub fn remove_values(
    session: &mut Session,
    records: &[RecordId],
    attribute: &str,
    value: Option<&AttrValue>,
) -> Result<usize> {
    let registry = session.registry()?;
    let attribute = registry.resolve(attribute)?;
    if let Some(value) = value {
        check_kind(attribute, value)?;
    }
    let key = value.map(AttrValue::value_key);

    let visibility = &session.visibility;
    let progress = &mut session.progress;
    let (removed, touched) = session.db.write("remove values", |tx| {
        let unique = require_records(tx, visibility, records)?;
        progress.begin(&format!("Removing {}", attribute.name));
        let total = unique.len();
        let mut removed = 0;
        for (done, record) in unique.iter().enumerate() {
            let op = format!("remove values for record {}", record);
            removed += match &key {
                Some(key) => tx.execute(
                    "DELETE FROM eav_value
                     WHERE record_id = ? AND attribute_id = ? AND value_key = ?",
                    params![record, attribute.id, key],
                ),
                None => tx.execute(
                    "DELETE FROM eav_value WHERE record_id = ? AND attribute_id = ?",
                    params![record, attribute.id],
                ),
            }
            .during(&op)?;
            progress.step(done + 1, total);
        }
        Ok((removed, unique))
    })?;

    for record in touched {
        match &key {
            Some(key) => session.memo.forget(record, attribute.id, key),
            None => session.memo.forget_attribute(record, attribute.id),
        }
    }
    Ok(removed)
}

/// Remove entries by id. Every id must exist and belong to a visible record.
pub fn remove_entries(session: &mut Session, entries: &[EavId]) -> Result<usize> {
    let visibility = &session.visibility;
    let (removed, records) = session.db.write("remove entries", |tx| {
        let owners = select_in(
            tx,
            "remove entries",
            "SELECT eav_id, record_id FROM eav_value WHERE eav_id IN ({})",
            &[],
            entries,
            |row| Ok((row.get::<_, EavId>(0)?, row.get::<_, RecordId>(1)?)),
        )?;
        let owners: HashMap<EavId, RecordId> = owners.into_iter().collect();
        if let Some(missing) = entries.iter().find(|id| !owners.contains_key(id)) {
            return Err(SpectraError::not_found(EntityKind::EavEntry, missing));
        }
        let records: Vec<RecordId> = owners.values().copied().collect();
        require_records(tx, visibility, &records)?;
        let removed = crate::commands::helpers::execute_in(
            tx,
            "remove entries",
            "DELETE FROM eav_value WHERE eav_id IN ({})",
            entries,
        )?;
        Ok((removed, records))
    })?;
    session.memo.forget_records(&records);
    Ok(removed)
}

/// Number of stored entries of `attribute` across `records`.
///
/// Bulk ingestion uses this to decide between inserting and updating.
pub fn count_existing(
    session: &mut Session,
    attribute: AttributeId,
    records: &[RecordId],
) -> Result<u64> {
    let registry = session.registry()?;
    registry.resolve_id(attribute)?;
    let visibility = &session.visibility;
    session.db.read("count existing values", |conn| {
        let records = require_records(conn, visibility, records)?;
        let counts = select_in(
            conn,
            "count existing values",
            "SELECT COUNT(*) FROM eav_value WHERE attribute_id = ? AND record_id IN ({})",
            &[Value::Integer(attribute.0)],
            &records,
            |row| row.get::<_, i64>(0),
        )?;
        Ok(counts.into_iter().sum::<i64>() as u64)
    })
}

/// The records (in input order) that do, or do not, hold any value for `attribute`.
pub fn filter_by_presence(
    session: &mut Session,
    records: &[RecordId],
    attribute: &str,
    present: bool,
) -> Result<Vec<RecordId>> {
    let registry = session.registry()?;
    let attribute = registry.resolve(attribute)?;
    let visibility = &session.visibility;
    session.db.read("filter by presence", |conn| {
        let records = require_records(conn, visibility, records)?;
        let holders = holders(conn, attribute, &records, None)?;
        Ok(records
            .into_iter()
            .filter(|id| holders.contains(id) == present)
            .collect())
    })
}

/// The records (in input order) holding `value` for `attribute`.
pub fn filter_by_value(
    session: &mut Session,
    records: &[RecordId],
    attribute: &str,
    value: &AttrValue,
) -> Result<Vec<RecordId>> {
    let registry = session.registry()?;
    let attribute = writable_attribute(&registry, attribute, value)?;
    let key = value.value_key();
    let visibility = &session.visibility;
    session.db.read("filter by value", |conn| {
        let records = require_records(conn, visibility, records)?;
        let holders = holders(conn, attribute, &records, Some(&key))?;
        Ok(records
            .into_iter()
            .filter(|id| holders.contains(id))
            .collect())
    })
}

fn holders(
    conn: &rusqlite::Connection,
    attribute: &Attribute,
    records: &[RecordId],
    key: Option<&str>,
) -> Result<std::collections::HashSet<RecordId>> {
    let mut leading = vec![Value::Integer(attribute.id.0)];
    let sql = match key {
        Some(key) => {
            leading.push(Value::Text(key.to_string()));
            "SELECT DISTINCT record_id FROM eav_value
             WHERE attribute_id = ? AND value_key = ? AND record_id IN ({})"
        }
        None => {
            "SELECT DISTINCT record_id FROM eav_value
             WHERE attribute_id = ? AND record_id IN ({})"
        }
    };
    let ids = select_in(conn, "find value holders", sql, &leading, records, |row| {
        row.get::<_, RecordId>(0)
    })?;
    Ok(ids.into_iter().collect())
}
