//! # Conflict Detection
//!
//! Compares the values of a set of fields across a set of records. For each field the
//! present values are grouped by [`AttrValue::value_key`]:
//!
//! - one distinct value: [`Agreement::Agreed`], however many records lack the field
//! - two or more: [`Agreement::Conflict`] with the distinct values in first-seen order
//! - none at all: [`Agreement::Unset`]
//!
//! "Unset" is never a value of its own. Records lacking a field are listed separately
//! in [`FieldConflict::missing`]. A multi-valued attribute contributes every value it
//! holds, so one record with two different values is already a conflict.

use std::collections::{HashMap, HashSet};

use rusqlite::Connection;
use serde::Serialize;

use crate::attributes::{AttrValue, Attribute};
use crate::commands::eav::fetch_entries;
use crate::commands::helpers::{record_from_row, require_records, select_in, RECORD_COLUMNS};
use crate::error::Result;
use crate::model::{AttributeId, Record, RecordId};
use crate::query::{Field, StructuralField};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "values", rename_all = "snake_case")]
pub enum Agreement {
    Agreed(AttrValue),
    Conflict(Vec<AttrValue>),
    Unset,
}

impl Agreement {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Agreement::Conflict(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldConflict {
    pub field: String,
    pub status: Agreement,
    /// Records that hold no value for the field.
    pub missing: Vec<RecordId>,
}

/// Per-field agreement, in the order the fields were requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConflictTable {
    pub fields: Vec<FieldConflict>,
}

impl ConflictTable {
    pub fn get(&self, field: &str) -> Option<&FieldConflict> {
        self.fields.iter().find(|f| f.field == field)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldConflict> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn has_conflicts(&self) -> bool {
        self.fields.iter().any(|f| f.status.is_conflict())
    }
}

enum Source<'r> {
    Column(StructuralField),
    Attribute(&'r Attribute),
}

fn classify(
    field: &str,
    records: &[RecordId],
    values: &[(RecordId, AttrValue)],
) -> FieldConflict {
    let mut distinct: Vec<AttrValue> = Vec::new();
    let mut keys: HashSet<String> = HashSet::new();
    let mut holders: HashSet<RecordId> = HashSet::with_capacity(values.len());
    for (holder, value) in values {
        holders.insert(*holder);
        if keys.insert(value.value_key()) {
            distinct.push(value.clone());
        }
    }
    let missing = records
        .iter()
        .copied()
        .filter(|id| !holders.contains(id))
        .collect();
    let status = match distinct.len() {
        0 => Agreement::Unset,
        1 => Agreement::Agreed(distinct.remove(0)),
        _ => Agreement::Conflict(distinct),
    };
    FieldConflict {
        field: field.to_string(),
        status,
        missing,
    }
}

fn structural_value(record: &Record, field: StructuralField) -> Option<AttrValue> {
    match field {
        StructuralField::RecordId => Some(AttrValue::integer(record.id.0)),
        StructuralField::NodeId => Some(AttrValue::integer(record.node_id.0)),
        StructuralField::CampaignId => Some(AttrValue::integer(record.campaign_id.0)),
        StructuralField::OwnerId => record.owner_id.map(AttrValue::integer),
        StructuralField::CalibrationId => record.calibration_id.map(AttrValue::integer),
        StructuralField::MeasurementRef => record.measurement_ref.clone().map(AttrValue::Text),
        StructuralField::CreatedAt => Some(AttrValue::datetime(record.created_at)),
    }
}

fn load_records(conn: &Connection, ids: &[RecordId]) -> Result<HashMap<RecordId, Record>> {
    let rows = select_in(
        conn,
        "load records",
        &format!("SELECT {} FROM record WHERE record_id IN ({{}})", RECORD_COLUMNS),
        &[],
        ids,
        record_from_row,
    )?;
    Ok(rows.into_iter().map(|r| (r.id, r)).collect())
}

fn attribute_values(
    conn: &Connection,
    attribute: &Attribute,
    records: &[RecordId],
) -> Result<Vec<(RecordId, AttrValue)>> {
    Ok(fetch_entries(conn, attribute, records)?
        .into_iter()
        .map(|e| (e.record_id, e.value))
        .collect())
}

/// Compare `fields` (structural column names or attribute names) across `records`.
pub fn detect_conflicts(
    session: &mut Session,
    records: &[RecordId],
    fields: &[&str],
) -> Result<ConflictTable> {
    let registry = session.registry()?;
    let sources = fields
        .iter()
        .map(|name| match Field::parse(name) {
            Field::Structural(field) => Ok((*name, Source::Column(field))),
            Field::Attribute(attr) => Ok((*name, Source::Attribute(registry.resolve(&attr)?))),
        })
        .collect::<Result<Vec<_>>>()?;

    let visibility = &session.visibility;
    session.db.read("detect conflicts", |conn| {
        let records = require_records(conn, visibility, records)?;
        let mut loaded: Option<HashMap<RecordId, Record>> = None;
        let mut table = ConflictTable::default();
        for (name, source) in sources {
            let values: Vec<(RecordId, AttrValue)> = match source {
                Source::Column(field) => {
                    if loaded.is_none() {
                        loaded = Some(load_records(conn, &records)?);
                    }
                    loaded
                        .iter()
                        .flat_map(|m| records.iter().filter_map(|id| m.get(id)))
                        .filter_map(|r| structural_value(r, field).map(|v| (r.id, v)))
                        .collect()
                }
                Source::Attribute(attribute) => attribute_values(conn, attribute, &records)?,
            };
            table.fields.push(classify(name, &records, &values));
        }
        Ok(table)
    })
}

/// Compare every attribute any of `records` carries, in attribute id order.
pub fn detect_all_conflicts(
    session: &mut Session,
    records: &[RecordId],
) -> Result<ConflictTable> {
    let registry = session.registry()?;
    let visibility = &session.visibility;
    session.db.read("detect conflicts", |conn| {
        let records = require_records(conn, visibility, records)?;
        let mut carried = select_in(
            conn,
            "detect conflicts",
            "SELECT DISTINCT attribute_id FROM eav_value WHERE record_id IN ({})",
            &[],
            &records,
            |row| row.get::<_, AttributeId>(0),
        )?;
        carried.sort();
        carried.dedup();

        let mut table = ConflictTable::default();
        for id in carried {
            let attribute = registry.resolve_id(id)?;
            let values = attribute_values(conn, attribute, &records)?;
            table
                .fields
                .push(classify(&attribute.name, &records, &values));
        }
        Ok(table)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{eav, records as record_cmds};
    use crate::error::SpectraError;
    use crate::test_utils::TestEnv;

    fn height(env: &mut TestEnv, record: RecordId, value: i64) {
        eav::set_value(
            &mut env.session,
            &[record],
            "height",
            &AttrValue::integer(value),
            None,
        )
        .unwrap();
    }

    #[test]
    fn unset_records_do_not_break_agreement() {
        let mut env = TestEnv::new();
        let (r1, r2, r3) = (env.record(), env.record(), env.record());
        height(&mut env, r1, 10);
        height(&mut env, r2, 10);

        let table = detect_conflicts(&mut env.session, &[r1, r2, r3], &["height"]).unwrap();
        let field = table.get("height").unwrap();
        assert_eq!(field.status, Agreement::Agreed(AttrValue::integer(10)));
        assert_eq!(field.missing, vec![r3]);
        assert!(!table.has_conflicts());
    }

    #[test]
    fn distinct_values_conflict() {
        let mut env = TestEnv::new();
        let (r1, r2) = (env.record(), env.record());
        height(&mut env, r1, 10);
        height(&mut env, r2, 20);

        let table = detect_conflicts(&mut env.session, &[r1, r2], &["height"]).unwrap();
        assert_eq!(
            table.get("height").unwrap().status,
            Agreement::Conflict(vec![AttrValue::integer(10), AttrValue::integer(20)])
        );
        assert!(table.has_conflicts());
    }

    #[test]
    fn field_order_follows_request_and_mixes_structural() {
        let mut env = TestEnv::new();
        let (r1, r2) = (env.record(), env.record());
        record_cmds::update_records_field(
            &mut env.session,
            &[r1],
            record_cmds::RecordUpdate::Owner(Some(4)),
        )
        .unwrap();

        let table =
            detect_conflicts(&mut env.session, &[r1, r2], &["species", "node_id", "owner_id"])
                .unwrap();
        let names: Vec<_> = table.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(names, vec!["species", "node_id", "owner_id"]);

        assert_eq!(table.get("species").unwrap().status, Agreement::Unset);
        assert_eq!(
            table.get("node_id").unwrap().status,
            Agreement::Agreed(AttrValue::integer(env.node.0))
        );
        let owner = table.get("owner_id").unwrap();
        assert_eq!(owner.status, Agreement::Agreed(AttrValue::integer(4)));
        assert_eq!(owner.missing, vec![r2]);
    }

    #[test]
    fn all_attributes_variant_uses_attribute_order() {
        let mut env = TestEnv::new();
        let (r1, r2) = (env.record(), env.record());
        height(&mut env, r1, 10);
        height(&mut env, r2, 11);
        eav::set_value(
            &mut env.session,
            &[r1, r2],
            "species",
            &AttrValue::text("oak"),
            None,
        )
        .unwrap();

        let table = detect_all_conflicts(&mut env.session, &[r1, r2]).unwrap();
        let names: Vec<_> = table.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(names, vec!["species", "height"]);
        assert!(table.get("height").unwrap().status.is_conflict());
        assert!(!table.get("species").unwrap().status.is_conflict());
    }

    #[test]
    fn classify_scales_to_import_sized_selections() {
        let records: Vec<RecordId> = (1..=20_000).map(RecordId).collect();
        let values: Vec<(RecordId, AttrValue)> = records
            .iter()
            .filter(|r| r.0 % 2 == 0)
            .map(|r| (*r, AttrValue::integer(r.0 % 3)))
            .collect();

        let field = classify("height", &records, &values);
        assert_eq!(field.missing.len(), 10_000);
        assert_eq!(field.missing[..2], [RecordId(1), RecordId(3)]);
        assert_eq!(
            field.status,
            Agreement::Conflict(vec![
                AttrValue::integer(2),
                AttrValue::integer(1),
                AttrValue::integer(0)
            ])
        );
    }

    #[test]
    fn unknown_field_is_not_found() {
        let mut env = TestEnv::new();
        let r = env.record();
        assert!(matches!(
            detect_conflicts(&mut env.session, &[r], &["colour"]),
            Err(SpectraError::NotFound { .. })
        ));
    }
}
