//! Grouping records by attribute values.
//!
//! Records are bucketed by the combination of their first value for each named
//! attribute. "Unset" counts as a value here, so records lacking an attribute share a
//! bucket. Buckets appear in the order their first record appears in the input.

use std::collections::HashMap;

use serde::Serialize;

use crate::attributes::AttrValue;
use crate::commands::eav::first_values;
use crate::commands::helpers::unique;
use crate::error::Result;
use crate::model::RecordId;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortGroup {
    /// One entry per requested attribute, `None` where unset.
    pub values: Vec<Option<AttrValue>>,
    pub records: Vec<RecordId>,
}

pub fn sort_by_attributes(
    session: &mut Session,
    records: &[RecordId],
    attributes: &[&str],
) -> Result<Vec<SortGroup>> {
    let records = unique(records);
    let mut columns = Vec::with_capacity(attributes.len());
    for name in attributes {
        columns.push(first_values(session, &records, name)?);
    }

    let mut groups: Vec<SortGroup> = Vec::new();
    let mut index: HashMap<Vec<Option<String>>, usize> = HashMap::new();
    for (row, record) in records.iter().enumerate() {
        let values: Vec<Option<AttrValue>> = columns.iter().map(|c| c[row].clone()).collect();
        let key = values
            .iter()
            .map(|v| v.as_ref().map(AttrValue::value_key))
            .collect();
        match index.get(&key) {
            Some(&group) => groups[group].records.push(*record),
            None => {
                index.insert(key, groups.len());
                groups.push(SortGroup {
                    values,
                    records: vec![*record],
                });
            }
        }
    }
    Ok(groups)
}
