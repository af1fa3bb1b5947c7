use std::collections::{HashMap, HashSet};

use rusqlite::types::{Type, Value};
use rusqlite::{params_from_iter, Connection, Row};

use crate::attributes::{AttrValue, Attribute, AttributeRegistry};
use crate::error::{EntityKind, Result, SpectraError, StoreContext};
use crate::model::{parse_timestamp, CampaignId, HierarchyNode, NodeId, Record, RecordId};
use crate::session::Visibility;
use crate::store::{placeholders, MAX_BIND};

pub(crate) const RECORD_COLUMNS: &str =
    "record_id, node_id, campaign_id, owner_id, measurement_ref, calibration_id, created_at";

pub(crate) const NODE_COLUMNS: &str = "node_id, campaign_id, parent_id, name";

pub(crate) fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    let raw: String = row.get(6)?;
    let created_at = parse_timestamp(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            Type::Text,
            format!("malformed timestamp '{}'", raw).into(),
        )
    })?;
    Ok(Record {
        id: row.get(0)?,
        node_id: row.get(1)?,
        campaign_id: row.get(2)?,
        owner_id: row.get(3)?,
        measurement_ref: row.get(4)?,
        calibration_id: row.get(5)?,
        created_at,
    })
}

pub(crate) fn node_from_row(row: &Row<'_>) -> rusqlite::Result<HierarchyNode> {
    Ok(HierarchyNode {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        parent_id: row.get(2)?,
        name: row.get(3)?,
    })
}

/// Order-preserving dedup.
pub(crate) fn unique<T: Copy + Eq + std::hash::Hash>(items: &[T]) -> Vec<T> {
    let mut seen = HashSet::with_capacity(items.len());
    items.iter().copied().filter(|item| seen.insert(*item)).collect()
}

/// Run `SELECT ... WHERE col IN (...)` over `ids` in chunks, collecting the mapped rows.
///
/// `sql` must contain a single `{}` where the placeholder list goes; `leading` values
/// are bound before the ids.
pub(crate) fn select_in<I, T, F>(
    conn: &Connection,
    op: &str,
    sql: &str,
    leading: &[Value],
    ids: &[I],
    mut map: F,
) -> Result<Vec<T>>
where
    I: rusqlite::ToSql,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut out = Vec::new();
    for chunk in ids.chunks(MAX_BIND) {
        let statement = sql.replacen("{}", &placeholders(chunk.len()), 1);
        let mut stmt = conn.prepare(&statement).during(op)?;
        let params = leading
            .iter()
            .map(|v| v as &dyn rusqlite::ToSql)
            .chain(chunk.iter().map(|id| id as &dyn rusqlite::ToSql));
        let rows = stmt.query_map(params_from_iter(params), &mut map).during(op)?;
        for row in rows {
            out.push(row.during(op)?);
        }
    }
    Ok(out)
}

/// Run a statement over `ids` in chunks and return the total number of changed rows.
pub(crate) fn execute_in<I: rusqlite::ToSql>(
    conn: &Connection,
    op: &str,
    sql: &str,
    ids: &[I],
) -> Result<usize> {
    let mut changed = 0;
    for chunk in ids.chunks(MAX_BIND) {
        let statement = sql.replacen("{}", &placeholders(chunk.len()), 1);
        changed += conn
            .execute(&statement, params_from_iter(chunk.iter()))
            .during(op)?;
    }
    Ok(changed)
}

/// Campaign of each existing record.
pub(crate) fn record_campaigns(
    conn: &Connection,
    ids: &[RecordId],
) -> Result<HashMap<RecordId, CampaignId>> {
    let rows = select_in(
        conn,
        "look up records",
        "SELECT record_id, campaign_id FROM record WHERE record_id IN ({})",
        &[],
        ids,
        |row| Ok((row.get::<_, RecordId>(0)?, row.get::<_, CampaignId>(1)?)),
    )?;
    Ok(rows.into_iter().collect())
}

/// Dedup `ids` and check each one exists and is visible. Invisible records are
/// reported as not found, same as missing ones.
pub(crate) fn require_records(
    conn: &Connection,
    visibility: &Visibility,
    ids: &[RecordId],
) -> Result<Vec<RecordId>> {
    let ids = unique(ids);
    let campaigns = record_campaigns(conn, &ids)?;
    for id in &ids {
        match campaigns.get(id) {
            Some(campaign) if visibility.allows(*campaign) => {}
            _ => return Err(SpectraError::not_found(EntityKind::Record, id)),
        }
    }
    Ok(ids)
}

pub(crate) fn require_record(
    conn: &Connection,
    visibility: &Visibility,
    id: RecordId,
) -> Result<Record> {
    let record = conn
        .query_row(
            &format!("SELECT {} FROM record WHERE record_id = ?", RECORD_COLUMNS),
            [id],
            record_from_row,
        )
        .optional_during("get record")?;
    match record {
        Some(record) if visibility.allows(record.campaign_id) => Ok(record),
        _ => Err(SpectraError::not_found(EntityKind::Record, id)),
    }
}

pub(crate) fn require_node(
    conn: &Connection,
    visibility: &Visibility,
    id: NodeId,
) -> Result<HierarchyNode> {
    let node = conn
        .query_row(
            &format!("SELECT {} FROM hierarchy_node WHERE node_id = ?", NODE_COLUMNS),
            [id],
            node_from_row,
        )
        .optional_during("get hierarchy node")?;
    match node {
        Some(node) if visibility.allows(node.campaign_id) => Ok(node),
        _ => Err(SpectraError::not_found(EntityKind::HierarchyNode, id)),
    }
}

pub(crate) fn require_campaign(
    conn: &Connection,
    visibility: &Visibility,
    id: CampaignId,
) -> Result<()> {
    let exists = conn
        .query_row("SELECT 1 FROM campaign WHERE campaign_id = ?", [id], |_| Ok(()))
        .optional_during("get campaign")?
        .is_some();
    if exists && visibility.allows(id) {
        Ok(())
    } else {
        Err(SpectraError::not_found(EntityKind::Campaign, id))
    }
}

/// Resolve an attribute for writing `value`. Values are never coerced across kinds.
pub(crate) fn writable_attribute<'r>(
    registry: &'r AttributeRegistry,
    name: &str,
    value: &AttrValue,
) -> Result<&'r Attribute> {
    let attribute = registry.resolve(name)?;
    check_kind(attribute, value)?;
    Ok(attribute)
}

pub(crate) fn check_kind(attribute: &Attribute, value: &AttrValue) -> Result<()> {
    if value.kind() == attribute.kind {
        value.ensure_storable()
    } else {
        Err(SpectraError::TypeMismatch {
            attribute: attribute.name.clone(),
            expected: attribute.kind.to_string(),
            found: value.kind().to_string(),
        })
    }
}

/// Every node under `root`, including it, in pre-order (each node before its
/// descendants). Iterative so deep trees cannot exhaust the stack.
pub(crate) fn subtree(conn: &Connection, root: NodeId) -> Result<Vec<NodeId>> {
    let mut stmt = conn
        .prepare("SELECT node_id FROM hierarchy_node WHERE parent_id = ? ORDER BY node_id DESC")
        .during("walk hierarchy")?;
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if !seen.insert(node) {
            return Err(SpectraError::integrity(
                "walk hierarchy",
                format!("node {} is reachable twice", node),
            ));
        }
        order.push(node);
        let children = stmt
            .query_map([node], |row| row.get::<_, NodeId>(0))
            .during("walk hierarchy")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .during("walk hierarchy")?;
        stack.extend(children);
    }
    Ok(order)
}

/// `Option`-returning variant of [`StoreContext::during`] for single-row lookups.
pub(crate) trait OptionalContext<T> {
    fn optional_during(self, op: &str) -> Result<Option<T>>;
}

impl<T> OptionalContext<T> for rusqlite::Result<T> {
    fn optional_during(self, op: &str) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SpectraError::from_store(op, e)),
        }
    }
}
