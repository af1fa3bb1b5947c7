//! Taxonomy resolver.
//!
//! Taxonomy attributes take their values from a controlled-vocabulary tree stored per
//! attribute. Sibling names are unique within a parent. Reads are the main path;
//! [`insert_node`] exists for seeding vocabularies.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, Row};

use crate::attributes::{Attribute, ValueKind};
use crate::commands::helpers::OptionalContext;
use crate::error::{EntityKind, Result, SpectraError, StoreContext};
use crate::model::{TaxonomyId, TaxonomyNode};
use crate::session::Session;

const TAXONOMY_COLUMNS: &str = "taxonomy_id, attribute_id, parent_id, name, code, description";

fn taxonomy_from_row(row: &Row<'_>) -> rusqlite::Result<TaxonomyNode> {
    Ok(TaxonomyNode {
        id: row.get(0)?,
        attribute_id: row.get(1)?,
        parent_id: row.get(2)?,
        name: row.get(3)?,
        code: row.get(4)?,
        description: row.get(5)?,
    })
}

fn taxonomy_attribute(session: &mut Session, name: &str) -> Result<Attribute> {
    let registry = session.registry()?;
    let attribute = registry.resolve(name)?;
    if attribute.kind != ValueKind::Taxonomy {
        return Err(SpectraError::InvalidArgument(format!(
            "attribute '{}' holds {} values, not taxonomy nodes",
            name, attribute.kind
        )));
    }
    Ok(attribute.clone())
}

fn load_node(conn: &Connection, id: TaxonomyId) -> Result<TaxonomyNode> {
    conn.query_row(
        &format!("SELECT {} FROM taxonomy WHERE taxonomy_id = ?", TAXONOMY_COLUMNS),
        [id],
        taxonomy_from_row,
    )
    .optional_during("get taxonomy node")?
    .ok_or_else(|| SpectraError::not_found(EntityKind::TaxonomyNode, id))
}

fn list_nodes(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<TaxonomyNode>> {
    let mut stmt = conn.prepare(sql).during("list taxonomy nodes")?;
    let nodes = stmt
        .query_map(params, taxonomy_from_row)
        .during("list taxonomy nodes")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .during("list taxonomy nodes")?;
    Ok(nodes)
}

/// Add `name` under `parent` in `attribute`'s vocabulary, or return the existing
/// node of that name.
pub fn insert_node(
    session: &mut Session,
    attribute: &str,
    parent: Option<TaxonomyId>,
    name: &str,
    code: Option<&str>,
) -> Result<TaxonomyId> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SpectraError::InvalidArgument(
            "taxonomy node name cannot be empty".into(),
        ));
    }
    let attribute = taxonomy_attribute(session, attribute)?;
    session.db.write("insert taxonomy node", |tx| {
        if let Some(parent) = parent {
            let parent = load_node(tx, parent)?;
            if parent.attribute_id != attribute.id {
                return Err(SpectraError::InvalidArgument(format!(
                    "taxonomy node {} belongs to another attribute than '{}'",
                    parent.id, attribute.name
                )));
            }
        }
        tx.execute(
            "INSERT OR IGNORE INTO taxonomy (attribute_id, parent_id, name, code)
             VALUES (?, ?, ?, ?)",
            params![attribute.id, parent, name, code],
        )
        .during("insert taxonomy node")?;
        tx.query_row(
            "SELECT taxonomy_id FROM taxonomy
             WHERE attribute_id = ? AND IFNULL(parent_id, 0) = IFNULL(?, 0) AND name = ?",
            params![attribute.id, parent, name],
            |row| row.get(0),
        )
        .during("insert taxonomy node")
    })
}

pub fn node(session: &Session, id: TaxonomyId) -> Result<TaxonomyNode> {
    session
        .db
        .read("get taxonomy node", |conn| load_node(conn, id))
}

/// Top-level nodes of `attribute`'s vocabulary, by name.
pub fn roots(session: &mut Session, attribute: &str) -> Result<Vec<TaxonomyNode>> {
    let attribute = taxonomy_attribute(session, attribute)?;
    session.db.read("list taxonomy roots", |conn| {
        list_nodes(
            conn,
            &format!(
                "SELECT {} FROM taxonomy WHERE attribute_id = ? AND parent_id IS NULL
                 ORDER BY name",
                TAXONOMY_COLUMNS
            ),
            [attribute.id],
        )
    })
}

pub fn children(session: &Session, id: TaxonomyId) -> Result<Vec<TaxonomyNode>> {
    session.db.read("list taxonomy children", |conn| {
        load_node(conn, id)?;
        list_nodes(
            conn,
            &format!(
                "SELECT {} FROM taxonomy WHERE parent_id = ? ORDER BY name",
                TAXONOMY_COLUMNS
            ),
            [id],
        )
    })
}

/// Look a node up by name anywhere in `attribute`'s vocabulary. When the name is used
/// under several parents, the oldest node wins.
pub fn id_by_name(session: &mut Session, attribute: &str, name: &str) -> Result<TaxonomyId> {
    let attribute = taxonomy_attribute(session, attribute)?;
    session.db.read("find taxonomy node", |conn| {
        conn.query_row(
            "SELECT taxonomy_id FROM taxonomy WHERE attribute_id = ? AND name = ?
             ORDER BY taxonomy_id LIMIT 1",
            params![attribute.id, name],
            |row| row.get(0),
        )
        .optional_during("find taxonomy node")?
        .ok_or_else(|| {
            SpectraError::not_found(
                EntityKind::TaxonomyNode,
                format!("{}:{}", attribute.name, name),
            )
        })
    })
}

/// Id to name for every node of `attribute`'s vocabulary.
pub fn name_map(session: &mut Session, attribute: &str) -> Result<BTreeMap<TaxonomyId, String>> {
    let attribute = taxonomy_attribute(session, attribute)?;
    session.db.read("map taxonomy names", |conn| {
        let mut stmt = conn
            .prepare("SELECT taxonomy_id, name FROM taxonomy WHERE attribute_id = ?")
            .during("map taxonomy names")?;
        let map = stmt
            .query_map([attribute.id], |row| {
                Ok((row.get::<_, TaxonomyId>(0)?, row.get::<_, String>(1)?))
            })
            .during("map taxonomy names")?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()
            .during("map taxonomy names")?;
        Ok(map)
    })
}

/// The chain of nodes from the vocabulary root down to `id`.
pub fn path(session: &Session, id: TaxonomyId) -> Result<Vec<TaxonomyNode>> {
    session.db.read("get taxonomy path", |conn| {
        let mut chain = vec![load_node(conn, id)?];
        while let Some(parent) = chain.last().and_then(|n| n.parent_id) {
            if chain.iter().any(|n| n.id == parent) {
                return Err(SpectraError::integrity(
                    "get taxonomy path",
                    format!("taxonomy node {} is its own ancestor", parent),
                ));
            }
            chain.push(load_node(conn, parent)?);
        }
        chain.reverse();
        Ok(chain)
    })
}
