//! Attribute and category definitions.
//!
//! Definitions are written straight to the store and the session's registry is
//! invalidated afterwards, so the next lookup sees them. Attributes are immutable:
//! defining an existing name again with the same kind returns the stored definition,
//! with a different kind it is an integrity violation.

use rusqlite::{params, Transaction};
use tracing::info;

use crate::attributes::{Attribute, AttributeSpec, Category};
use crate::commands::helpers::OptionalContext;
use crate::error::{EntityKind, Result, SpectraError, StoreContext};
use crate::model::{AttributeId, CategoryId};
use crate::session::Session;

pub fn define_category(session: &mut Session, name: &str) -> Result<Category> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SpectraError::InvalidArgument(
            "category name cannot be empty".into(),
        ));
    }
    let id = session
        .db
        .write("define category", |tx| ensure_category(tx, name))?;
    session.invalidate_registry();
    Ok(Category {
        id,
        name: name.to_string(),
    })
}

fn ensure_category(tx: &Transaction<'_>, name: &str) -> Result<CategoryId> {
    tx.execute("INSERT OR IGNORE INTO category (name) VALUES (?)", [name])
        .during("define category")?;
    tx.query_row(
        "SELECT category_id FROM category WHERE name = ?",
        [name],
        |row| row.get(0),
    )
    .during("define category")
}

pub fn define_attribute(session: &mut Session, spec: &AttributeSpec) -> Result<Attribute> {
    let name = spec.name.trim();
    if name.is_empty() {
        return Err(SpectraError::InvalidArgument(
            "attribute name cannot be empty".into(),
        ));
    }

    let attribute = session.db.write("define attribute", |tx| {
        let existing: Option<(AttributeId, String)> = tx
            .query_row(
                "SELECT attribute_id, kind FROM attribute WHERE name = ?",
                [name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional_during("define attribute")?;

        if let Some((id, kind)) = existing {
            if kind != spec.kind.as_str() {
                return Err(SpectraError::integrity(
                    "define attribute",
                    format!(
                        "attribute '{}' already exists with kind {}, cannot redefine as {}",
                        name, kind, spec.kind
                    ),
                ));
            }
            return Ok(id);
        }

        let category_id = match spec.category.as_deref().map(str::trim) {
            Some(category) if !category.is_empty() => Some(ensure_category(tx, category)?),
            _ => None,
        };
        tx.execute(
            "INSERT INTO attribute (name, kind, category_id, default_unit, description)
             VALUES (?, ?, ?, ?, ?)",
            params![
                name,
                spec.kind.as_str(),
                category_id,
                spec.default_unit,
                spec.description
            ],
        )
        .during("define attribute")?;
        let id = AttributeId(tx.last_insert_rowid());
        info!(attribute = name, kind = %spec.kind, id = %id, "attribute defined");
        Ok(id)
    })?;

    session.invalidate_registry();
    let registry = session.registry()?;
    registry.resolve_id(attribute).cloned()
}

/// Every attribute, in id order.
pub fn list(session: &mut Session) -> Result<Vec<Attribute>> {
    Ok(session.registry()?.attributes().cloned().collect())
}

pub fn resolve(session: &mut Session, name: &str) -> Result<Attribute> {
    session.registry()?.resolve(name).cloned()
}

pub fn resolve_id(session: &mut Session, id: AttributeId) -> Result<Attribute> {
    session.registry()?.resolve_id(id).cloned()
}

pub fn categories(session: &mut Session) -> Result<Vec<Category>> {
    Ok(session.registry()?.categories().cloned().collect())
}

pub fn in_category(session: &mut Session, category: &str) -> Result<Vec<Attribute>> {
    Ok(session
        .registry()?
        .in_category(category)?
        .into_iter()
        .cloned()
        .collect())
}

/// The unit an attribute's values are assumed to be in when none is given.
pub fn default_unit(session: &mut Session, name: &str) -> Result<Option<String>> {
    let registry = session.registry()?;
    let attribute = registry
        .resolve(name)
        .map_err(|_| SpectraError::not_found(EntityKind::Attribute, name))?;
    Ok(attribute.default_unit.clone())
}
