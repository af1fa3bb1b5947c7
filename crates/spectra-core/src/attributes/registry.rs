//! The attribute registry.
//!
//! A read-mostly snapshot of every attribute definition, indexed both by id and by
//! name. Sessions build it lazily on first use and keep it until explicitly
//! invalidated, so it is not kept consistent with definitions added by other sessions.

use super::{Attribute, Category, ValueKind};
use crate::error::{EntityKind, Result, SpectraError, StoreContext};
use crate::model::{AttributeId, CategoryId};
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct AttributeRegistry {
    by_id: BTreeMap<AttributeId, Attribute>,
    by_name: HashMap<String, AttributeId>,
    categories: BTreeMap<CategoryId, Category>,
}

impl AttributeRegistry {
    /// Build the registry from the store.
    pub fn load(conn: &Connection) -> Result<Self> {
        let op = "load attribute registry";

        let mut stmt = conn
            .prepare("SELECT category_id, name FROM category ORDER BY category_id")
            .during(op)?;
        let categories = stmt
            .query_map([], |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .during(op)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .during(op)?;

        let mut stmt = conn
            .prepare(
                "SELECT a.attribute_id, a.name, a.kind, a.category_id, c.name,
                        a.default_unit, a.description
                 FROM attribute a
                 LEFT JOIN category c ON c.category_id = a.category_id
                 ORDER BY a.attribute_id",
            )
            .during(op)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, AttributeId>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<CategoryId>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })
            .during(op)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .during(op)?;

        let mut attributes = Vec::with_capacity(rows.len());
        for (id, name, kind, category_id, category, default_unit, description) in rows {
            let kind: ValueKind = kind
                .parse()
                .map_err(|e: String| SpectraError::integrity(op, e))?;
            attributes.push(Attribute {
                id,
                name,
                kind,
                category_id,
                category,
                default_unit,
                description,
            });
        }

        debug!(
            attributes = attributes.len(),
            categories = categories.len(),
            "attribute registry rebuilt"
        );
        Ok(Self::from_parts(attributes, categories))
    }

    pub fn from_parts(attributes: Vec<Attribute>, categories: Vec<Category>) -> Self {
        let mut registry = Self::default();
        for category in categories {
            registry.categories.insert(category.id, category);
        }
        for attribute in attributes {
            registry.by_name.insert(attribute.name.clone(), attribute.id);
            registry.by_id.insert(attribute.id, attribute);
        }
        registry
    }

    /// Look up an attribute by name.
    pub fn resolve(&self, name: &str) -> Result<&Attribute> {
        self.by_name
            .get(name)
            .and_then(|id| self.by_id.get(id))
            .ok_or_else(|| SpectraError::not_found(EntityKind::Attribute, name))
    }

    /// Look up an attribute by id.
    pub fn resolve_id(&self, id: AttributeId) -> Result<&Attribute> {
        self.by_id
            .get(&id)
            .ok_or_else(|| SpectraError::not_found(EntityKind::Attribute, id))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// All attributes in id order.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.by_id.values()
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    /// Attributes tagged with the given category, in id order.
    pub fn in_category(&self, category: &str) -> Result<Vec<&Attribute>> {
        if !self.categories.values().any(|c| c.name == category) {
            return Err(SpectraError::not_found(EntityKind::Category, category));
        }
        Ok(self
            .by_id
            .values()
            .filter(|a| a.category.as_deref() == Some(category))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
