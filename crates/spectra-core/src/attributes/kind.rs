//! Attribute kinds and definitions.
//!
//! This module defines the schema side of attributes: which kind of value they hold,
//! where that value is stored, and the metadata (category, unit) attached to them.

use crate::model::{AttributeId, CategoryId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of value an attribute holds.
///
/// Each kind maps to exactly one value column of the EAV table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Text,
    Integer,
    Real,
    DateTime,
    /// Reference to a node of the attribute's controlled vocabulary tree.
    Taxonomy,
    /// Opaque bytes, e.g. a rendered plot.
    Binary,
}

impl ValueKind {
    pub const ALL: [ValueKind; 6] = [
        ValueKind::Text,
        ValueKind::Integer,
        ValueKind::Real,
        ValueKind::DateTime,
        ValueKind::Taxonomy,
        ValueKind::Binary,
    ];

    /// The EAV column holding values of this kind.
    pub fn column(self) -> &'static str {
        match self {
            ValueKind::Text => "text_val",
            ValueKind::Integer => "int_val",
            ValueKind::Real => "real_val",
            ValueKind::DateTime => "datetime_val",
            ValueKind::Taxonomy => "taxonomy_id",
            ValueKind::Binary => "binary_val",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Text => "text",
            ValueKind::Integer => "integer",
            ValueKind::Real => "real",
            ValueKind::DateTime => "datetime",
            ValueKind::Taxonomy => "taxonomy",
            ValueKind::Binary => "binary",
        }
    }

    /// Whether `<`, `<=`, `>`, `>=` are meaningful for this kind.
    pub fn is_ordered(self) -> bool {
        matches!(
            self,
            ValueKind::Text | ValueKind::Integer | ValueKind::Real | ValueKind::DateTime
        )
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ValueKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown value kind '{}'", s))
    }
}

/// Grouping tag for attributes. Used to scope lookups, carries no behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
}

/// A stored attribute definition. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: AttributeId,
    pub name: String,
    pub kind: ValueKind,
    pub category_id: Option<CategoryId>,
    pub category: Option<String>,
    pub default_unit: Option<String>,
    pub description: Option<String>,
}

/// Input for defining a new attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    pub kind: ValueKind,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub default_unit: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl AttributeSpec {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            category: None,
            default_unit: None,
            description: None,
        }
    }

    /// Place the attribute in a category (created on demand).
    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.default_unit = Some(unit.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
