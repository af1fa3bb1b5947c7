//! # Predicate Trees
//!
//! A query selects records with a boolean tree of conditions. Leaves compare a
//! [`Field`] with an [`Operand`]; inner nodes combine children with AND / OR.
//!
//! Fields are either **structural** (columns of the record table, no join needed) or
//! **attributes** (EAV values, one join per distinct attribute). See
//! [`compiler`] for how a tree becomes SQL.
//!
//! ## Building Queries
//!
//! ```ignore
//! let query = Query::new(Predicate::and(vec![
//!     Predicate::eq(Field::attr("species"), AttrValue::text("oak")),
//!     Predicate::compare(Field::attr("height"), Op::Gt, AttrValue::integer(10)),
//! ]))
//! .order_by(Field::attr("height"));
//! ```
//!
//! ## JSON Form
//!
//! Every type here is serde (de)serializable, so callers can ship trees as JSON:
//!
//! ```json
//! {
//!   "predicate": {"or": [
//!     {"condition": {"field": {"attribute": "species"}, "op": "eq",
//!                    "operand": {"kind": "text", "value": "oak"}}},
//!     {"condition": {"field": {"structural": "node_id"}, "op": "in",
//!                    "operand": [{"kind": "integer", "value": 4}]}}
//!   ]},
//!   "order_by": {"structural": "record_id"}
//! }
//! ```

pub mod compiler;

use crate::attributes::{AttrValue, ValueKind};
use crate::error::{Result, SpectraError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use compiler::{compile, CompiledQuery, Shape};

/// Columns of the record table that can be queried without a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralField {
    RecordId,
    NodeId,
    CampaignId,
    OwnerId,
    CalibrationId,
    MeasurementRef,
    CreatedAt,
}

impl StructuralField {
    pub const ALL: [StructuralField; 7] = [
        StructuralField::RecordId,
        StructuralField::NodeId,
        StructuralField::CampaignId,
        StructuralField::OwnerId,
        StructuralField::CalibrationId,
        StructuralField::MeasurementRef,
        StructuralField::CreatedAt,
    ];

    /// Column name in the record table. Also the field's public name.
    pub fn column(self) -> &'static str {
        match self {
            StructuralField::RecordId => "record_id",
            StructuralField::NodeId => "node_id",
            StructuralField::CampaignId => "campaign_id",
            StructuralField::OwnerId => "owner_id",
            StructuralField::CalibrationId => "calibration_id",
            StructuralField::MeasurementRef => "measurement_ref",
            StructuralField::CreatedAt => "created_at",
        }
    }

    /// The value kind operands for this field must have.
    pub fn kind(self) -> ValueKind {
        match self {
            StructuralField::MeasurementRef => ValueKind::Text,
            StructuralField::CreatedAt => ValueKind::DateTime,
            _ => ValueKind::Integer,
        }
    }
}

impl FromStr for StructuralField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        StructuralField::ALL
            .iter()
            .copied()
            .find(|f| f.column() == s)
            .ok_or_else(|| format!("unknown structural field '{}'", s))
    }
}

/// A field reference: a record column or an attribute by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Structural(StructuralField),
    Attribute(String),
}

impl Field {
    pub fn attr(name: impl Into<String>) -> Self {
        Field::Attribute(name.into())
    }

    /// Interpret a bare name: structural column names win, anything else is an attribute.
    pub fn parse(name: &str) -> Self {
        match name.parse::<StructuralField>() {
            Ok(field) => Field::Structural(field),
            Err(_) => Field::Attribute(name.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Field::Structural(f) => f.column(),
            Field::Attribute(name) => name,
        }
    }
}

impl Default for Field {
    fn default() -> Self {
        Field::Structural(StructuralField::RecordId)
    }
}

impl From<StructuralField> for Field {
    fn from(field: StructuralField) -> Self {
        Field::Structural(field)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Membership in an explicit list.
    In,
    /// SQL `LIKE` pattern (`%`, `_`), text only. ASCII case-insensitive.
    Like,
}

impl Op {
    pub fn is_ordering(self) -> bool {
        matches!(self, Op::Lt | Op::Le | Op::Gt | Op::Ge)
    }

    pub(crate) fn sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::In => "IN",
            Op::Like => "LIKE",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Op::Eq => "eq",
            Op::Ne => "ne",
            Op::Lt => "lt",
            Op::Le => "le",
            Op::Gt => "gt",
            Op::Ge => "ge",
            Op::In => "in",
            Op::Like => "like",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Value(AttrValue),
    List(Vec<AttrValue>),
}

impl From<AttrValue> for Operand {
    fn from(value: AttrValue) -> Self {
        Operand::Value(value)
    }
}

impl From<Vec<AttrValue>> for Operand {
    fn from(values: Vec<AttrValue>) -> Self {
        Operand::List(values)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Condition {
        field: Field,
        op: Op,
        operand: Operand,
    },
    /// True when every child is true. Empty is true.
    And(Vec<Predicate>),
    /// True when any child is true. Empty is false.
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn compare(field: impl Into<Field>, op: Op, operand: impl Into<Operand>) -> Self {
        Predicate::Condition {
            field: field.into(),
            op,
            operand: operand.into(),
        }
    }

    pub fn eq(field: impl Into<Field>, value: AttrValue) -> Self {
        Self::compare(field, Op::Eq, value)
    }

    pub fn ne(field: impl Into<Field>, value: AttrValue) -> Self {
        Self::compare(field, Op::Ne, value)
    }

    pub fn like(field: impl Into<Field>, pattern: impl Into<String>) -> Self {
        Self::compare(field, Op::Like, AttrValue::text(pattern))
    }

    pub fn is_in(field: impl Into<Field>, values: Vec<AttrValue>) -> Self {
        Self::compare(field, Op::In, values)
    }

    /// Restrict to an explicit set of records.
    pub fn records_in(ids: impl IntoIterator<Item = crate::model::RecordId>) -> Self {
        Self::is_in(
            StructuralField::RecordId,
            ids.into_iter().map(|id| AttrValue::integer(id.0)).collect(),
        )
    }

    pub fn and(children: Vec<Predicate>) -> Self {
        Predicate::And(children)
    }

    pub fn or(children: Vec<Predicate>) -> Self {
        Predicate::Or(children)
    }
}

/// A predicate tree plus ordering. `predicate: None` selects every visible record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub predicate: Option<Predicate>,
    #[serde(default)]
    pub order_by: Field,
    #[serde(default)]
    pub descending: bool,
}

impl Query {
    pub fn new(predicate: Predicate) -> Self {
        Self {
            predicate: Some(predicate),
            ..Default::default()
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn order_by(mut self, field: impl Into<Field>) -> Self {
        self.order_by = field.into();
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    /// Parse a query from its JSON form.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| SpectraError::InvalidPredicate(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_prefers_structural_names() {
        assert_eq!(
            Field::parse("node_id"),
            Field::Structural(StructuralField::NodeId)
        );
        assert_eq!(Field::parse("species"), Field::attr("species"));
    }

    #[test]
    fn query_parses_from_json() {
        let raw = r#"{
            "predicate": {"or": [
                {"condition": {"field": {"attribute": "species"}, "op": "eq",
                               "operand": {"kind": "text", "value": "oak"}}},
                {"condition": {"field": {"structural": "node_id"}, "op": "in",
                               "operand": [{"kind": "integer", "value": 4}]}}
            ]}
        }"#;
        let query = Query::from_json(raw).unwrap();
        assert_eq!(
            query.predicate,
            Some(Predicate::or(vec![
                Predicate::eq(Field::attr("species"), AttrValue::text("oak")),
                Predicate::is_in(StructuralField::NodeId, vec![AttrValue::integer(4)]),
            ]))
        );
        assert_eq!(query.order_by, Field::Structural(StructuralField::RecordId));
        assert!(!query.descending);
    }

    #[test]
    fn malformed_json_is_an_invalid_predicate() {
        let err = Query::from_json(r#"{"predicate": {"xor": []}}"#).unwrap_err();
        assert!(matches!(err, SpectraError::InvalidPredicate(_)));
    }

    #[test]
    fn structural_kinds() {
        assert_eq!(StructuralField::NodeId.kind(), ValueKind::Integer);
        assert_eq!(StructuralField::MeasurementRef.kind(), ValueKind::Text);
        assert_eq!(StructuralField::CreatedAt.kind(), ValueKind::DateTime);
    }
}
