//! # Predicate-to-SQL Compiler
//!
//! Compilation is two passes over the tree:
//!
//! 1. **Collect**: walk once, recording each distinct attribute name in order of first
//!    appearance and resolving it through the [`AttributeRegistry`]. An unknown name
//!    fails the whole compilation.
//! 2. **Emit**: walk again, rendering each leaf as a comparison against the join alias
//!    allocated for its attribute (`a0`, `a1`, ...) or against the record column for
//!    structural fields. Combinators are parenthesized so AND/OR precedence survives.
//!
//! Each distinct attribute gets exactly one `LEFT JOIN`, no matter how many leaves use
//! it. Two leaves on the same attribute under AND therefore constrain the *same* value
//! row: `color = red AND color = blue` matches nothing. Under OR the joins fan out
//! across value rows, and `GROUP BY r.record_id` folds the duplicates back into one row
//! per record.
//!
//! Literals always become bound parameters. The only text spliced into SQL is aliases
//! and column names taken from closed enums. An `in` list longer than [`MAX_BIND`]
//! binds as a single JSON array read back through `json_each`.
//!
//! ```text
//! SELECT r.record_id FROM record r
//!   LEFT JOIN eav_value a0 ON a0.record_id = r.record_id AND a0.attribute_id = ?
//!   LEFT JOIN eav_value o  ON o.record_id  = r.record_id AND o.attribute_id  = ?
//! WHERE (a0.text_val = ? OR a0.text_val = ?) AND r.campaign_id IN (?)
//! GROUP BY r.record_id
//! ORDER BY MIN(o.real_val), r.record_id
//! ```

use super::{Field, Op, Operand, Predicate, Query, StructuralField};
use crate::attributes::{AttrValue, Attribute, AttributeRegistry, ValueKind};
use crate::error::{Result, SpectraError};
use crate::session::Visibility;
use crate::store::{placeholders, MAX_BIND};
use rusqlite::types::Value;
use tracing::debug;

/// What the compiled statement returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Distinct record ids, ordered.
    Ids,
    /// A single `COUNT` of distinct records.
    Count,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
    /// Number of EAV joins emitted for predicate attributes.
    pub joins: usize,
}

/// Compile a query against the registry, restricted to what `visibility` allows.
pub fn compile(
    query: &Query,
    registry: &AttributeRegistry,
    visibility: &Visibility,
    shape: Shape,
) -> Result<CompiledQuery> {
    let mut compiler = Compiler {
        registry,
        joined: Vec::new(),
        params: Vec::new(),
    };

    if let Some(predicate) = &query.predicate {
        compiler.collect(predicate)?;
    }

    let mut sql = String::from(match shape {
        Shape::Ids => "SELECT r.record_id FROM record r",
        Shape::Count => "SELECT COUNT(DISTINCT r.record_id) FROM record r",
    });
    let mut params = Vec::new();

    for (alias, attribute) in compiler.joined.iter().enumerate() {
        sql.push_str(&format!(
            " LEFT JOIN eav_value a{alias} ON a{alias}.record_id = r.record_id AND a{alias}.attribute_id = ?"
        ));
        params.push(Value::Integer(attribute.id.0));
    }

    let order = match shape {
        Shape::Ids => Some(order_clause(query, registry, &mut sql, &mut params)?),
        Shape::Count => None,
    };

    let mut conditions = Vec::new();
    if let Some(predicate) = &query.predicate {
        conditions.push(compiler.emit(predicate)?);
    }
    if let Visibility::Campaigns(ids) = visibility {
        if ids.is_empty() {
            conditions.push("0=1".to_string());
        } else if ids.len() > MAX_BIND {
            conditions.push("r.campaign_id IN (SELECT value FROM json_each(?))".to_string());
            let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
            compiler
                .params
                .push(Value::Text(serde_json::Value::from(ids).to_string()));
        } else {
            conditions.push(format!("r.campaign_id IN ({})", placeholders(ids.len())));
            compiler
                .params
                .extend(ids.iter().map(|id| Value::Integer(id.0)));
        }
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    params.append(&mut compiler.params);

    if let Some(order) = order {
        sql.push_str(" GROUP BY r.record_id ORDER BY ");
        sql.push_str(&order);
    }

    debug!(sql = %sql, params = params.len(), "compiled query");

    Ok(CompiledQuery {
        sql,
        params,
        joins: compiler.joined.len(),
    })
}

/// Emits the ordering join (for attribute ordering) and returns the `ORDER BY` body.
fn order_clause(
    query: &Query,
    registry: &AttributeRegistry,
    sql: &mut String,
    params: &mut Vec<Value>,
) -> Result<String> {
    let direction = if query.descending { " DESC" } else { "" };
    let key = match &query.order_by {
        Field::Structural(StructuralField::RecordId) => {
            return Ok(format!("r.record_id{direction}"));
        }
        Field::Structural(field) => format!("r.{}", field.column()),
        Field::Attribute(name) => {
            let attribute = resolve(registry, name)?;
            if attribute.kind == ValueKind::Binary {
                return Err(SpectraError::InvalidPredicate(format!(
                    "cannot order by binary attribute '{}'",
                    name
                )));
            }
            sql.push_str(
                " LEFT JOIN eav_value o ON o.record_id = r.record_id AND o.attribute_id = ?",
            );
            params.push(Value::Integer(attribute.id.0));
            format!("MIN(o.{})", attribute.kind.column())
        }
    };
    Ok(format!("{key}{direction}, r.record_id{direction}"))
}

fn resolve<'r>(registry: &'r AttributeRegistry, name: &str) -> Result<&'r Attribute> {
    registry
        .resolve(name)
        .map_err(|_| SpectraError::InvalidPredicate(format!("unknown attribute '{}'", name)))
}

struct Compiler<'r> {
    registry: &'r AttributeRegistry,
    /// Join contexts, alias `aN` is index N.
    joined: Vec<&'r Attribute>,
    params: Vec<Value>,
}

impl<'r> Compiler<'r> {
    fn collect(&mut self, predicate: &Predicate) -> Result<()> {
        match predicate {
            Predicate::Condition {
                field: Field::Attribute(name),
                ..
            } => {
                if !self.joined.iter().any(|a| a.name == *name) {
                    let attribute = resolve(self.registry, name)?;
                    self.joined.push(attribute);
                }
                Ok(())
            }
            Predicate::Condition { .. } => Ok(()),
            Predicate::And(children) | Predicate::Or(children) => {
                children.iter().try_for_each(|child| self.collect(child))
            }
        }
    }

    fn emit(&mut self, predicate: &Predicate) -> Result<String> {
        match predicate {
            Predicate::And(children) => self.combine(children, " AND ", "1=1"),
            Predicate::Or(children) => self.combine(children, " OR ", "0=1"),
            Predicate::Condition { field, op, operand } => {
                let (column, kind) = match field {
                    Field::Structural(f) => (format!("r.{}", f.column()), f.kind()),
                    Field::Attribute(name) => {
                        let alias = self
                            .joined
                            .iter()
                            .position(|a| a.name == *name)
                            .ok_or_else(|| {
                                SpectraError::InvalidPredicate(format!(
                                    "unknown attribute '{}'",
                                    name
                                ))
                            })?;
                        let kind = self.joined[alias].kind;
                        (format!("a{}.{}", alias, kind.column()), kind)
                    }
                };
                check_operator(field, *op, kind)?;
                self.leaf(field, &column, kind, *op, operand)
            }
        }
    }

    fn combine(&mut self, children: &[Predicate], joiner: &str, empty: &str) -> Result<String> {
        if children.is_empty() {
            return Ok(empty.to_string());
        }
        let parts = children
            .iter()
            .map(|child| self.emit(child))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("({})", parts.join(joiner)))
    }

    fn leaf(
        &mut self,
        field: &Field,
        column: &str,
        kind: ValueKind,
        op: Op,
        operand: &Operand,
    ) -> Result<String> {
        match (op, operand) {
            (Op::In, Operand::List(values)) => {
                if values.is_empty() {
                    return Ok("0=1".to_string());
                }
                for value in values {
                    check_operand(field, kind, value)?;
                }
                if values.len() > MAX_BIND {
                    self.params.push(json_array(values));
                    return Ok(format!("{} IN (SELECT value FROM json_each(?))", column));
                }
                self.params.extend(values.iter().map(AttrValue::to_sql_value));
                Ok(format!("{} IN ({})", column, placeholders(values.len())))
            }
            (Op::In, Operand::Value(_)) => Err(SpectraError::InvalidPredicate(format!(
                "'in' on '{}' needs a list operand",
                field
            ))),
            (_, Operand::List(_)) => Err(SpectraError::InvalidPredicate(format!(
                "'{}' on '{}' takes a single value, not a list",
                op, field
            ))),
            (_, Operand::Value(value)) => {
                check_operand(field, kind, value)?;
                self.params.push(value.to_sql_value());
                Ok(format!("{} {} ?", column, op.sql()))
            }
        }
    }
}

/// A long `in` list as one JSON array parameter, so the statement stays within
/// SQLite's bound variable limit however large the selection is.
fn json_array(values: &[AttrValue]) -> Value {
    let items: Vec<serde_json::Value> = values
        .iter()
        .map(|value| match value.to_sql_value() {
            Value::Integer(n) => serde_json::Value::from(n),
            Value::Real(f) => serde_json::Value::from(f),
            Value::Text(s) => serde_json::Value::from(s),
            Value::Blob(_) | Value::Null => serde_json::Value::Null,
        })
        .collect();
    Value::Text(serde_json::Value::Array(items).to_string())
}

fn check_operator(field: &Field, op: Op, kind: ValueKind) -> Result<()> {
    let valid = match op {
        Op::Eq | Op::Ne => true,
        Op::Lt | Op::Le | Op::Gt | Op::Ge => kind.is_ordered(),
        Op::In => kind != ValueKind::Binary,
        Op::Like => kind == ValueKind::Text,
    };
    if valid {
        Ok(())
    } else {
        Err(SpectraError::InvalidPredicate(format!(
            "operator '{}' is not valid for {} field '{}'",
            op, kind, field
        )))
    }
}

fn check_operand(field: &Field, kind: ValueKind, value: &AttrValue) -> Result<()> {
    if value.kind() == kind {
        value.ensure_storable().map_err(|_| {
            SpectraError::InvalidPredicate(format!(
                "operand {} on '{}' is not finite",
                value, field
            ))
        })
    } else {
        Err(SpectraError::InvalidPredicate(format!(
            "field '{}' holds {} values, operand is {}",
            field,
            kind,
            value.kind()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Category;
    use crate::model::{AttributeId, CampaignId, RecordId};

    fn registry() -> AttributeRegistry {
        let attribute = |id: i64, name: &str, kind| Attribute {
            id: AttributeId(id),
            name: name.to_string(),
            kind,
            category_id: None,
            category: None,
            default_unit: None,
            description: None,
        };
        AttributeRegistry::from_parts(
            vec![
                attribute(1, "color", ValueKind::Text),
                attribute(2, "height", ValueKind::Integer),
                attribute(3, "land_cover", ValueKind::Taxonomy),
                attribute(4, "plot", ValueKind::Binary),
            ],
            Vec::<Category>::new(),
        )
    }

    fn ids(query: &Query) -> Result<CompiledQuery> {
        compile(query, &registry(), &Visibility::Unrestricted, Shape::Ids)
    }

    fn color(value: &str) -> Predicate {
        Predicate::eq(Field::attr("color"), AttrValue::text(value))
    }

    #[test]
    fn one_join_per_distinct_attribute() {
        let query = Query::new(Predicate::or(vec![
            color("red"),
            color("blue"),
            Predicate::and(vec![
                color("green"),
                Predicate::compare(Field::attr("height"), Op::Gt, AttrValue::integer(3)),
            ]),
        ]));
        let compiled = ids(&query).unwrap();
        assert_eq!(compiled.joins, 2);
        assert_eq!(compiled.sql.matches("LEFT JOIN").count(), 2);
        assert!(compiled.sql.contains(
            "WHERE (a0.text_val = ? OR a0.text_val = ? OR (a0.text_val = ? AND a1.int_val > ?))"
        ));
    }

    #[test]
    fn params_follow_text_order() {
        let query = Query::new(Predicate::and(vec![color("red")])).order_by(Field::attr("height"));
        let compiled = ids(&query).unwrap();
        assert_eq!(
            compiled.params,
            vec![
                Value::Integer(1),
                Value::Integer(2),
                Value::Text("red".into())
            ]
        );
        assert!(compiled.sql.ends_with("ORDER BY MIN(o.int_val), r.record_id"));
    }

    #[test]
    fn literals_are_never_spliced() {
        let query = Query::new(color("'; DROP TABLE record; --"));
        let compiled = ids(&query).unwrap();
        assert!(!compiled.sql.contains("DROP"));
    }

    #[test]
    fn unknown_attribute_fails_compilation() {
        let query = Query::new(Predicate::or(vec![
            color("red"),
            Predicate::eq(Field::attr("colour"), AttrValue::text("red")),
        ]));
        assert!(matches!(
            ids(&query),
            Err(SpectraError::InvalidPredicate(msg)) if msg.contains("colour")
        ));
    }

    #[test]
    fn like_is_text_only() {
        let query = Query::new(Predicate::compare(
            Field::attr("height"),
            Op::Like,
            AttrValue::text("1%"),
        ));
        assert!(matches!(ids(&query), Err(SpectraError::InvalidPredicate(_))));
        assert!(ids(&Query::new(Predicate::like(Field::attr("color"), "re%"))).is_ok());
    }

    #[test]
    fn ordering_operators_need_ordered_kinds() {
        let query = Query::new(Predicate::compare(
            Field::attr("land_cover"),
            Op::Lt,
            AttrValue::taxonomy(crate::model::TaxonomyId(3)),
        ));
        assert!(matches!(ids(&query), Err(SpectraError::InvalidPredicate(_))));
    }

    #[test]
    fn binary_supports_only_equality() {
        let eq = Query::new(Predicate::eq(Field::attr("plot"), AttrValue::binary(vec![1])));
        assert!(ids(&eq).is_ok());
        let within = Query::new(Predicate::is_in(
            Field::attr("plot"),
            vec![AttrValue::binary(vec![1])],
        ));
        assert!(ids(&within).is_err());
    }

    #[test]
    fn operand_kind_must_match() {
        let query = Query::new(Predicate::eq(Field::attr("height"), AttrValue::text("10")));
        assert!(matches!(ids(&query), Err(SpectraError::InvalidPredicate(_))));
    }

    #[test]
    fn in_requires_a_list_and_empty_list_is_false() {
        let bad = Query::new(Predicate::compare(
            StructuralField::NodeId,
            Op::In,
            AttrValue::integer(1),
        ));
        assert!(ids(&bad).is_err());

        let empty = Query::new(Predicate::records_in(Vec::new()));
        let compiled = ids(&empty).unwrap();
        assert!(compiled.sql.contains("WHERE 0=1"));
    }

    #[test]
    fn long_in_lists_bind_one_json_array() {
        let selected: Vec<RecordId> = (1..=(MAX_BIND as i64 + 1)).map(RecordId).collect();
        let compiled = ids(&Query::new(Predicate::records_in(selected))).unwrap();
        assert!(compiled
            .sql
            .contains("WHERE r.record_id IN (SELECT value FROM json_each(?))"));
        assert_eq!(compiled.params.len(), 1);
        match &compiled.params[0] {
            Value::Text(json) => {
                assert!(json.starts_with("[1,2,3,"));
                assert!(json.ends_with(&format!(",{}]", MAX_BIND + 1)));
            }
            other => panic!("expected a JSON parameter, got {:?}", other),
        }

        let short: Vec<RecordId> = (1..=3).map(RecordId).collect();
        let compiled = ids(&Query::new(Predicate::records_in(short))).unwrap();
        assert!(compiled.sql.contains("r.record_id IN (?,?,?)"));
    }

    #[test]
    fn non_finite_operands_are_rejected() {
        let registry = AttributeRegistry::from_parts(
            vec![Attribute {
                id: AttributeId(5),
                name: "reflectance".to_string(),
                kind: ValueKind::Real,
                category_id: None,
                category: None,
                default_unit: None,
                description: None,
            }],
            Vec::<Category>::new(),
        );
        let nan = Query::new(Predicate::eq(
            Field::attr("reflectance"),
            AttrValue::real(f64::NAN),
        ));
        assert!(matches!(
            compile(&nan, &registry, &Visibility::Unrestricted, Shape::Ids),
            Err(SpectraError::InvalidPredicate(_))
        ));
    }

    #[test]
    fn empty_combinators() {
        let compiled = ids(&Query::new(Predicate::and(vec![]))).unwrap();
        assert!(compiled.sql.contains("WHERE 1=1"));
        let compiled = ids(&Query::new(Predicate::or(vec![]))).unwrap();
        assert!(compiled.sql.contains("WHERE 0=1"));
    }

    #[test]
    fn structural_fields_need_no_join() {
        let query = Query::new(Predicate::eq(StructuralField::NodeId, AttrValue::integer(7)));
        let compiled = ids(&query).unwrap();
        assert_eq!(compiled.joins, 0);
        assert!(compiled.sql.contains("WHERE r.node_id = ?"));
    }

    #[test]
    fn visibility_restricts_campaigns() {
        let vis = Visibility::campaigns([CampaignId(4), CampaignId(9)]);
        let compiled = compile(&Query::all(), &registry(), &vis, Shape::Count).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT COUNT(DISTINCT r.record_id) FROM record r WHERE r.campaign_id IN (?,?)"
        );
        assert_eq!(compiled.params, vec![Value::Integer(4), Value::Integer(9)]);
    }

    #[test]
    fn descending_applies_to_tie_break() {
        let compiled = ids(&Query::all().descending()).unwrap();
        assert!(compiled
            .sql
            .ends_with("GROUP BY r.record_id ORDER BY r.record_id DESC"));

        let by_owner = Query::all().order_by(StructuralField::OwnerId).descending();
        let compiled = ids(&by_owner).unwrap();
        assert!(compiled
            .sql
            .ends_with("ORDER BY r.owner_id DESC, r.record_id DESC"));
    }
}
