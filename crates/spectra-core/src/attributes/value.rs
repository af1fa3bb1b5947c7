//! Typed attribute values.
//!
//! [`AttrValue`] is the runtime representation of one EAV value. It knows which kind it
//! is, how to bind itself as a SQL parameter, how to decode itself from a stored column,
//! and its canonical `value_key`, the text the store uses to recognise duplicates.

use super::ValueKind;
use crate::error::{Result, SpectraError};
use crate::model::{format_timestamp, parse_timestamp, TaxonomyId};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Runtime representation of an attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    Text(String),
    Integer(i64),
    Real(f64),
    DateTime(DateTime<Utc>),
    Taxonomy(TaxonomyId),
    Binary(Vec<u8>),
}

impl AttrValue {
    pub fn text(value: impl Into<String>) -> Self {
        AttrValue::Text(value.into())
    }

    pub fn integer(value: i64) -> Self {
        AttrValue::Integer(value)
    }

    pub fn real(value: f64) -> Self {
        AttrValue::Real(value)
    }

    pub fn datetime(value: DateTime<Utc>) -> Self {
        AttrValue::DateTime(value)
    }

    pub fn taxonomy(id: TaxonomyId) -> Self {
        AttrValue::Taxonomy(id)
    }

    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        AttrValue::Binary(bytes.into())
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            AttrValue::Text(_) => ValueKind::Text,
            AttrValue::Integer(_) => ValueKind::Integer,
            AttrValue::Real(_) => ValueKind::Real,
            AttrValue::DateTime(_) => ValueKind::DateTime,
            AttrValue::Taxonomy(_) => ValueKind::Taxonomy,
            AttrValue::Binary(_) => ValueKind::Binary,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttrValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_taxonomy(&self) -> Option<TaxonomyId> {
        match self {
            AttrValue::Taxonomy(id) => Some(*id),
            _ => None,
        }
    }

    /// Reject values the store cannot hold faithfully. Reals must be finite: SQLite
    /// stores NaN as `NULL`, and large `in` lists travel as JSON, which has no infinities.
    pub fn ensure_storable(&self) -> Result<()> {
        match self {
            AttrValue::Real(f) if !f.is_finite() => Err(SpectraError::InvalidArgument(format!(
                "real value {} is not finite",
                f
            ))),
            _ => Ok(()),
        }
    }

    /// Canonical text identity of the value.
    ///
    /// Two values are "the same value" for redundancy suppression and conflict
    /// detection exactly when their keys are equal. Binary values are keyed by their
    /// SHA-256 digest so large blobs do not bloat the uniqueness index.
    pub fn value_key(&self) -> String {
        match self {
            AttrValue::Text(s) => format!("t:{}", s),
            AttrValue::Integer(n) => format!("i:{}", n),
            AttrValue::Real(f) => format!("r:{:?}", canonical_real(*f)),
            AttrValue::DateTime(ts) => format!("d:{}", format_timestamp(ts)),
            AttrValue::Taxonomy(id) => format!("x:{}", id),
            AttrValue::Binary(bytes) => format!("b:{}", hex::encode(Sha256::digest(bytes))),
        }
    }

    /// The value as a bound SQL parameter for its kind's column.
    pub fn to_sql_value(&self) -> Value {
        match self {
            AttrValue::Text(s) => Value::Text(s.clone()),
            AttrValue::Integer(n) => Value::Integer(*n),
            AttrValue::Real(f) => Value::Real(canonical_real(*f)),
            AttrValue::DateTime(ts) => Value::Text(format_timestamp(ts)),
            AttrValue::Taxonomy(id) => Value::Integer(id.0),
            AttrValue::Binary(bytes) => Value::Blob(bytes.clone()),
        }
    }

    /// Decode a value read from `kind`'s column. `NULL` decodes to `None`.
    pub fn from_stored(kind: ValueKind, raw: Value) -> Result<Option<Self>> {
        let value = match (kind, raw) {
            (_, Value::Null) => return Ok(None),
            (ValueKind::Text, Value::Text(s)) => AttrValue::Text(s),
            (ValueKind::Integer, Value::Integer(n)) => AttrValue::Integer(n),
            (ValueKind::Real, Value::Real(f)) => AttrValue::Real(f),
            (ValueKind::Real, Value::Integer(n)) => AttrValue::Real(n as f64),
            (ValueKind::DateTime, Value::Text(s)) => match parse_timestamp(&s) {
                Some(ts) => AttrValue::DateTime(ts),
                None => {
                    return Err(SpectraError::integrity(
                        "decode value",
                        format!("malformed timestamp '{}'", s),
                    ))
                }
            },
            (ValueKind::Taxonomy, Value::Integer(n)) => AttrValue::Taxonomy(TaxonomyId(n)),
            (ValueKind::Binary, Value::Blob(bytes)) => AttrValue::Binary(bytes),
            (kind, other) => {
                return Err(SpectraError::integrity(
                    "decode value",
                    format!("{} stored in a {} column", other.data_type(), kind),
                ))
            }
        };
        Ok(Some(value))
    }
}

/// SQLite stores `-0.0` as `0.0`; keys and parameters must agree with it.
fn canonical_real(f: f64) -> f64 {
    if f == 0.0 {
        0.0
    } else {
        f
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Text(s) => f.write_str(s),
            AttrValue::Integer(n) => write!(f, "{}", n),
            AttrValue::Real(v) => write!(f, "{}", v),
            AttrValue::DateTime(ts) => f.write_str(&format_timestamp(ts)),
            AttrValue::Taxonomy(id) => write!(f, "#{}", id),
            AttrValue::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn keys_distinguish_kinds_with_same_text() {
        assert_ne!(
            AttrValue::text("10").value_key(),
            AttrValue::integer(10).value_key()
        );
        assert_ne!(
            AttrValue::integer(10).value_key(),
            AttrValue::real(10.0).value_key()
        );
    }

    #[test]
    fn equal_values_share_a_key() {
        assert_eq!(
            AttrValue::text("oak").value_key(),
            AttrValue::text("oak").value_key()
        );
        assert_eq!(
            AttrValue::binary(vec![1, 2, 3]).value_key(),
            AttrValue::binary(vec![1, 2, 3]).value_key()
        );
    }

    #[test]
    fn negative_zero_shares_the_key_of_zero() {
        assert_eq!(
            AttrValue::real(-0.0).value_key(),
            AttrValue::real(0.0).value_key()
        );
        assert_eq!(AttrValue::real(-0.0).to_sql_value(), Value::Real(0.0));
        assert_ne!(
            AttrValue::real(-0.5).value_key(),
            AttrValue::real(0.5).value_key()
        );
    }

    #[test]
    fn non_finite_reals_are_not_storable() {
        for f in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                AttrValue::real(f).ensure_storable(),
                Err(SpectraError::InvalidArgument(_))
            ));
        }
        assert!(AttrValue::real(1.5).ensure_storable().is_ok());
        assert!(AttrValue::text("NaN").ensure_storable().is_ok());
    }

    #[test]
    fn binary_keys_are_fixed_length_digests() {
        let key = AttrValue::binary(vec![0u8; 4096]).value_key();
        assert_eq!(key.len(), 2 + 64);
    }

    #[test]
    fn decoding_null_yields_none() {
        assert_eq!(
            AttrValue::from_stored(ValueKind::Text, Value::Null).unwrap(),
            None
        );
    }

    #[test]
    fn decoding_datetime_parses_stored_text() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let stored = AttrValue::datetime(ts).to_sql_value();
        assert_eq!(
            AttrValue::from_stored(ValueKind::DateTime, stored).unwrap(),
            Some(AttrValue::DateTime(ts))
        );
    }

    #[test]
    fn decoding_wrong_storage_class_is_an_integrity_error() {
        let err = AttrValue::from_stored(ValueKind::Integer, Value::Text("x".into())).unwrap_err();
        assert!(matches!(err, SpectraError::IntegrityViolation { .. }));
    }

    #[test]
    fn taxonomy_binds_as_integer_id() {
        assert_eq!(
            AttrValue::taxonomy(TaxonomyId(17)).to_sql_value(),
            Value::Integer(17)
        );
    }

    #[test]
    fn values_serialize_with_kind_tag() {
        let json = serde_json::to_string(&AttrValue::text("oak")).unwrap();
        assert_eq!(json, r#"{"kind":"text","value":"oak"}"#);
        let parsed: AttrValue = serde_json::from_str(r#"{"kind":"integer","value":3}"#).unwrap();
        assert_eq!(parsed, AttrValue::integer(3));
    }
}
