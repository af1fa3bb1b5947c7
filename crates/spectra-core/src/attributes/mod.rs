//! # Attribute System
//!
//! Records carry metadata as Entity-Attribute-Value rows instead of fixed columns.
//! This module provides the typed vocabulary for those rows:
//!
//! - **Kinds**: which storage column an attribute's values live in
//! - **Values**: the runtime representation of a typed value
//! - **Registry**: the name ⇄ id ⇄ kind ⇄ category mapping, loaded once per session
//!
//! ## Value Kinds
//!
//! | Kind | Column | Ordered | Example |
//! |------|--------|---------|---------|
//! | `Text` | `text_val` | yes | `species = "oak"` |
//! | `Integer` | `int_val` | yes | `sample_count = 12` |
//! | `Real` | `real_val` | yes | `sun_zenith = 41.7` |
//! | `DateTime` | `datetime_val` | yes | `acquired = 2024-05-01T10:00Z` |
//! | `Taxonomy` | `taxonomy_id` | no | `land_cover = #17` |
//! | `Binary` | `binary_val` | no | `plot = <png bytes>` |
//!
//! Values are never coerced across kinds: writing an integer to a real attribute is a
//! [`TypeMismatch`](crate::error::SpectraError::TypeMismatch).
//!
//! ## Usage
//!
//! ```ignore
//! let registry = AttributeRegistry::load(&conn)?;
//! let species = registry.resolve("species")?;
//! assert_eq!(species.kind, ValueKind::Text);
//! ```

mod kind;
mod registry;
mod value;

pub use kind::{Attribute, AttributeSpec, Category, ValueKind};
pub use registry::AttributeRegistry;
pub use value::AttrValue;
