//! # Domain Model
//!
//! Core data types: identifiers, [`Campaign`], [`HierarchyNode`], [`Record`] and the
//! tagged [`SpectralNode`] used when browsing or removing generically.
//!
//! ## Identity
//!
//! Every entity is identified by a store-assigned integer. Each id type is a distinct
//! newtype so a node id can never be passed where a record id is expected. Ids are
//! allocated with `AUTOINCREMENT` and are never reused, even after deletion.
//!
//! ## Ownership
//!
//! ```text
//! Campaign ──owns──▶ root HierarchyNodes ──▶ child HierarchyNodes ──▶ ...
//!                          │                        │
//!                          └──▶ Records             └──▶ Records ──▶ EAV entries
//! ```
//!
//! A record always belongs to exactly one node. Its campaign is denormalized onto the
//! record row so structural query conditions never need a join.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map(Self)
            }
        }
    };
}

define_id!(
    /// Identifier of a measurement record (a spectrum).
    RecordId
);
define_id!(
    /// Identifier of a hierarchy node (a folder inside a campaign).
    NodeId
);
define_id!(CampaignId);
define_id!(ResearchGroupId);
define_id!(
    /// Identifier of an attribute definition. Stable for the lifetime of a deployment.
    AttributeId
);
define_id!(CategoryId);
define_id!(
    /// Identifier of a single EAV value entry.
    EavId
);
define_id!(TaxonomyId);

/// Timestamps are stored as fixed-width RFC 3339 text so that lexical order in the
/// store matches chronological order.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Access-control boundary owned by a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchGroup {
    pub id: ResearchGroupId,
    pub name: String,
    pub members: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub path: String,
    pub description: String,
    pub investigator_id: Option<i64>,
    /// Alternate filesystem locations this campaign has been loaded from.
    pub known_paths: Vec<String>,
    pub research_group: ResearchGroup,
}

/// Input for creating a campaign.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewCampaign {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub description: String,
    /// The investigator also becomes the first member of the campaign's research group.
    #[serde(default)]
    pub investigator_id: Option<i64>,
    #[serde(default)]
    pub known_paths: Vec<String>,
}

impl NewCampaign {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        if !self.known_paths.contains(&path) {
            self.known_paths.push(path.clone());
        }
        self.path = path;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_investigator(mut self, user_id: i64) -> Self {
        self.investigator_id = Some(user_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub id: NodeId,
    pub campaign_id: CampaignId,
    /// `None` for the campaign's root-level nodes.
    pub parent_id: Option<NodeId>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub node_id: NodeId,
    pub campaign_id: CampaignId,
    pub owner_id: Option<i64>,
    /// Opaque reference to the raw measurement vector, stored elsewhere.
    pub measurement_ref: Option<String>,
    pub calibration_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Input for ingesting a record under a hierarchy node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecord {
    pub node_id: NodeId,
    #[serde(default)]
    pub owner_id: Option<i64>,
    #[serde(default)]
    pub measurement_ref: Option<String>,
    #[serde(default)]
    pub calibration_id: Option<i64>,
}

impl NewRecord {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            owner_id: None,
            measurement_ref: None,
            calibration_id: None,
        }
    }

    pub fn with_owner(mut self, owner_id: i64) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn with_measurement_ref(mut self, reference: impl Into<String>) -> Self {
        self.measurement_ref = Some(reference.into());
        self
    }

    pub fn with_calibration(mut self, calibration_id: i64) -> Self {
        self.calibration_id = Some(calibration_id);
        self
    }
}

/// Directed link from a target record to the reference record it was measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Link {
    pub target_id: RecordId,
    pub reference_id: RecordId,
}

/// One entry of a taxonomy attribute's controlled vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyNode {
    pub id: TaxonomyId,
    pub attribute_id: AttributeId,
    pub parent_id: Option<TaxonomyId>,
    pub name: String,
    pub code: Option<String>,
    pub description: Option<String>,
}

/// A position in the campaign → hierarchy → record tree.
///
/// Generic browsing and removal dispatch on this tag instead of inspecting
/// runtime types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SpectralNode {
    Campaign(CampaignId),
    Hierarchy(NodeId),
    Record(RecordId),
}

impl fmt::Display for SpectralNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpectralNode::Campaign(id) => write!(f, "campaign {}", id),
            SpectralNode::Hierarchy(id) => write!(f, "hierarchy {}", id),
            SpectralNode::Record(id) => write!(f, "record {}", id),
        }
    }
}

/// A child entry returned when browsing a [`SpectralNode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseEntry {
    pub node: SpectralNode,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_roundtrip_through_storage_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 5).unwrap();
        let raw = format_timestamp(&ts);
        assert_eq!(raw, "2024-03-09T14:30:05.000000Z");
        assert_eq!(parse_timestamp(&raw), Some(ts));
    }

    #[test]
    fn timestamp_text_orders_chronologically() {
        let early = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(format_timestamp(&early) < format_timestamp(&late));
    }

    #[test]
    fn new_campaign_path_is_also_a_known_path() {
        let campaign = NewCampaign::new("Alps").with_path("/data/alps");
        assert_eq!(campaign.path, "/data/alps");
        assert_eq!(campaign.known_paths, vec!["/data/alps".to_string()]);
    }

    #[test]
    fn spectral_node_serializes_with_kind_tag() {
        let json = serde_json::to_string(&SpectralNode::Hierarchy(NodeId(7))).unwrap();
        assert_eq!(json, r#"{"kind":"hierarchy","id":7}"#);
    }
}
