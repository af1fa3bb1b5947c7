//! # Command Layer
//!
//! This module contains the **core logic** of the engine. Each operation family lives in
//! its own submodule as plain functions taking a [`Session`](crate::session::Session).
//!
//! ## Role and Responsibilities
//!
//! Commands are where the real work happens:
//! - Resolve attribute names through the session's registry
//! - Check the caller's visibility before reading or touching anything
//! - Run each top-level operation as **one transaction** (`Database::write`)
//! - Return structured values ([`WriteOutcome`], [`DeleteReport`], ...), never strings
//!
//! ## What Commands Do NOT Do
//!
//! - **Any I/O** beyond the database: no stdout, stderr or prompts
//! - **Retries**: a failed operation is rolled back and reported, the caller decides
//! - **Authorization policy**: visibility is supplied by the caller
//!
//! ## Testing Strategy
//!
//! **This is where most of the testing lives.** Command tests run against an in-memory
//! database through [`TestEnv`](crate::test_utils::TestEnv), cover each branch and error
//! condition, and check the resulting store state directly.
//!
//! ## Command Modules
//!
//! - [`attributes`]: Attribute and category definitions, registry lookups
//! - [`eav`]: Reading, writing and removing EAV values; presence/value filters
//! - [`records`]: Record lifecycle (insert, copy, delete, bulk field updates)
//! - [`hierarchy`]: Hierarchy nodes, idempotent child creation, cascading delete
//! - [`campaigns`]: Campaign lifecycle and research groups
//! - [`browse`]: Generic browsing and removal over [`SpectralNode`](crate::model::SpectralNode)
//! - [`query`]: Executing compiled predicate trees
//! - [`conflicts`]: Agreement / conflict detection across records
//! - [`links`]: Target/reference links between records
//! - [`taxonomy`]: Controlled-vocabulary trees
//! - [`sort`]: Grouping records by attribute values
//! - [`helpers`]: Shared lookups and row mappers

use crate::model::{CampaignId, EavId, NodeId, RecordId};
use serde::Serialize;

pub mod attributes;
pub mod browse;
pub mod campaigns;
pub mod conflicts;
pub mod eav;
pub mod helpers;
pub mod hierarchy;
pub mod links;
pub mod query;
pub mod records;
pub mod sort;
pub mod taxonomy;

/// Result of writing one value to one record.
///
/// Writing a value that is already stored is not an error, and it is reported
/// distinctly from a fresh insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "id", rename_all = "snake_case")]
pub enum WriteOutcome {
    Inserted(EavId),
    /// An existing entry (matched by its previous value) was rewritten in place.
    Updated(EavId),
    AlreadyPresent,
}

impl WriteOutcome {
    pub fn entry_id(&self) -> Option<EavId> {
        match self {
            WriteOutcome::Inserted(id) | WriteOutcome::Updated(id) => Some(*id),
            WriteOutcome::AlreadyPresent => None,
        }
    }

    pub fn is_already_present(&self) -> bool {
        matches!(self, WriteOutcome::AlreadyPresent)
    }
}

/// Everything a structural delete removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub campaigns: Vec<CampaignId>,
    /// Nodes in deletion order (descendants before ancestors).
    pub nodes: Vec<NodeId>,
    pub records: Vec<RecordId>,
}

impl DeleteReport {
    pub(crate) fn absorb(&mut self, other: DeleteReport) {
        self.campaigns.extend(other.campaigns);
        self.nodes.extend(other.nodes);
        self.records.extend(other.records);
    }
}
