//! # Sessions
//!
//! A [`Session`] carries everything one caller (typically one request-handling thread)
//! needs to talk to the engine:
//!
//! - a shared handle to the [`Database`]
//! - the caller's [`Visibility`], supplied from outside (the engine never works out
//!   who may see what)
//! - the lazily built [`AttributeRegistry`]
//! - the [`RedundancyMemo`] of values known to be stored
//! - an optional [`ProgressSink`] for long-running operations
//!
//! The registry and the memo are caches. Nothing keeps them consistent with writes made
//! by other sessions; call [`Session::invalidate_registry`] or
//! [`Session::clear_redundancy_memo`] before relying on them after external changes.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::attributes::AttributeRegistry;
use crate::error::Result;
use crate::model::{AttributeId, CampaignId, RecordId};
use crate::store::Database;

/// Which campaigns a caller may see and modify.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Unrestricted,
    Campaigns(BTreeSet<CampaignId>),
}

pub(crate) static UNRESTRICTED: Visibility = Visibility::Unrestricted;

impl Visibility {
    pub fn campaigns(ids: impl IntoIterator<Item = CampaignId>) -> Self {
        Visibility::Campaigns(ids.into_iter().collect())
    }

    pub fn allows(&self, campaign: CampaignId) -> bool {
        match self {
            Visibility::Unrestricted => true,
            Visibility::Campaigns(ids) => ids.contains(&campaign),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Visibility::Unrestricted)
    }
}

/// Receives progress from long-running operations (cascading deletes, bulk writes).
pub trait ProgressSink {
    fn set_operation(&mut self, operation: &str);
    fn set_progress(&mut self, done: usize, total: usize);
}

/// Optional progress sink. Reporting is a no-op when none is attached.
#[derive(Default)]
pub struct Progress {
    sink: Option<Box<dyn ProgressSink + Send>>,
}

impl Progress {
    pub(crate) fn begin(&mut self, operation: &str) {
        if let Some(sink) = self.sink.as_mut() {
            sink.set_operation(operation);
        }
    }

    pub(crate) fn step(&mut self, done: usize, total: usize) {
        if let Some(sink) = self.sink.as_mut() {
            sink.set_progress(done, total);
        }
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("attached", &self.sink.is_some())
            .finish()
    }
}

/// Per-session memo of `(record, attribute, value_key)` triples known to be stored.
///
/// A hit lets a write report "already present" without touching the store. A miss
/// proves nothing: the store's uniqueness constraint remains the authority.
#[derive(Debug, Default, Clone)]
pub struct RedundancyMemo {
    known: HashSet<(RecordId, AttributeId, String)>,
}

impl RedundancyMemo {
    pub fn contains(&self, record: RecordId, attribute: AttributeId, key: &str) -> bool {
        self.known.contains(&(record, attribute, key.to_string()))
    }

    pub fn remember(&mut self, record: RecordId, attribute: AttributeId, key: String) {
        self.known.insert((record, attribute, key));
    }

    pub fn forget(&mut self, record: RecordId, attribute: AttributeId, key: &str) {
        self.known.remove(&(record, attribute, key.to_string()));
    }

    /// Drop every entry for one attribute of one record.
    pub fn forget_attribute(&mut self, record: RecordId, attribute: AttributeId) {
        self.known
            .retain(|(r, a, _)| !(*r == record && *a == attribute));
    }

    /// Drop every entry for the given records.
    pub fn forget_records(&mut self, records: &[RecordId]) {
        if records.is_empty() {
            return;
        }
        let gone: HashSet<RecordId> = records.iter().copied().collect();
        self.known.retain(|(r, _, _)| !gone.contains(r));
    }

    pub fn clear(&mut self) {
        self.known.clear();
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

/// Session-scoped engine state. See the module docs.
///
/// Fields are crate-visible so commands can borrow them independently inside a
/// transaction closure.
#[derive(Debug)]
pub struct Session {
    pub(crate) db: Arc<Database>,
    pub(crate) visibility: Visibility,
    pub(crate) registry: Option<Arc<AttributeRegistry>>,
    pub(crate) memo: RedundancyMemo,
    pub(crate) progress: Progress,
}

impl Session {
    /// A session that sees every campaign.
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_visibility(db, Visibility::Unrestricted)
    }

    pub fn with_visibility(db: Arc<Database>, visibility: Visibility) -> Self {
        Self {
            db,
            visibility,
            registry: None,
            memo: RedundancyMemo::default(),
            progress: Progress::default(),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    pub fn set_visibility(&mut self, visibility: Visibility) {
        self.visibility = visibility;
    }

    /// The visibility an operation runs under. Privileged callers see everything.
    pub(crate) fn scope(&self, privileged: bool) -> &Visibility {
        if privileged {
            &UNRESTRICTED
        } else {
            &self.visibility
        }
    }

    /// The attribute registry, loading it on first use.
    pub fn registry(&mut self) -> Result<Arc<AttributeRegistry>> {
        if let Some(registry) = &self.registry {
            return Ok(Arc::clone(registry));
        }
        let registry = Arc::new(self.db.read("load attribute registry", |conn| {
            AttributeRegistry::load(conn)
        })?);
        self.registry = Some(Arc::clone(&registry));
        Ok(registry)
    }

    /// Forget the cached registry. The next lookup reloads it from the store.
    pub fn invalidate_registry(&mut self) {
        if self.registry.take().is_some() {
            debug!("attribute registry invalidated");
        }
    }

    pub fn redundancy_memo(&self) -> &RedundancyMemo {
        &self.memo
    }

    /// Reset the memo of known values, e.g. after a bulk change made by another session.
    pub fn clear_redundancy_memo(&mut self) {
        debug!(entries = self.memo.len(), "redundancy memo cleared");
        self.memo.clear();
    }

    pub fn set_progress_sink(&mut self, sink: Box<dyn ProgressSink + Send>) {
        self.progress.sink = Some(sink);
    }

    pub fn clear_progress_sink(&mut self) {
        self.progress.sink = None;
    }
}
