use crate::attributes::{AttributeSpec, ValueKind};
use crate::commands::{attributes, campaigns, hierarchy, records};
use crate::model::{AttributeId, CampaignId, NewCampaign, NewRecord, NodeId, RecordId};
use crate::session::{ProgressSink, Session};
use crate::store::Database;
use std::sync::{Arc, Mutex};

/// An in-memory engine with a seeded catalog, one campaign and one root node.
pub struct TestEnv {
    pub session: Session,
    pub campaign: CampaignId,
    /// Root node "Root" of `campaign`.
    pub node: NodeId,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    /// Seeds the attributes
    ///
    /// | name        | kind     | category       |
    /// |-------------|----------|----------------|
    /// | species     | text     | Vegetation     |
    /// | height      | integer  | Vegetation     |
    /// | reflectance | real     | Optics (`%`)   |
    /// | acquired    | datetime |                |
    /// | land_cover  | taxonomy | Classification |
    /// | plot        | binary   |                |
    ///
    /// and campaign "C" with root node "Root".
    pub fn new() -> Self {
        let mut env = Self::empty();
        let specs = [
            AttributeSpec::new("species", ValueKind::Text).in_category("Vegetation"),
            AttributeSpec::new("height", ValueKind::Integer).in_category("Vegetation"),
            AttributeSpec::new("reflectance", ValueKind::Real)
                .in_category("Optics")
                .with_unit("%"),
            AttributeSpec::new("acquired", ValueKind::DateTime),
            AttributeSpec::new("land_cover", ValueKind::Taxonomy).in_category("Classification"),
            AttributeSpec::new("plot", ValueKind::Binary),
        ];
        for spec in &specs {
            attributes::define_attribute(&mut env.session, spec).expect("seed attribute");
        }
        let (campaign, node) = env.campaign_with_root(NewCampaign::new("C"), "Root");
        env.campaign = campaign;
        env.node = node;
        env
    }

    /// A fresh database with nothing in it. `campaign` and `node` are placeholders.
    pub fn empty() -> Self {
        let db = Database::open_in_memory().expect("open in-memory database");
        Self {
            session: Session::new(Arc::new(db)),
            campaign: CampaignId(0),
            node: NodeId(0),
        }
    }

    /// A new record under the root node.
    pub fn record(&mut self) -> RecordId {
        self.record_under(self.node)
    }

    pub fn record_under(&mut self, node: NodeId) -> RecordId {
        records::insert_record(&mut self.session, &NewRecord::new(node))
            .expect("insert record")
            .id
    }

    pub fn campaign_with_root(
        &mut self,
        campaign: NewCampaign,
        root: &str,
    ) -> (CampaignId, NodeId) {
        let campaign = campaigns::insert_campaign(&mut self.session, &campaign)
            .expect("insert campaign")
            .id;
        let node = hierarchy::get_or_create_child(&mut self.session, campaign, None, root)
            .expect("create root node");
        (campaign, node)
    }

    pub fn attribute_id(&mut self, name: &str) -> AttributeId {
        attributes::resolve(&mut self.session, name)
            .expect("seeded attribute")
            .id
    }

    /// Row count of a table, bypassing visibility.
    pub fn count(&self, table: &str) -> i64 {
        self.session
            .database()
            .read("count rows", |conn| {
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })
                .map_err(|e| crate::error::SpectraError::from_store("count rows", e))
            })
            .expect("count rows")
    }
}

/// Progress sink that keeps every event: operation names as given, steps as `done/total`.
#[derive(Clone, Default)]
pub struct ProgressLog(Arc<Mutex<Vec<String>>>);

impl ProgressLog {
    /// Attach a fresh log to `session` and return a handle to read it.
    pub fn attach(session: &mut Session) -> Self {
        let log = Self::default();
        session.set_progress_sink(Box::new(log.clone()));
        log
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().expect("progress log").clone()
    }
}

impl ProgressSink for ProgressLog {
    fn set_operation(&mut self, operation: &str) {
        self.0.lock().expect("progress log").push(operation.to_string());
    }

    fn set_progress(&mut self, done: usize, total: usize) {
        self.0
            .lock()
            .expect("progress log")
            .push(format!("{}/{}", done, total));
    }
}
