//! # API Facade
//!
//! The API layer is a **thin facade** over the command layer. It serves as the single
//! entry point for all spectra operations, regardless of the client (CLI, REST
//! binding, GUI) in front of it.
//!
//! ## Role and Responsibilities
//!
//! The API facade:
//! - **Owns the [`Session`]**: one `SpectraApi` per request-handling thread, all sharing
//!   one `Arc<Database>`
//! - **Dispatches** to the appropriate command function
//! - **Normalizes inputs** (field lists given as any string type, JSON predicates)
//! - **Returns structured types** (`Result<T>`)
//!
//! ## What the API Does NOT Do
//!
//! - **Business logic**: That belongs in `commands/*.rs`
//! - **I/O operations**: No stdout, stderr, or file formatting
//! - **Presentation concerns**: Returns data structures, not strings
//!
//! ## Testing Strategy
//!
//! API tests should verify that each method reaches its command with the arguments
//! intact. Command behavior is tested in the command modules; end-to-end scenarios live
//! in `tests/`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::attributes::{AttrValue, Attribute, AttributeSpec, Category};
use crate::commands::campaigns::CampaignUpdate;
use crate::commands::conflicts::ConflictTable;
use crate::commands::eav::EavEntry;
use crate::commands::records::RecordUpdate;
use crate::commands::sort::SortGroup;
use crate::commands::{self, DeleteReport, WriteOutcome};
use crate::error::Result;
use crate::model::{
    AttributeId, BrowseEntry, Campaign, CampaignId, EavId, HierarchyNode, Link, NewCampaign,
    NewRecord, NodeId, Record, RecordId, SpectralNode, TaxonomyId, TaxonomyNode,
};
use crate::query::{Predicate, Query};
use crate::session::{ProgressSink, Session, Visibility};
use crate::store::Database;

/// The main API facade for spectra operations.
///
/// All clients should interact through this API.
#[derive(Debug)]
pub struct SpectraApi {
    session: Session,
}

impl SpectraApi {
    /// A facade with unrestricted visibility.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            session: Session::new(db),
        }
    }

    pub fn with_visibility(db: Arc<Database>, visibility: Visibility) -> Self {
        Self {
            session: Session::with_visibility(db, visibility),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn database(&self) -> &Arc<Database> {
        self.session.database()
    }

    pub fn set_visibility(&mut self, visibility: Visibility) {
        self.session.set_visibility(visibility);
    }

    pub fn set_progress_sink(&mut self, sink: Box<dyn ProgressSink + Send>) {
        self.session.set_progress_sink(sink);
    }

    /// Forget every value this session remembered as stored.
    pub fn clear_redundancy_memo(&mut self) {
        self.session.clear_redundancy_memo();
    }

    /// Rebuild the attribute registry on next use.
    pub fn invalidate_registry(&mut self) {
        self.session.invalidate_registry();
    }

    // --- attributes ---

    pub fn define_category(&mut self, name: &str) -> Result<Category> {
        commands::attributes::define_category(&mut self.session, name)
    }

    pub fn define_attribute(&mut self, spec: &AttributeSpec) -> Result<Attribute> {
        commands::attributes::define_attribute(&mut self.session, spec)
    }

    pub fn list_attributes(&mut self) -> Result<Vec<Attribute>> {
        commands::attributes::list(&mut self.session)
    }

    pub fn resolve_attribute(&mut self, name: &str) -> Result<Attribute> {
        commands::attributes::resolve(&mut self.session, name)
    }

    pub fn resolve_attribute_id(&mut self, id: AttributeId) -> Result<Attribute> {
        commands::attributes::resolve_id(&mut self.session, id)
    }

    pub fn categories(&mut self) -> Result<Vec<Category>> {
        commands::attributes::categories(&mut self.session)
    }

    pub fn attributes_in_category(&mut self, category: &str) -> Result<Vec<Attribute>> {
        commands::attributes::in_category(&mut self.session, category)
    }

    pub fn default_unit(&mut self, attribute: &str) -> Result<Option<String>> {
        commands::attributes::default_unit(&mut self.session, attribute)
    }

    // --- EAV values ---

    pub fn get_values(&mut self, records: &[RecordId], attribute: &str) -> Result<Vec<EavEntry>> {
        commands::eav::get_values(&mut self.session, records, attribute)
    }

    pub fn first_values(
        &mut self,
        records: &[RecordId],
        attribute: &str,
    ) -> Result<Vec<Option<AttrValue>>> {
        commands::eav::first_values(&mut self.session, records, attribute)
    }

    pub fn set_value(
        &mut self,
        records: &[RecordId],
        attribute: &str,
        value: &AttrValue,
        previous: Option<&AttrValue>,
    ) -> Result<Vec<WriteOutcome>> {
        commands::eav::set_value(&mut self.session, records, attribute, value, previous)
    }

    pub fn remove_values(
        &mut self,
        records: &[RecordId],
        attribute: &str,
        value: Option<&AttrValue>,
    ) -> Result<usize> {
        commands::eav::remove_values(&mut self.session, records, attribute, value)
    }

    pub fn remove_entries(&mut self, entries: &[EavId]) -> Result<usize> {
        commands::eav::remove_entries(&mut self.session, entries)
    }

    pub fn count_existing(&mut self, attribute: AttributeId, records: &[RecordId]) -> Result<u64> {
        commands::eav::count_existing(&mut self.session, attribute, records)
    }

    pub fn filter_by_presence(
        &mut self,
        records: &[RecordId],
        attribute: &str,
        present: bool,
    ) -> Result<Vec<RecordId>> {
        commands::eav::filter_by_presence(&mut self.session, records, attribute, present)
    }

    pub fn filter_by_value(
        &mut self,
        records: &[RecordId],
        attribute: &str,
        value: &AttrValue,
    ) -> Result<Vec<RecordId>> {
        commands::eav::filter_by_value(&mut self.session, records, attribute, value)
    }

    pub fn sort_by_attributes<I: AsRef<str>>(
        &mut self,
        records: &[RecordId],
        attributes: &[I],
    ) -> Result<Vec<SortGroup>> {
        let names: Vec<&str> = attributes.iter().map(AsRef::as_ref).collect();
        commands::sort::sort_by_attributes(&mut self.session, records, &names)
    }

    // --- queries ---

    pub fn execute_query(&mut self, query: &Query) -> Result<Vec<RecordId>> {
        commands::query::execute(&mut self.session, query)
    }

    /// Parse a JSON query and execute it.
    pub fn execute_query_json(&mut self, raw: &str) -> Result<Vec<RecordId>> {
        let query = Query::from_json(raw)?;
        commands::query::execute(&mut self.session, &query)
    }

    pub fn execute_count(&mut self, predicate: Option<&Predicate>) -> Result<u64> {
        commands::query::count(&mut self.session, predicate)
    }

    // --- conflicts ---

    pub fn detect_conflicts<I: AsRef<str>>(
        &mut self,
        records: &[RecordId],
        fields: &[I],
    ) -> Result<ConflictTable> {
        let names: Vec<&str> = fields.iter().map(AsRef::as_ref).collect();
        commands::conflicts::detect_conflicts(&mut self.session, records, &names)
    }

    pub fn detect_all_conflicts(&mut self, records: &[RecordId]) -> Result<ConflictTable> {
        commands::conflicts::detect_all_conflicts(&mut self.session, records)
    }

    // --- campaigns ---

    pub fn insert_campaign(&mut self, campaign: &NewCampaign) -> Result<Campaign> {
        commands::campaigns::insert_campaign(&mut self.session, campaign)
    }

    pub fn get_campaign(&self, id: CampaignId) -> Result<Campaign> {
        commands::campaigns::get_campaign(&self.session, id)
    }

    pub fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        commands::campaigns::list_campaigns(&self.session)
    }

    pub fn update_campaign(&mut self, id: CampaignId, update: &CampaignUpdate) -> Result<Campaign> {
        commands::campaigns::update_campaign(&mut self.session, id, update)
    }

    pub fn delete_campaign(&mut self, id: CampaignId, privileged: bool) -> Result<DeleteReport> {
        commands::campaigns::delete_campaign(&mut self.session, id, privileged)
    }

    // --- hierarchy ---

    pub fn get_or_create_child(
        &mut self,
        campaign: CampaignId,
        parent: Option<NodeId>,
        name: &str,
    ) -> Result<NodeId> {
        commands::hierarchy::get_or_create_child(&mut self.session, campaign, parent, name)
    }

    pub fn ensure_path(&mut self, campaign: CampaignId, path: &str) -> Result<NodeId> {
        commands::hierarchy::ensure_path(&mut self.session, campaign, path)
    }

    pub fn find_child(
        &self,
        campaign: CampaignId,
        parent: Option<NodeId>,
        name: &str,
    ) -> Result<Option<NodeId>> {
        commands::hierarchy::find_child(&self.session, campaign, parent, name)
    }

    pub fn get_node(&self, id: NodeId) -> Result<HierarchyNode> {
        commands::hierarchy::get_node(&self.session, id)
    }

    pub fn parent_of(&self, id: NodeId) -> Result<Option<NodeId>> {
        commands::hierarchy::parent_of(&self.session, id)
    }

    pub fn child_nodes(
        &self,
        campaign: CampaignId,
        parent: Option<NodeId>,
    ) -> Result<Vec<HierarchyNode>> {
        commands::hierarchy::child_nodes(&self.session, campaign, parent)
    }

    pub fn node_path(&self, id: NodeId) -> Result<String> {
        commands::hierarchy::node_path(&self.session, id)
    }

    pub fn delete_node(&mut self, id: NodeId, privileged: bool) -> Result<DeleteReport> {
        commands::hierarchy::delete_node(&mut self.session, id, privileged)
    }

    // --- records ---

    pub fn insert_record(&mut self, record: &NewRecord) -> Result<Record> {
        commands::records::insert_record(&mut self.session, record)
    }

    pub fn get_record(&self, id: RecordId) -> Result<Record> {
        commands::records::get_record(&self.session, id)
    }

    pub fn copy_record(
        &mut self,
        id: RecordId,
        target: Option<NodeId>,
        with_metadata: bool,
    ) -> Result<Record> {
        commands::records::copy_record(&mut self.session, id, target, with_metadata)
    }

    pub fn delete_record(&mut self, id: RecordId, privileged: bool) -> Result<()> {
        commands::records::delete_record(&mut self.session, id, privileged)
    }

    pub fn update_records_field(
        &mut self,
        records: &[RecordId],
        update: RecordUpdate,
    ) -> Result<usize> {
        commands::records::update_records_field(&mut self.session, records, update)
    }

    pub fn calibration_ids(&self, records: &[RecordId]) -> Result<Vec<i64>> {
        commands::records::calibration_ids(&self.session, records)
    }

    // --- generic browsing ---

    pub fn children(&self, node: SpectralNode) -> Result<Vec<BrowseEntry>> {
        commands::browse::children(&self.session, node)
    }

    pub fn records_under(&self, node: SpectralNode) -> Result<Vec<RecordId>> {
        commands::browse::records_under(&self.session, node)
    }

    pub fn remove(&mut self, node: SpectralNode, privileged: bool) -> Result<DeleteReport> {
        commands::browse::remove(&mut self.session, node, privileged)
    }

    // --- links ---

    pub fn link_targets_to_references(
        &mut self,
        target: RecordId,
        references: &[RecordId],
    ) -> Result<usize> {
        commands::links::link_targets_to_references(&mut self.session, target, references)
    }

    pub fn get_links(
        &self,
        target: Option<RecordId>,
        reference: Option<RecordId>,
    ) -> Result<Vec<Link>> {
        commands::links::get_links(&self.session, target, reference)
    }

    pub fn delete_links_by_target(&mut self, target: RecordId) -> Result<usize> {
        commands::links::delete_links_by_target(&mut self.session, target)
    }

    pub fn remove_link(&mut self, target: RecordId, reference: RecordId) -> Result<bool> {
        commands::links::remove_link(&mut self.session, target, reference)
    }

    // --- taxonomy ---

    pub fn insert_taxonomy_node(
        &mut self,
        attribute: &str,
        parent: Option<TaxonomyId>,
        name: &str,
        code: Option<&str>,
    ) -> Result<TaxonomyId> {
        commands::taxonomy::insert_node(&mut self.session, attribute, parent, name, code)
    }

    pub fn taxonomy_node(&self, id: TaxonomyId) -> Result<TaxonomyNode> {
        commands::taxonomy::node(&self.session, id)
    }

    pub fn taxonomy_roots(&mut self, attribute: &str) -> Result<Vec<TaxonomyNode>> {
        commands::taxonomy::roots(&mut self.session, attribute)
    }

    pub fn taxonomy_children(&self, id: TaxonomyId) -> Result<Vec<TaxonomyNode>> {
        commands::taxonomy::children(&self.session, id)
    }

    pub fn taxonomy_id(&mut self, attribute: &str, name: &str) -> Result<TaxonomyId> {
        commands::taxonomy::id_by_name(&mut self.session, attribute, name)
    }

    pub fn taxonomy_name_map(&mut self, attribute: &str) -> Result<BTreeMap<TaxonomyId, String>> {
        commands::taxonomy::name_map(&mut self.session, attribute)
    }

    pub fn taxonomy_path(&self, id: TaxonomyId) -> Result<Vec<TaxonomyNode>> {
        commands::taxonomy::path(&self.session, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::ValueKind;
    use crate::error::SpectraError;
    use crate::query::Field;

    fn api() -> SpectraApi {
        let db = Database::open_in_memory().unwrap();
        SpectraApi::new(Arc::new(db))
    }

    #[test]
    fn test_field_lists_accept_owned_strings() {
        let mut api = api();
        api.define_attribute(&AttributeSpec::new("height", ValueKind::Integer))
            .unwrap();
        let campaign = api.insert_campaign(&NewCampaign::new("C")).unwrap();
        let node = api.ensure_path(campaign.id, "Root").unwrap();
        let r = api.insert_record(&NewRecord::new(node)).unwrap().id;
        api.set_value(&[r], "height", &AttrValue::integer(3), None)
            .unwrap();

        let fields = vec!["height".to_string(), "node_id".to_string()];
        let table = api.detect_conflicts(&[r], &fields).unwrap();
        assert_eq!(table.len(), 2);

        let groups = api.sort_by_attributes(&[r], &fields[..1]).unwrap();
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn test_json_queries_are_parsed_before_execution() {
        let mut api = api();
        assert!(matches!(
            api.execute_query_json("{not json"),
            Err(SpectraError::InvalidPredicate(_))
        ));
        assert!(api.execute_query_json("{}").unwrap().is_empty());
    }

    #[test]
    fn test_visibility_is_applied_per_facade() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mut admin = SpectraApi::new(db.clone());
        let campaign = admin.insert_campaign(&NewCampaign::new("C")).unwrap();

        let guest = SpectraApi::with_visibility(db, Visibility::campaigns([]));
        assert!(guest.get_campaign(campaign.id).is_err());
        assert_eq!(admin.list_campaigns().unwrap().len(), 1);
    }

    #[test]
    fn test_ordering_by_unknown_attribute_is_rejected() {
        let mut api = api();
        let query = Query::all().order_by(Field::attr("missing"));
        assert!(matches!(
            api.execute_query(&query),
            Err(SpectraError::InvalidPredicate(_))
        ));
    }
}
