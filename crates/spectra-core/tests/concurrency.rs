use spectra_core::api::SpectraApi;
use spectra_core::attributes::{AttrValue, AttributeSpec, ValueKind};
use spectra_core::config::SpectraConfig;
use spectra_core::model::{NewCampaign, NewRecord};
use spectra_core::store::Database;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

const WORKERS: usize = 8;

#[test]
fn test_concurrent_child_creation_yields_one_node() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let mut api = SpectraApi::new(db.clone());
    let campaign = api.insert_campaign(&NewCampaign::new("C")).unwrap();
    let root = api.get_or_create_child(campaign.id, None, "Root").unwrap();

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let db = db.clone();
            thread::spawn(move || {
                let mut api = SpectraApi::new(db);
                api.get_or_create_child(campaign.id, Some(root), "Plot 7")
                    .unwrap()
            })
        })
        .collect();
    let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(api.child_nodes(campaign.id, Some(root)).unwrap().len(), 1);
}

#[test]
fn test_separate_handles_on_one_file_suppress_duplicates() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("spectra.db");
    let config = SpectraConfig::default();

    let mut setup = SpectraApi::new(Arc::new(Database::open(&path, &config).unwrap()));
    setup
        .define_attribute(&AttributeSpec::new("species", ValueKind::Text))
        .unwrap();
    let campaign = setup.insert_campaign(&NewCampaign::new("C")).unwrap();
    let node = setup.ensure_path(campaign.id, "Root").unwrap();
    let record = setup.insert_record(&NewRecord::new(node)).unwrap().id;

    // every worker has its own connection and its own empty memo
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let path = path.clone();
            let config = config.clone();
            thread::spawn(move || {
                let db = Database::open(&path, &config).unwrap();
                let mut api = SpectraApi::new(Arc::new(db));
                api.set_value(&[record], "species", &AttrValue::text("oak"), None)
                    .unwrap()
            })
        })
        .collect();
    let inserted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|outcome| !outcome[0].is_already_present())
        .count();

    assert_eq!(inserted, 1);
    assert_eq!(setup.get_values(&[record], "species").unwrap().len(), 1);
}

#[test]
fn test_store_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("spectra.db");
    let config = SpectraConfig::default();

    let record = {
        let mut api = SpectraApi::new(Arc::new(Database::open(&path, &config).unwrap()));
        api.define_attribute(&AttributeSpec::new("height", ValueKind::Integer).with_unit("cm"))
            .unwrap();
        let campaign = api.insert_campaign(&NewCampaign::new("C")).unwrap();
        let node = api.ensure_path(campaign.id, "A/B").unwrap();
        let record = api.insert_record(&NewRecord::new(node)).unwrap().id;
        api.set_value(&[record], "height", &AttrValue::integer(42), None)
            .unwrap();
        record
    };

    let mut api = SpectraApi::new(Arc::new(Database::open(&path, &config).unwrap()));
    assert_eq!(api.default_unit("height").unwrap().as_deref(), Some("cm"));
    assert_eq!(
        api.first_values(&[record], "height").unwrap(),
        vec![Some(AttrValue::integer(42))]
    );
    let node = api.get_record(record).unwrap().node_id;
    assert_eq!(api.node_path(node).unwrap(), "A/B");
}
