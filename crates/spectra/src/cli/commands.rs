//! # CLI Layer
//!
//! The CLI layer is the **only** place in the workspace that:
//! - Knows about terminal I/O (stdout, stderr)
//! - Installs a `tracing` subscriber
//! - Handles argument parsing
//!
//! ## Responsibilities
//!
//! 1. **Argument Parsing**: Convert shell arguments into typed commands via clap
//! 2. **Context Setup**: Load configuration and open the store via `init::initialize`
//! 3. **Dispatch**: Route each command to the matching API call
//! 4. **Output**: Print the result as pretty JSON

use super::setup::{Cli, Commands};
use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::{json, Value};
use spectra_core::api::SpectraApi;
use spectra_core::config::SpectraConfig;
use spectra_core::init::{data_dir, initialize, load_config, resolve_database_path};
use spectra_core::model::{CampaignId, NewCampaign, NodeId, RecordId, SpectralNode};
use spectra_core::query::Query;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let config = load_config(&cwd);
    init_logging(&config, cli.verbose);

    // config does not need an open store
    if let Commands::Config = cli.command {
        return print_json(&config_report(&config, &cwd, cli.db.as_deref())?);
    }

    let mut ctx = initialize(&cwd, cli.db.clone()).context("failed to open the store")?;
    debug!(path = %ctx.database_path.display(), "store ready");
    dispatch(&mut ctx.api, cli.command)
}

/// `-v` wins, then `RUST_LOG`, then the configured filter.
fn init_logging(config: &SpectraConfig, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter))
    };
    // stdout carries JSON only
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn dispatch(api: &mut SpectraApi, command: Commands) -> Result<()> {
    match command {
        Commands::Attributes { category } => {
            let attributes = match category {
                Some(category) => api.attributes_in_category(&category)?,
                None => api.list_attributes()?,
            };
            print_json(&attributes)
        }
        Commands::Campaigns => print_json(&api.list_campaigns()?),
        Commands::CreateCampaign {
            name,
            path,
            description,
        } => {
            let mut campaign = NewCampaign::new(name);
            if let Some(path) = path {
                campaign = campaign.with_path(path);
            }
            if let Some(description) = description {
                campaign = campaign.with_description(description);
            }
            print_json(&api.insert_campaign(&campaign)?)
        }
        Commands::Mkpath { campaign, path } => {
            let node = api.ensure_path(CampaignId(campaign), &path)?;
            print_json(&json!({ "node_id": node, "path": api.node_path(node)? }))
        }
        Commands::Tree { campaign } => {
            let root = SpectralNode::Campaign(CampaignId(campaign));
            let campaign = api.get_campaign(CampaignId(campaign))?;
            let children = tree(api, root)?;
            print_json(&json!({
                "id": campaign.id,
                "name": campaign.name,
                "children": children,
            }))
        }
        Commands::Query { json, count } => {
            let query = Query::from_json(&json)?;
            if count {
                let n = api.execute_count(query.predicate.as_ref())?;
                print_json(&json!({ "count": n }))
            } else {
                print_json(&api.execute_query(&query)?)
            }
        }
        Commands::Conflicts { records, fields } => {
            let records: Vec<RecordId> = records.into_iter().map(RecordId).collect();
            let table = if fields.is_empty() {
                api.detect_all_conflicts(&records)?
            } else {
                api.detect_conflicts(&records, &fields)?
            };
            print_json(&table)
        }
        Commands::DeleteNode { id, privileged } => {
            print_json(&api.delete_node(NodeId(id), privileged)?)
        }
        Commands::DeleteCampaign { id, privileged } => {
            print_json(&api.delete_campaign(CampaignId(id), privileged)?)
        }
        // handled before the store is opened
        Commands::Config => Ok(()),
    }
}

/// Nested browse entries below `node`. Records are leaves.
fn tree(api: &SpectraApi, node: SpectralNode) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    for entry in api.children(node)? {
        let mut value = serde_json::to_value(&entry)?;
        if let SpectralNode::Hierarchy(_) = entry.node {
            value["children"] = Value::Array(tree(api, entry.node)?);
        }
        out.push(value);
    }
    Ok(out)
}

fn config_report(config: &SpectraConfig, cwd: &Path, db: Option<&Path>) -> Result<Value> {
    let database_path = match db {
        Some(path) => resolve_database_path(path, cwd),
        None => resolve_database_path(Path::new(&config.database), &data_dir()?),
    };
    let mut report = serde_json::to_value(config)?;
    report["database_path"] = json!(database_path.display().to_string());
    Ok(report)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectra_core::store::Database;
    use std::sync::Arc;

    #[test]
    fn test_tree_nests_nodes_and_lists_records() {
        let mut api = SpectraApi::new(Arc::new(Database::open_in_memory().unwrap()));
        let campaign = api.insert_campaign(&NewCampaign::new("C")).unwrap();
        let leaf = api.ensure_path(campaign.id, "A/B").unwrap();
        api.insert_record(&spectra_core::model::NewRecord::new(leaf).with_measurement_ref("s1"))
            .unwrap();

        let tree = tree(&api, SpectralNode::Campaign(campaign.id)).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0]["name"], "A");
        let b = &tree[0]["children"][0];
        assert_eq!(b["name"], "B");
        assert_eq!(b["children"][0]["name"], "s1");
        assert_eq!(b["children"][0]["node"]["kind"], "record");
    }

    #[test]
    fn test_config_report_prefers_explicit_db() {
        let config = SpectraConfig::default();
        let report = config_report(&config, Path::new("/work"), Some(Path::new("x.db"))).unwrap();
        assert_eq!(report["database_path"], "/work/x.db");
        assert_eq!(report["journal_mode"], "WAL");
    }
}
