//! Generic browsing and removal over [`SpectralNode`].
//!
//! Callers that walk the campaign → hierarchy → record tree without caring which level
//! they are on go through here; each function dispatches on the node's tag.

use crate::commands::helpers::{require_campaign, require_node, require_record, subtree};
use crate::commands::hierarchy::{self, list_children};
use crate::commands::records::{self, records_of_node};
use crate::commands::{campaigns, DeleteReport};
use crate::error::{Result, StoreContext};
use crate::model::{BrowseEntry, Record, RecordId, SpectralNode};
use crate::session::Session;

fn record_entry(record: Record) -> BrowseEntry {
    let name = record
        .measurement_ref
        .unwrap_or_else(|| format!("record {}", record.id));
    BrowseEntry {
        node: SpectralNode::Record(record.id),
        name,
    }
}

/// Direct children: root nodes of a campaign, or the child nodes and then the records
/// of a hierarchy node. Records have no children.
pub fn children(session: &Session, node: SpectralNode) -> Result<Vec<BrowseEntry>> {
    let visibility = &session.visibility;
    session.db.read("browse", |conn| match node {
        SpectralNode::Campaign(id) => {
            require_campaign(conn, visibility, id)?;
            Ok(list_children(conn, id, None)?
                .into_iter()
                .map(|n| BrowseEntry {
                    node: SpectralNode::Hierarchy(n.id),
                    name: n.name,
                })
                .collect())
        }
        SpectralNode::Hierarchy(id) => {
            let parent = require_node(conn, visibility, id)?;
            let nodes = list_children(conn, parent.campaign_id, Some(id))?
                .into_iter()
                .map(|n| BrowseEntry {
                    node: SpectralNode::Hierarchy(n.id),
                    name: n.name,
                });
            let records = records_of_node(conn, id)?.into_iter().map(record_entry);
            Ok(nodes.chain(records).collect())
        }
        SpectralNode::Record(id) => {
            require_record(conn, visibility, id)?;
            Ok(Vec::new())
        }
    })
}

/// Every record anywhere below `node`, in id order.
pub fn records_under(session: &Session, node: SpectralNode) -> Result<Vec<RecordId>> {
    let visibility = &session.visibility;
    session.db.read("collect records", |conn| {
        let mut ids = match node {
            SpectralNode::Campaign(id) => {
                require_campaign(conn, visibility, id)?;
                let mut stmt = conn
                    .prepare("SELECT record_id FROM record WHERE campaign_id = ?")
                    .during("collect records")?;
                let ids = stmt
                    .query_map([id], |row| row.get::<_, RecordId>(0))
                    .during("collect records")?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .during("collect records")?;
                ids
            }
            SpectralNode::Hierarchy(id) => {
                require_node(conn, visibility, id)?;
                let mut ids = Vec::new();
                for node in subtree(conn, id)? {
                    ids.extend(records_of_node(conn, node)?.into_iter().map(|r| r.id));
                }
                ids
            }
            SpectralNode::Record(id) => vec![require_record(conn, visibility, id)?.id],
        };
        ids.sort();
        Ok(ids)
    })
}

/// Delete `node` with everything it owns. `privileged` bypasses the session's
/// visibility.
pub fn remove(
    session: &mut Session,
    node: SpectralNode,
    privileged: bool,
) -> Result<DeleteReport> {
    match node {
        SpectralNode::Campaign(id) => campaigns::delete_campaign(session, id, privileged),
        SpectralNode::Hierarchy(id) => hierarchy::delete_node(session, id, privileged),
        SpectralNode::Record(id) => {
            records::delete_record(session, id, privileged)?;
            Ok(DeleteReport {
                records: vec![id],
                ..Default::default()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpectraError;
    use crate::model::NewRecord;
    use crate::test_utils::TestEnv;

    #[test]
    fn browses_each_level() {
        let mut env = TestEnv::new();
        let b = hierarchy::ensure_path(&mut env.session, env.campaign, "Root/B").unwrap();
        let a = hierarchy::ensure_path(&mut env.session, env.campaign, "Root/A").unwrap();
        let r = records::insert_record(
            &mut env.session,
            &NewRecord::new(env.node).with_measurement_ref("scan-1"),
        )
        .unwrap()
        .id;

        let top = children(&env.session, SpectralNode::Campaign(env.campaign)).unwrap();
        assert_eq!(
            top,
            vec![BrowseEntry {
                node: SpectralNode::Hierarchy(env.node),
                name: "Root".into()
            }]
        );

        let below: Vec<_> = children(&env.session, SpectralNode::Hierarchy(env.node))
            .unwrap()
            .into_iter()
            .map(|e| e.node)
            .collect();
        assert_eq!(
            below,
            vec![
                SpectralNode::Hierarchy(a),
                SpectralNode::Hierarchy(b),
                SpectralNode::Record(r)
            ]
        );
        assert!(children(&env.session, SpectralNode::Record(r))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn collects_records_through_the_subtree() {
        let mut env = TestEnv::new();
        let deep = hierarchy::ensure_path(&mut env.session, env.campaign, "Root/X/Y").unwrap();
        let top = env.record();
        let bottom = env.record_under(deep);

        assert_eq!(
            records_under(&env.session, SpectralNode::Campaign(env.campaign)).unwrap(),
            vec![top, bottom]
        );
        assert_eq!(
            records_under(&env.session, SpectralNode::Hierarchy(deep)).unwrap(),
            vec![bottom]
        );
        assert_eq!(
            records_under(&env.session, SpectralNode::Record(top)).unwrap(),
            vec![top]
        );
    }

    #[test]
    fn remove_dispatches_on_kind() {
        let mut env = TestEnv::new();
        let r = env.record();
        let report = remove(&mut env.session, SpectralNode::Record(r), false).unwrap();
        assert_eq!(report.records, vec![r]);

        let x = hierarchy::ensure_path(&mut env.session, env.campaign, "Root/X").unwrap();
        let report = remove(&mut env.session, SpectralNode::Hierarchy(x), false).unwrap();
        assert_eq!(report.nodes, vec![x]);

        let campaign = SpectralNode::Campaign(env.campaign);
        let report = remove(&mut env.session, campaign, false).unwrap();
        assert_eq!(report.campaigns, vec![env.campaign]);
        assert!(matches!(
            children(&env.session, SpectralNode::Campaign(env.campaign)),
            Err(SpectraError::NotFound { .. })
        ));
    }
}
