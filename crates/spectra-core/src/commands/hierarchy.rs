//! # Hierarchy Manager
//!
//! Hierarchy nodes are the folders of a campaign. A node has at most one parent (root
//! nodes have none) and sibling names are unique within a campaign. The tree stays
//! acyclic because a node can only be created under a parent that already exists, and
//! nodes are never re-parented.
//!
//! ## Idempotent Creation
//!
//! [`get_or_create_child`] inserts with `INSERT OR IGNORE` against the unique index on
//! `(campaign_id, IFNULL(parent_id, 0), name)` and then reads the id back, all inside
//! one transaction. Concurrent ingestion of the same path therefore converges on a
//! single node.
//!
//! ## Cascading Delete
//!
//! [`delete_node`] removes a whole subtree in one transaction:
//!
//! ```text
//! 1. Walk the subtree iteratively (pre-order), then reverse it so every node comes
//!    after all of its descendants.
//! 2. For each node in that order:
//!    a. delete its records (EAV entries, links, record rows)
//!    b. verify nothing still points at it (child nodes, records)
//!    c. delete the node row
//! ```
//!
//! A reference found in step 2b aborts the transaction with an integrity violation and
//! leaves the tree untouched.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::commands::helpers::{
    node_from_row, require_campaign, require_node, subtree, NODE_COLUMNS,
};
use crate::commands::records::{delete_record_rows, records_of_node};
use crate::commands::DeleteReport;
use crate::error::{EntityKind, Result, SpectraError, StoreContext};
use crate::model::{CampaignId, HierarchyNode, NodeId, RecordId};
use crate::session::{Progress, Session, Visibility, UNRESTRICTED};

fn check_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SpectraError::InvalidArgument(
            "hierarchy node name cannot be empty".into(),
        ));
    }
    if name.contains('/') {
        return Err(SpectraError::InvalidArgument(format!(
            "hierarchy node name '{}' cannot contain '/'",
            name
        )));
    }
    Ok(name)
}

/// A parent must exist, be visible and belong to the same campaign.
fn check_parent(
    conn: &Connection,
    visibility: &Visibility,
    campaign: CampaignId,
    parent: Option<NodeId>,
) -> Result<()> {
    require_campaign(conn, visibility, campaign)?;
    if let Some(parent) = parent {
        let node = require_node(conn, visibility, parent)?;
        if node.campaign_id != campaign {
            return Err(SpectraError::InvalidArgument(format!(
                "node {} belongs to campaign {}, not {}",
                parent, node.campaign_id, campaign
            )));
        }
    }
    Ok(())
}

fn lookup_child(
    conn: &Connection,
    campaign: CampaignId,
    parent: Option<NodeId>,
    name: &str,
) -> Result<Option<NodeId>> {
    conn.query_row(
        "SELECT node_id FROM hierarchy_node
         WHERE campaign_id = ? AND IFNULL(parent_id, 0) = IFNULL(?, 0) AND name = ?",
        params![campaign, parent, name],
        |row| row.get(0),
    )
    .optional()
    .during("find child node")
}

/// Return the id of `parent`'s child called `name`, creating it if needed.
/// `parent: None` addresses the campaign's root level.
pub fn get_or_create_child(
    session: &mut Session,
    campaign: CampaignId,
    parent: Option<NodeId>,
    name: &str,
) -> Result<NodeId> {
    let name = check_name(name)?;
    let visibility = &session.visibility;
    session.db.write("get or create child node", |tx| {
        check_parent(tx, visibility, campaign, parent)?;
        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO hierarchy_node (campaign_id, parent_id, name)
                 VALUES (?, ?, ?)",
                params![campaign, parent, name],
            )
            .during("create child node")?;
        if inserted == 1 {
            return Ok(NodeId(tx.last_insert_rowid()));
        }
        lookup_child(tx, campaign, parent, name)?.ok_or_else(|| {
            SpectraError::integrity(
                "get or create child node",
                format!("insert of '{}' was ignored but no such child exists", name),
            )
        })
    })
}

/// Create every missing component of a `/`-separated path below the campaign root and
/// return the last node.
pub fn ensure_path(session: &mut Session, campaign: CampaignId, path: &str) -> Result<NodeId> {
    let components: Vec<&str> = path.split('/').filter(|c| !c.trim().is_empty()).collect();
    if components.is_empty() {
        return Err(SpectraError::InvalidArgument(format!(
            "path '{}' names no hierarchy node",
            path
        )));
    }
    let mut parent = None;
    for component in components {
        parent = Some(get_or_create_child(session, campaign, parent, component)?);
    }
    parent.ok_or_else(|| SpectraError::InvalidArgument(path.to_string()))
}

/// Look up a child without creating it.
pub fn find_child(
    session: &Session,
    campaign: CampaignId,
    parent: Option<NodeId>,
    name: &str,
) -> Result<Option<NodeId>> {
    session.db.read("find child node", |conn| {
        check_parent(conn, &session.visibility, campaign, parent)?;
        lookup_child(conn, campaign, parent, name.trim())
    })
}

pub fn get_node(session: &Session, id: NodeId) -> Result<HierarchyNode> {
    session
        .db
        .read("get hierarchy node", |conn| require_node(conn, &session.visibility, id))
}

pub fn parent_of(session: &Session, id: NodeId) -> Result<Option<NodeId>> {
    Ok(get_node(session, id)?.parent_id)
}

/// Children of `parent` (root nodes when `None`), ordered by name.
pub fn child_nodes(
    session: &Session,
    campaign: CampaignId,
    parent: Option<NodeId>,
) -> Result<Vec<HierarchyNode>> {
    session.db.read("list child nodes", |conn| {
        check_parent(conn, &session.visibility, campaign, parent)?;
        list_children(conn, campaign, parent)
    })
}

pub(crate) fn list_children(
    conn: &Connection,
    campaign: CampaignId,
    parent: Option<NodeId>,
) -> Result<Vec<HierarchyNode>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM hierarchy_node
             WHERE campaign_id = ? AND IFNULL(parent_id, 0) = IFNULL(?, 0)
             ORDER BY name, node_id",
            NODE_COLUMNS
        ))
        .during("list child nodes")?;
    let nodes = stmt
        .query_map(params![campaign, parent], node_from_row)
        .during("list child nodes")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .during("list child nodes")?;
    Ok(nodes)
}

/// Names from the root node down to `id`, joined with `/`.
pub fn node_path(session: &Session, id: NodeId) -> Result<String> {
    session.db.read("resolve node path", |conn| {
        let mut node = require_node(conn, &session.visibility, id)?;
        let mut names = vec![node.name.clone()];
        let mut hops = 0usize;
        while let Some(parent) = node.parent_id {
            hops += 1;
            if hops > 10_000 {
                return Err(SpectraError::integrity(
                    "resolve node path",
                    format!("node {} has no root", id),
                ));
            }
            node = require_node(conn, &UNRESTRICTED, parent)?;
            names.push(node.name.clone());
        }
        names.reverse();
        Ok(names.join("/"))
    })
}

/// Delete `id` and everything below it. `privileged` bypasses the session's visibility.
pub fn delete_node(session: &mut Session, id: NodeId, privileged: bool) -> Result<DeleteReport> {
    let visibility = session.scope(privileged).clone();
    let progress = &mut session.progress;
    let report = session.db.write("delete hierarchy node", |tx| {
        require_node(tx, &visibility, id)?;
        cascade_delete(tx, id, progress)
    })?;
    session.memo.forget_records(&report.records);
    info!(
        node = %id,
        nodes = report.nodes.len(),
        records = report.records.len(),
        "hierarchy node deleted"
    );
    Ok(report)
}

/// Depth-first, post-order removal of the subtree at `root`. Must run inside the
/// caller's transaction.
pub(crate) fn cascade_delete(
    conn: &Connection,
    root: NodeId,
    progress: &mut Progress,
) -> Result<DeleteReport> {
    let mut order = subtree(conn, root)?;
    order.reverse();

    progress.begin("Deleting hierarchy");
    let total = order.len();
    let mut report = DeleteReport::default();
    for (done, node) in order.into_iter().enumerate() {
        let records: Vec<RecordId> = records_of_node(conn, node)?
            .into_iter()
            .map(|r| r.id)
            .collect();
        delete_record_rows(conn, &records)?;

        let (children, remaining): (i64, i64) = conn
            .query_row(
                "SELECT
                    (SELECT COUNT(*) FROM hierarchy_node WHERE parent_id = ?1),
                    (SELECT COUNT(*) FROM record WHERE node_id = ?1)",
                [node],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .during("check node references")?;
        if children > 0 || remaining > 0 {
            return Err(SpectraError::integrity(
                "delete hierarchy node",
                format!(
                    "node {} still has {} child node(s) and {} record(s)",
                    node, children, remaining
                ),
            ));
        }

        let removed = conn
            .execute("DELETE FROM hierarchy_node WHERE node_id = ?", [node])
            .during("delete hierarchy node")?;
        if removed != 1 {
            return Err(SpectraError::not_found(EntityKind::HierarchyNode, node));
        }
        report.nodes.push(node);
        report.records.extend(records);
        progress.step(done + 1, total);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttrValue;
    use crate::commands::{eav, records};
    use crate::model::NewRecord;
    use crate::test_utils::{ProgressLog, TestEnv};

    #[test]
    fn child_creation_is_idempotent() {
        let mut env = TestEnv::new();
        let first = get_or_create_child(&mut env.session, env.campaign, None, "X").unwrap();
        let second = get_or_create_child(&mut env.session, env.campaign, None, "X").unwrap();
        assert_eq!(first, second);

        let children = child_nodes(&env.session, env.campaign, None).unwrap();
        assert_eq!(children.iter().filter(|n| n.name == "X").count(), 1);
    }

    #[test]
    fn same_name_under_different_parents_is_allowed() {
        let mut env = TestEnv::new();
        let a = get_or_create_child(&mut env.session, env.campaign, None, "A").unwrap();
        let b = get_or_create_child(&mut env.session, env.campaign, None, "B").unwrap();
        let under_a = get_or_create_child(&mut env.session, env.campaign, Some(a), "X").unwrap();
        let under_b = get_or_create_child(&mut env.session, env.campaign, Some(b), "X").unwrap();
        assert_ne!(under_a, under_b);
        assert_eq!(parent_of(&env.session, under_b).unwrap(), Some(b));
    }

    #[test]
    fn parent_must_be_in_same_campaign() {
        let mut env = TestEnv::new();
        let (other, other_root) =
            env.campaign_with_root(crate::model::NewCampaign::new("Other"), "Root");
        let err =
            get_or_create_child(&mut env.session, env.campaign, Some(other_root), "X").unwrap_err();
        assert!(matches!(err, SpectraError::InvalidArgument(_)));
        assert!(get_or_create_child(&mut env.session, other, Some(other_root), "X").is_ok());
    }

    #[test]
    fn names_are_validated() {
        let mut env = TestEnv::new();
        for bad in ["", "  ", "a/b"] {
            assert!(matches!(
                get_or_create_child(&mut env.session, env.campaign, None, bad),
                Err(SpectraError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn ensure_path_and_node_path() {
        let mut env = TestEnv::new();
        let leaf = ensure_path(&mut env.session, env.campaign, "A/B/C").unwrap();
        assert_eq!(node_path(&env.session, leaf).unwrap(), "A/B/C");
        assert_eq!(ensure_path(&mut env.session, env.campaign, "/A/B/C/").unwrap(), leaf);

        let a = find_child(&env.session, env.campaign, None, "A").unwrap().unwrap();
        assert!(find_child(&env.session, env.campaign, Some(a), "Z")
            .unwrap()
            .is_none());
    }

    #[test]
    fn cascade_removes_subtree_records_and_metadata() {
        let mut env = TestEnv::new();
        let a = ensure_path(&mut env.session, env.campaign, "A").unwrap();
        let b = ensure_path(&mut env.session, env.campaign, "A/B").unwrap();
        let c = ensure_path(&mut env.session, env.campaign, "A/B/C").unwrap();
        let keep = ensure_path(&mut env.session, env.campaign, "Keep").unwrap();

        let mut doomed = Vec::new();
        for node in [a, b, c] {
            let r = records::insert_record(&mut env.session, &NewRecord::new(node))
                .unwrap()
                .id;
            eav::set_value(&mut env.session, &[r], "species", &AttrValue::text("oak"), None)
                .unwrap();
            doomed.push(r);
        }
        let kept = records::insert_record(&mut env.session, &NewRecord::new(keep))
            .unwrap()
            .id;

        let report = delete_node(&mut env.session, a, false).unwrap();
        assert_eq!(report.nodes, vec![c, b, a]);
        assert_eq!(report.records.len(), 3);

        for node in [a, b, c] {
            assert!(matches!(
                get_node(&env.session, node),
                Err(SpectraError::NotFound { .. })
            ));
        }
        for r in doomed {
            assert!(records::get_record(&env.session, r).is_err());
        }
        assert_eq!(env.count("eav_value"), 0);
        assert!(records::get_record(&env.session, kept).is_ok());
    }

    #[test]
    fn cascade_reports_one_step_per_node() {
        let mut env = TestEnv::new();
        let a = ensure_path(&mut env.session, env.campaign, "A").unwrap();
        let b = ensure_path(&mut env.session, env.campaign, "A/B").unwrap();
        env.record_under(b);
        ensure_path(&mut env.session, env.campaign, "A/C").unwrap();

        let log = ProgressLog::attach(&mut env.session);
        delete_node(&mut env.session, a, false).unwrap();
        assert_eq!(
            log.events(),
            vec!["Deleting hierarchy", "1/3", "2/3", "3/3"]
        );
    }

    #[test]
    fn cascade_leaves_tree_untouched_on_dangling_reference() {
        let mut env = TestEnv::new();
        let a = ensure_path(&mut env.session, env.campaign, "A").unwrap();
        let r = records::insert_record(&mut env.session, &NewRecord::new(a))
            .unwrap()
            .id;

        // record rows silently survive deletion, so the node keeps a reference
        env.session
            .database()
            .write("plant", |tx| {
                tx.execute(
                    "CREATE TEMP TRIGGER keep_record BEFORE DELETE ON record
                     BEGIN SELECT RAISE(IGNORE); END",
                    [],
                )
                .during("plant trigger")
            })
            .unwrap();

        let err = delete_node(&mut env.session, a, false).unwrap_err();
        assert!(matches!(err, SpectraError::IntegrityViolation { .. }));
        assert!(get_node(&env.session, a).is_ok());
        assert!(records::get_record(&env.session, r).is_ok());
    }

    #[test]
    fn unprivileged_delete_respects_visibility() {
        let mut env = TestEnv::new();
        let a = ensure_path(&mut env.session, env.campaign, "A").unwrap();
        env.session.set_visibility(Visibility::campaigns([]));

        assert!(matches!(
            delete_node(&mut env.session, a, false),
            Err(SpectraError::NotFound { .. })
        ));
        assert!(delete_node(&mut env.session, a, true).is_ok());
    }

    #[test]
    fn deep_trees_do_not_recurse() {
        let mut env = TestEnv::new();
        let mut parent = None;
        let mut first = None;
        for depth in 0..2000 {
            let id = get_or_create_child(
                &mut env.session,
                env.campaign,
                parent,
                &format!("d{}", depth),
            )
            .unwrap();
            first.get_or_insert(id);
            parent = Some(id);
        }
        let report = delete_node(&mut env.session, first.unwrap(), false).unwrap();
        assert_eq!(report.nodes.len(), 2000);
    }
}
