//! Campaign lifecycle.
//!
//! Creating a campaign allocates its research group (the access-control boundary).
//! Deleting one cascades through every root node it owns, then removes its path
//! aliases, the campaign row and finally the group.

use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::commands::helpers::{require_campaign, OptionalContext};
use crate::commands::hierarchy::cascade_delete;
use crate::commands::DeleteReport;
use crate::error::{EntityKind, Result, SpectraError, StoreContext};
use crate::model::{Campaign, CampaignId, NewCampaign, NodeId, ResearchGroup, ResearchGroupId};
use crate::session::{Session, Visibility};

/// Partial update of a campaign. `None` leaves a field unchanged; `known_paths` and
/// `members` replace the stored sets wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignUpdate {
    pub name: Option<String>,
    pub path: Option<String>,
    pub description: Option<String>,
    pub known_paths: Option<Vec<String>>,
    pub members: Option<Vec<i64>>,
}

pub fn insert_campaign(session: &mut Session, new: &NewCampaign) -> Result<Campaign> {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(SpectraError::InvalidArgument(
            "campaign name cannot be empty".into(),
        ));
    }

    let campaign = session.db.write("insert campaign", |tx| {
        tx.execute("INSERT INTO research_group (name) VALUES (?)", [name])
            .during("insert research group")?;
        let group = ResearchGroupId(tx.last_insert_rowid());
        if let Some(investigator) = new.investigator_id {
            replace_members(tx, group, &[investigator])?;
        }

        tx.execute(
            "INSERT INTO campaign (name, path, description, investigator_id, research_group_id)
             VALUES (?, ?, ?, ?, ?)",
            params![name, new.path, new.description, new.investigator_id, group],
        )
        .during("insert campaign")?;
        let id = CampaignId(tx.last_insert_rowid());

        let mut paths = new.known_paths.clone();
        if !new.path.is_empty() {
            paths.push(new.path.clone());
        }
        replace_paths(tx, id, &paths)?;

        load_campaign(tx, id)?.ok_or_else(|| SpectraError::not_found(EntityKind::Campaign, id))
    })?;

    info!(campaign = %campaign.id, name = %campaign.name, "campaign created");
    Ok(campaign)
}

fn replace_paths(tx: &Transaction<'_>, id: CampaignId, paths: &[String]) -> Result<()> {
    tx.execute("DELETE FROM campaign_path WHERE campaign_id = ?", [id])
        .during("replace campaign paths")?;
    for path in paths.iter().filter(|p| !p.is_empty()) {
        tx.execute(
            "INSERT OR IGNORE INTO campaign_path (campaign_id, path) VALUES (?, ?)",
            params![id, path],
        )
        .during("replace campaign paths")?;
    }
    Ok(())
}

fn replace_members(tx: &Transaction<'_>, group: ResearchGroupId, members: &[i64]) -> Result<()> {
    tx.execute(
        "DELETE FROM research_group_member WHERE research_group_id = ?",
        [group],
    )
    .during("replace group members")?;
    for member in members {
        tx.execute(
            "INSERT OR IGNORE INTO research_group_member (research_group_id, member_id)
             VALUES (?, ?)",
            params![group, member],
        )
        .during("replace group members")?;
    }
    Ok(())
}

fn load_campaign(conn: &Connection, id: CampaignId) -> Result<Option<Campaign>> {
    let row = conn
        .query_row(
            "SELECT c.name, c.path, c.description, c.investigator_id, g.research_group_id, g.name
             FROM campaign c
             JOIN research_group g ON g.research_group_id = c.research_group_id
             WHERE c.campaign_id = ?",
            [id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, ResearchGroupId>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional_during("get campaign")?;
    let Some((name, path, description, investigator_id, group_id, group_name)) = row else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare("SELECT path FROM campaign_path WHERE campaign_id = ? ORDER BY path")
        .during("get campaign paths")?;
    let known_paths = stmt
        .query_map([id], |row| row.get(0))
        .during("get campaign paths")?
        .collect::<rusqlite::Result<Vec<String>>>()
        .during("get campaign paths")?;

    let mut stmt = conn
        .prepare(
            "SELECT member_id FROM research_group_member
             WHERE research_group_id = ? ORDER BY member_id",
        )
        .during("get group members")?;
    let members = stmt
        .query_map([group_id], |row| row.get(0))
        .during("get group members")?
        .collect::<rusqlite::Result<Vec<i64>>>()
        .during("get group members")?;

    Ok(Some(Campaign {
        id,
        name,
        path,
        description,
        investigator_id,
        known_paths,
        research_group: ResearchGroup {
            id: group_id,
            name: group_name,
            members,
        },
    }))
}

pub fn get_campaign(session: &Session, id: CampaignId) -> Result<Campaign> {
    session.db.read("get campaign", |conn| {
        require_campaign(conn, &session.visibility, id)?;
        load_campaign(conn, id)?.ok_or_else(|| SpectraError::not_found(EntityKind::Campaign, id))
    })
}

/// Every visible campaign, in id order.
pub fn list_campaigns(session: &Session) -> Result<Vec<Campaign>> {
    session.db.read("list campaigns", |conn| {
        let mut stmt = conn
            .prepare("SELECT campaign_id FROM campaign ORDER BY campaign_id")
            .during("list campaigns")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, CampaignId>(0))
            .during("list campaigns")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .during("list campaigns")?;

        let mut campaigns = Vec::new();
        for id in ids.into_iter().filter(|id| session.visibility.allows(*id)) {
            if let Some(campaign) = load_campaign(conn, id)? {
                campaigns.push(campaign);
            }
        }
        Ok(campaigns)
    })
}

pub fn update_campaign(
    session: &mut Session,
    id: CampaignId,
    update: &CampaignUpdate,
) -> Result<Campaign> {
    if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(SpectraError::InvalidArgument(
            "campaign name cannot be empty".into(),
        ));
    }
    let visibility = &session.visibility;
    session.db.write("update campaign", |tx| {
        require_campaign(tx, visibility, id)?;
        let op = format!("update campaign {}", id);
        if let Some(name) = &update.name {
            tx.execute(
                "UPDATE campaign SET name = ? WHERE campaign_id = ?",
                params![name.trim(), id],
            )
            .during(&op)?;
        }
        if let Some(path) = &update.path {
            tx.execute(
                "UPDATE campaign SET path = ? WHERE campaign_id = ?",
                params![path, id],
            )
            .during(&op)?;
            tx.execute(
                "INSERT OR IGNORE INTO campaign_path (campaign_id, path) VALUES (?, ?)",
                params![id, path],
            )
            .during(&op)?;
        }
        if let Some(description) = &update.description {
            tx.execute(
                "UPDATE campaign SET description = ? WHERE campaign_id = ?",
                params![description, id],
            )
            .during(&op)?;
        }
        if let Some(paths) = &update.known_paths {
            replace_paths(tx, id, paths)?;
        }
        if let Some(members) = &update.members {
            let group: ResearchGroupId = tx
                .query_row(
                    "SELECT research_group_id FROM campaign WHERE campaign_id = ?",
                    [id],
                    |row| row.get(0),
                )
                .during(&op)?;
            replace_members(tx, group, members)?;
        }
        load_campaign(tx, id)?.ok_or_else(|| SpectraError::not_found(EntityKind::Campaign, id))
    })
}

/// Delete a campaign and everything it owns. `privileged` bypasses the session's
/// visibility.
pub fn delete_campaign(
    session: &mut Session,
    id: CampaignId,
    privileged: bool,
) -> Result<DeleteReport> {
    let visibility: Visibility = session.scope(privileged).clone();
    let progress = &mut session.progress;
    let report = session.db.write("delete campaign", |tx| {
        require_campaign(tx, &visibility, id)?;

        let mut stmt = tx
            .prepare(
                "SELECT node_id FROM hierarchy_node
                 WHERE campaign_id = ? AND parent_id IS NULL ORDER BY node_id",
            )
            .during("list root nodes")?;
        let roots = stmt
            .query_map([id], |row| row.get::<_, NodeId>(0))
            .during("list root nodes")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .during("list root nodes")?;
        drop(stmt);

        let mut report = DeleteReport::default();
        for root in roots {
            report.absorb(cascade_delete(tx, root, progress)?);
        }

        let (nodes, records): (i64, i64) = tx
            .query_row(
                "SELECT
                    (SELECT COUNT(*) FROM hierarchy_node WHERE campaign_id = ?1),
                    (SELECT COUNT(*) FROM record WHERE campaign_id = ?1)",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .during("check campaign references")?;
        if nodes > 0 || records > 0 {
            return Err(SpectraError::integrity(
                "delete campaign",
                format!(
                    "campaign {} still owns {} node(s) and {} record(s) after cascade",
                    id, nodes, records
                ),
            ));
        }

        let group: ResearchGroupId = tx
            .query_row(
                "SELECT research_group_id FROM campaign WHERE campaign_id = ?",
                [id],
                |row| row.get(0),
            )
            .during("delete campaign")?;
        tx.execute("DELETE FROM campaign_path WHERE campaign_id = ?", [id])
            .during("delete campaign paths")?;
        tx.execute("DELETE FROM campaign WHERE campaign_id = ?", [id])
            .during("delete campaign")?;
        tx.execute(
            "DELETE FROM research_group_member WHERE research_group_id = ?",
            [group],
        )
        .during("delete group members")?;
        tx.execute(
            "DELETE FROM research_group WHERE research_group_id = ?",
            [group],
        )
        .during("delete research group")?;

        report.campaigns.push(id);
        Ok(report)
    })?;

    session.memo.forget_records(&report.records);
    info!(
        campaign = %id,
        nodes = report.nodes.len(),
        records = report.records.len(),
        "campaign deleted"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::hierarchy;
    use crate::test_utils::{ProgressLog, TestEnv};

    #[test]
    fn delete_reports_progress_per_root() {
        let mut env = TestEnv::new();
        hierarchy::ensure_path(&mut env.session, env.campaign, "Second/Inner").unwrap();
        env.record();

        let log = ProgressLog::attach(&mut env.session);
        let report = delete_campaign(&mut env.session, env.campaign, false).unwrap();
        assert_eq!(report.nodes.len(), 3);
        assert_eq!(
            log.events(),
            vec![
                "Deleting hierarchy",
                "1/1",
                "Deleting hierarchy",
                "1/2",
                "2/2"
            ]
        );
    }

    #[test]
    fn insert_allocates_group_and_paths() {
        let mut env = TestEnv::empty();
        let campaign = insert_campaign(
            &mut env.session,
            &NewCampaign::new("Alps")
                .with_path("/data/alps")
                .with_description("summer survey")
                .with_investigator(12),
        )
        .unwrap();

        assert_eq!(campaign.name, "Alps");
        assert_eq!(campaign.known_paths, vec!["/data/alps".to_string()]);
        assert_eq!(campaign.research_group.members, vec![12]);
        assert_eq!(get_campaign(&env.session, campaign.id).unwrap(), campaign);
    }

    #[test]
    fn list_respects_visibility() {
        let mut env = TestEnv::empty();
        let a = insert_campaign(&mut env.session, &NewCampaign::new("A")).unwrap();
        let b = insert_campaign(&mut env.session, &NewCampaign::new("B")).unwrap();
        assert_eq!(list_campaigns(&env.session).unwrap().len(), 2);

        env.session.set_visibility(Visibility::campaigns([b.id]));
        let visible: Vec<_> = list_campaigns(&env.session)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(visible, vec![b.id]);
        assert!(get_campaign(&env.session, a.id).is_err());
    }

    #[test]
    fn update_replaces_paths_and_members() {
        let mut env = TestEnv::new();
        let updated = update_campaign(
            &mut env.session,
            env.campaign,
            &CampaignUpdate {
                description: Some("revised".into()),
                known_paths: Some(vec!["/a".into(), "/b".into()]),
                members: Some(vec![5, 6]),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(updated.description, "revised");
        assert_eq!(updated.known_paths, vec!["/a".to_string(), "/b".to_string()]);
        assert_eq!(updated.research_group.members, vec![5, 6]);
    }

    #[test]
    fn delete_cascades_and_removes_group() {
        let mut env = TestEnv::new();
        let leaf = hierarchy::ensure_path(&mut env.session, env.campaign, "A/B").unwrap();
        env.record_under(leaf);
        env.record();

        let report = delete_campaign(&mut env.session, env.campaign, false).unwrap();
        assert_eq!(report.campaigns, vec![env.campaign]);
        assert_eq!(report.records.len(), 2);

        assert!(matches!(
            get_campaign(&env.session, env.campaign),
            Err(SpectraError::NotFound {
                kind: EntityKind::Campaign,
                ..
            })
        ));
        for table in [
            "hierarchy_node",
            "record",
            "campaign_path",
            "research_group",
            "research_group_member",
        ] {
            assert_eq!(env.count(table), 0, "{} not empty", table);
        }
    }

    #[test]
    fn unknown_campaign_is_not_found() {
        let mut env = TestEnv::empty();
        assert!(matches!(
            delete_campaign(&mut env.session, CampaignId(77), true),
            Err(SpectraError::NotFound { .. })
        ));
    }
}
