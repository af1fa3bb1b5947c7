//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StoreContext};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        conn.execute_batch(CATALOG_SCHEMA)
            .during("create catalog tables")?;
        conn.execute_batch(CAMPAIGN_SCHEMA)
            .during("create campaign tables")?;
        conn.execute_batch(METADATA_SCHEMA)
            .during("create metadata tables")?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .during("create schema_version table")?;

    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .during("read schema version")?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])
        .during("clear schema version")?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .during("set schema version")?;
    Ok(())
}

/// Attribute definitions, categories and taxonomy vocabularies.
const CATALOG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS category (
    category_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS attribute (
    attribute_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    category_id INTEGER REFERENCES category(category_id),
    default_unit TEXT,
    description TEXT
);

CREATE TABLE IF NOT EXISTS taxonomy (
    taxonomy_id INTEGER PRIMARY KEY AUTOINCREMENT,
    attribute_id INTEGER NOT NULL REFERENCES attribute(attribute_id),
    parent_id INTEGER REFERENCES taxonomy(taxonomy_id),
    name TEXT NOT NULL,
    code TEXT,
    description TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS taxonomy_sibling_name
    ON taxonomy(attribute_id, IFNULL(parent_id, 0), name);
CREATE INDEX IF NOT EXISTS taxonomy_parent ON taxonomy(parent_id);
"#;

/// Research groups, campaigns and the hierarchy tree.
const CAMPAIGN_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS research_group (
    research_group_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS research_group_member (
    research_group_id INTEGER NOT NULL REFERENCES research_group(research_group_id),
    member_id INTEGER NOT NULL,
    PRIMARY KEY (research_group_id, member_id)
);

CREATE TABLE IF NOT EXISTS campaign (
    campaign_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    path TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    investigator_id INTEGER,
    research_group_id INTEGER NOT NULL REFERENCES research_group(research_group_id)
);

CREATE TABLE IF NOT EXISTS campaign_path (
    campaign_id INTEGER NOT NULL REFERENCES campaign(campaign_id),
    path TEXT NOT NULL,
    PRIMARY KEY (campaign_id, path)
);

CREATE TABLE IF NOT EXISTS hierarchy_node (
    node_id INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id INTEGER NOT NULL REFERENCES campaign(campaign_id),
    parent_id INTEGER REFERENCES hierarchy_node(node_id),
    name TEXT NOT NULL
);

-- Root nodes have a NULL parent; IFNULL keeps them unique per campaign too.
CREATE UNIQUE INDEX IF NOT EXISTS hierarchy_node_sibling_name
    ON hierarchy_node(campaign_id, IFNULL(parent_id, 0), name);
CREATE INDEX IF NOT EXISTS hierarchy_node_parent ON hierarchy_node(parent_id);
"#;

/// Records, their EAV values and target/reference links.
const METADATA_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS record (
    record_id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id INTEGER NOT NULL REFERENCES hierarchy_node(node_id),
    campaign_id INTEGER NOT NULL REFERENCES campaign(campaign_id),
    owner_id INTEGER,
    measurement_ref TEXT,
    calibration_id INTEGER,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS record_node ON record(node_id);
CREATE INDEX IF NOT EXISTS record_campaign ON record(campaign_id);

CREATE TABLE IF NOT EXISTS eav_value (
    eav_id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id INTEGER NOT NULL REFERENCES record(record_id),
    attribute_id INTEGER NOT NULL REFERENCES attribute(attribute_id),
    text_val TEXT,
    int_val INTEGER,
    real_val REAL,
    datetime_val TEXT,
    taxonomy_id INTEGER REFERENCES taxonomy(taxonomy_id),
    binary_val BLOB,
    unit TEXT,
    value_key TEXT NOT NULL,
    UNIQUE (record_id, attribute_id, value_key)
);

CREATE INDEX IF NOT EXISTS eav_value_attribute ON eav_value(attribute_id, record_id);

CREATE TABLE IF NOT EXISTS target_reference_link (
    target_id INTEGER NOT NULL REFERENCES record(record_id),
    reference_id INTEGER NOT NULL REFERENCES record(record_id),
    PRIMARY KEY (target_id, reference_id)
);

CREATE INDEX IF NOT EXISTS target_reference_link_reference
    ON target_reference_link(reference_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn sibling_names_are_unique_for_root_nodes() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO research_group (name) VALUES ('g');
             INSERT INTO campaign (name, research_group_id) VALUES ('c', 1);
             INSERT INTO hierarchy_node (campaign_id, parent_id, name) VALUES (1, NULL, 'A');",
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO hierarchy_node (campaign_id, parent_id, name) VALUES (1, NULL, 'A')",
            [],
        );
        assert!(dup.is_err());
    }
}
