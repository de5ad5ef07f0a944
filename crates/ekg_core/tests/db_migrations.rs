use ekg_core::db::migrations::latest_version;
use ekg_core::db::{open_db, open_db_in_memory, DbError};
use ekg_core::{SqliteGraphStore, StoreError};
use rusqlite::Connection;

const GRAPH_TABLES: &[&str] = &[
    "events",
    "entities",
    "entity_attributes",
    "corr_edges",
    "rel_edges",
    "derived_edges",
    "df_edges",
    "prune_runs",
];

#[test]
fn open_db_in_memory_creates_graph_schema() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    for table in GRAPH_TABLES {
        assert_table_exists(&conn, table);
    }
}

#[test]
fn reopening_a_graph_file_keeps_schema_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ekg.db");

    let first = open_db(&path).unwrap();
    assert_eq!(schema_version(&first), latest_version());
    drop(first);

    let second = open_db(&path).unwrap();
    assert_eq!(schema_version(&second), latest_version());
    assert_table_exists(&second, "df_edges");
}

#[test]
fn newer_schema_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn graph_store_refuses_unmigrated_connection() {
    let conn = Connection::open_in_memory().unwrap();

    let err = SqliteGraphStore::try_new(&conn).err().unwrap();
    assert!(matches!(
        err,
        StoreError::UninitializedConnection {
            actual_version: 0,
            ..
        }
    ));
}

#[test]
fn df_informative_flag_only_accepts_booleans() {
    let conn = open_db_in_memory().unwrap();
    let result = conn.execute(
        "INSERT INTO df_edges (source_event_id, target_event_id, entity_id, entity_type, informative)
         VALUES ('e1', 'e2', 'o1', 'order', 2);",
        [],
    );
    assert!(result.is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
