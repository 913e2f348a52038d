//! Database migrations

use crate::error::Result;
use crate::models::Collection;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Migration to version 1: entity tables
///
/// Every entity row keeps its replication metadata in columns and its full
/// flat JSON form in `data`.
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS families (
            local_id TEXT PRIMARY KEY,
            server_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            sync_status TEXT NOT NULL DEFAULT 'synced',
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_families_server ON families(server_id);

        CREATE TABLE IF NOT EXISTS members (
            local_id TEXT PRIMARY KEY,
            server_id TEXT NOT NULL,
            family_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            sync_status TEXT NOT NULL DEFAULT 'synced',
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_members_server ON members(server_id);
        CREATE INDEX IF NOT EXISTS idx_members_family ON members(family_id);

        CREATE TABLE IF NOT EXISTS lists (
            local_id TEXT PRIMARY KEY,
            server_id TEXT NOT NULL,
            family_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            sync_status TEXT NOT NULL DEFAULT 'synced',
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_lists_server ON lists(server_id);
        CREATE INDEX IF NOT EXISTS idx_lists_family ON lists(family_id);

        CREATE TABLE IF NOT EXISTS list_items (
            local_id TEXT PRIMARY KEY,
            server_id TEXT NOT NULL,
            list_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            sync_status TEXT NOT NULL DEFAULT 'synced',
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_list_items_server ON list_items(server_id);
        CREATE INDEX IF NOT EXISTS idx_list_items_list ON list_items(list_id);

        CREATE TABLE IF NOT EXISTS location_history (
            local_id TEXT PRIMARY KEY,
            server_id TEXT NOT NULL,
            user_id TEXT,
            timestamp INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            sync_status TEXT NOT NULL DEFAULT 'synced',
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_location_history_server ON location_history(server_id);
        CREATE INDEX IF NOT EXISTS idx_location_history_user
            ON location_history(user_id, timestamp DESC);

        CREATE TABLE IF NOT EXISTS geofences (
            local_id TEXT PRIMARY KEY,
            server_id TEXT NOT NULL,
            family_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            sync_status TEXT NOT NULL DEFAULT 'synced',
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_geofences_server ON geofences(server_id);
        CREATE INDEX IF NOT EXISTS idx_geofences_family ON geofences(family_id);

        INSERT INTO schema_version (version) VALUES (1);",
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: identity index
///
/// Replicas written before this version could hold several rows for one
/// server id. Keep the most recently updated row of each group, then make
/// the server id unique.
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    for collection in Collection::ALL {
        let table = collection.table();
        let removed = tx.execute(
            &format!(
                "DELETE FROM {table} WHERE local_id IN (
                    SELECT local_id FROM (
                        SELECT local_id, ROW_NUMBER() OVER (
                            PARTITION BY server_id
                            ORDER BY updated_at DESC, local_id DESC
                        ) AS position
                        FROM {table}
                    ) WHERE position > 1
                )"
            ),
            [],
        )?;
        if removed > 0 {
            tracing::warn!("Removed {removed} duplicate rows from {table}");
        }

        tx.execute_batch(&format!(
            "DROP INDEX IF EXISTS idx_{table}_server;
             CREATE UNIQUE INDEX IF NOT EXISTS uq_{table}_server_id ON {table}(server_id);"
        ))?;
    }

    tx.execute("INSERT INTO schema_version (version) VALUES (2)", [])?;
    tx.commit()?;

    tracing::info!("Migrated database to version 2");
    Ok(())
}

/// Migration to version 3: outbox, tombstones and sync bookkeeping
fn migrate_v3(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS outbox (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            local_id TEXT NOT NULL,
            server_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            queued_at INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        );
        CREATE UNIQUE INDEX IF NOT EXISTS uq_outbox_row ON outbox(collection, local_id);

        CREATE TABLE IF NOT EXISTS tombstones (
            collection TEXT NOT NULL,
            server_id TEXT NOT NULL,
            deleted_at INTEGER NOT NULL,
            recorded_at INTEGER NOT NULL,
            PRIMARY KEY (collection, server_id)
        );
        CREATE INDEX IF NOT EXISTS idx_tombstones_recorded ON tombstones(recorded_at);

        CREATE TABLE IF NOT EXISTS sync_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (3);",
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_migrations() {
        let mut conn = setup();
        run(&mut conn).unwrap();

        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
        for collection in Collection::ALL {
            assert!(table_exists(&conn, collection.table()));
        }
        assert!(table_exists(&conn, "outbox"));
        assert!(table_exists(&conn, "tombstones"));
        assert!(table_exists(&conn, "sync_meta"));
    }

    #[test]
    fn test_migrations_idempotent() {
        let mut conn = setup();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap();

        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_v2_keeps_newest_duplicate() {
        let mut conn = setup();
        migrate_v1(&mut conn).unwrap();

        for (local_id, updated_at) in [("a", 10), ("b", 30), ("c", 20)] {
            conn.execute(
                "INSERT INTO lists (local_id, server_id, family_id, created_at, updated_at, data)
                 VALUES (?1, 'dup', 'fam', 1, ?2, '{}')",
                rusqlite::params![local_id, updated_at],
            )
            .unwrap();
        }

        migrate_v2(&mut conn).unwrap();

        let survivors: Vec<String> = conn
            .prepare("SELECT local_id FROM lists")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(survivors, vec!["b".to_string()]);

        let duplicate = conn.execute(
            "INSERT INTO lists (local_id, server_id, family_id, created_at, updated_at, data)
             VALUES ('d', 'dup', 'fam', 1, 1, '{}')",
            [],
        );
        assert!(duplicate.is_err());
    }
}
