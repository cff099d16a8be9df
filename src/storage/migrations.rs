//! Database migrations for feedsync

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Initial schema (v1): pending mutations and API usage
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sync_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            action_type TEXT NOT NULL
                CHECK (action_type IN ('read', 'unread', 'star', 'unstar')),
            remote_item_id TEXT NOT NULL,
            sync_attempts INTEGER NOT NULL DEFAULT 0 CHECK (sync_attempts >= 0),
            created_at TEXT NOT NULL,
            last_attempt_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_sync_queue_drain
            ON sync_queue(sync_attempts, created_at);

        -- One row per service per UTC day. Zone columns stay NULL until reported.
        CREATE TABLE IF NOT EXISTS api_usage (
            service TEXT NOT NULL,
            date TEXT NOT NULL,
            count INTEGER NOT NULL DEFAULT 0,
            zone1_usage INTEGER,
            zone1_limit INTEGER,
            zone2_usage INTEGER,
            zone2_limit INTEGER,
            reset_after_seconds INTEGER,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (service, date)
        );

        INSERT INTO schema_version (version) VALUES (1);
        "#,
    )?;
    Ok(())
}

/// Conflict audit log (v2)
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS conflict_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            sync_session_id TEXT NOT NULL,
            entity_id INTEGER NOT NULL,
            remote_id TEXT NOT NULL,
            conflict_type TEXT NOT NULL,
            local_value TEXT NOT NULL,
            remote_value TEXT NOT NULL,
            resolution TEXT NOT NULL,
            last_local_update TEXT,
            last_remote_known_update TEXT,
            note TEXT NOT NULL DEFAULT ''
        );

        CREATE INDEX IF NOT EXISTS idx_conflict_log_session
            ON conflict_log(sync_session_id);

        INSERT INTO schema_version (version) VALUES (2);
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('sync_queue', 'api_usage', 'conflict_log')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }
}
