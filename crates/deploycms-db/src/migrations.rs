use deploycms_common::{Error, Result};
use rusqlite::{Connection, params};
use tracing::info;

/// Migration system for tracking and applying database schema changes.
///
/// Each migration has a version number and a SQL statement.
/// Migrations are applied in order and tracked in a `_migrations` table.
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const UPGRADE_LOG_SCHEMA_V1: Migration = Migration {
    version: 1,
    name: "upgrade_logs",
    sql: "CREATE TABLE IF NOT EXISTS upgrade_logs (
            id TEXT PRIMARY KEY,
            upgrade_script_name TEXT NOT NULL,
            success INTEGER NOT NULL,
            exception TEXT,
            run_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_upgrade_logs_script
            ON upgrade_logs(upgrade_script_name, run_at);",
};

pub const UPGRADE_LOG_SCHEMA_V2: Migration = Migration {
    version: 2,
    name: "upgrade_logs_run_at_index",
    sql: "CREATE INDEX IF NOT EXISTS idx_upgrade_logs_run_at
            ON upgrade_logs(run_at);",
};

pub const MIGRATIONS: &[Migration] = &[UPGRADE_LOG_SCHEMA_V1, UPGRADE_LOG_SCHEMA_V2];

/// Apply every migration newer than the highest recorded version.
/// Returns the number of migrations applied.
pub fn apply(conn: &Connection) -> Result<usize> {
    apply_migrations(conn, MIGRATIONS)
}

/// Each migration and its `_migrations` row commit together, so a failing
/// script leaves neither partial schema nor a version bump behind.
fn apply_migrations(conn: &Connection, migrations: &[Migration]) -> Result<usize> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| Error::Database(format!("failed to create migrations table: {e}")))?;

    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in migrations.iter().filter(|m| m.version > current) {
        info!(
            "applying migration {} ({})",
            migration.version, migration.name
        );
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::Database(format!("failed to begin migration: {e}")))?;
        tx.execute_batch(migration.sql).map_err(|e| {
            Error::Database(format!("migration {} failed: {e}", migration.name))
        })?;
        tx.execute(
            "INSERT INTO _migrations (version, name) VALUES (?, ?)",
            params![migration.version, migration.name],
        )
        .map_err(|e| Error::Database(format!("failed to record migration: {e}")))?;
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit migration: {e}")))?;
        applied += 1;
    }

    Ok(applied)
}

pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| Error::Database(format!("failed to read schema version: {e}")))
}

#[cfg(test)]
mod tests {
    use super::{MIGRATIONS, Migration, apply, apply_migrations, current_version};
    use rusqlite::Connection;

    #[test]
    fn migrations_are_strictly_ordered() {
        let versions: Vec<u32> = MIGRATIONS.iter().map(|m| m.version).collect();
        assert!(versions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn apply_is_idempotent() {
        let conn = Connection::open_in_memory().expect("failed to open in-memory database");

        let first = apply(&conn).expect("first apply should succeed");
        let second = apply(&conn).expect("second apply should succeed");

        assert_eq!(first, MIGRATIONS.len());
        assert_eq!(second, 0);
        assert_eq!(
            current_version(&conn).expect("version should be readable"),
            MIGRATIONS.last().map(|m| m.version).unwrap_or_default()
        );
    }

    #[test]
    fn failed_migration_rolls_back_completely() {
        let conn = Connection::open_in_memory().expect("failed to open in-memory database");
        apply(&conn).expect("baseline apply should succeed");
        let before = current_version(&conn).expect("version should be readable");

        let broken = [Migration {
            version: before + 1,
            name: "half_written",
            sql: "CREATE TABLE half_written (x INTEGER); CREATE TABLE",
        }];
        let result = apply_migrations(&conn, &broken);

        assert!(result.is_err());
        let leftover: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'half_written'",
                [],
                |row| row.get(0),
            )
            .expect("sqlite_master should be readable");
        assert_eq!(leftover, 0);
        assert_eq!(
            current_version(&conn).expect("version should be readable"),
            before
        );
    }
}
