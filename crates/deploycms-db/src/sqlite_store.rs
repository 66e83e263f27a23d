use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use deploycms_common::{Error, Result, UpgradeLogId};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::migrations;
use crate::repository::UpgradeLogRepository;
use crate::upgrade_log::UpgradeLog;

const MAX_HISTORY_LIMIT: usize = 1000;

/// Per-script rollup of the stored history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSummary {
    pub upgrade_script_name: String,
    pub attempts: usize,
    pub ever_succeeded: bool,
    pub last_run_at: DateTime<Utc>,
    pub last_success: bool,
}

/// SQLite-backed upgrade log store. Insert-only.
pub struct SqliteUpgradeLogStore {
    conn: Mutex<Connection>,
}

impl SqliteUpgradeLogStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening upgrade log store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open upgrade log database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.connection()?;
        let applied = migrations::apply(&conn)?;
        if applied > 0 {
            debug!("applied {applied} upgrade log migration(s)");
        }
        Ok(())
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("upgrade log database lock poisoned".into()))
    }

    /// Most recent attempts across all scripts, newest first.
    pub fn recent_logs(&self, limit: usize) -> Result<Vec<UpgradeLog>> {
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT) as i64;
        let conn = self.connection()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, upgrade_script_name, success, exception, run_at
                 FROM upgrade_logs
                 ORDER BY run_at DESC
                 LIMIT ?1",
            )
            .map_err(|e| Error::Database(format!("failed to prepare history query: {e}")))?;

        let rows = stmt
            .query_map(params![limit], row_to_log)
            .map_err(|e| Error::Database(format!("failed to execute history query: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to collect history rows: {e}")))
    }

    pub fn script_summaries(&self) -> Result<Vec<ScriptSummary>> {
        let conn = self.connection()?;

        let mut stmt = conn
            .prepare(
                "SELECT l.upgrade_script_name,
                        COUNT(*),
                        MAX(l.success),
                        MAX(l.run_at),
                        (SELECT success FROM upgrade_logs latest
                          WHERE latest.upgrade_script_name = l.upgrade_script_name
                          ORDER BY latest.run_at DESC LIMIT 1)
                 FROM upgrade_logs l
                 GROUP BY l.upgrade_script_name
                 ORDER BY l.upgrade_script_name",
            )
            .map_err(|e| Error::Database(format!("failed to prepare summary query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                let last_run_at: String = row.get(3)?;
                Ok(ScriptSummary {
                    upgrade_script_name: row.get(0)?,
                    attempts: row.get::<_, i64>(1)? as usize,
                    ever_succeeded: row.get(2)?,
                    last_run_at: parse_timestamp(&last_run_at).map_err(to_sql_error)?,
                    last_success: row.get(4)?,
                })
            })
            .map_err(|e| Error::Database(format!("failed to execute summary query: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to collect summary rows: {e}")))
    }

    fn get_logs_sync(&self, script_name: &str) -> Result<Vec<UpgradeLog>> {
        debug!("loading upgrade logs for {script_name}");
        let conn = self.connection()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, upgrade_script_name, success, exception, run_at
                 FROM upgrade_logs
                 WHERE upgrade_script_name = ?1
                 ORDER BY run_at ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare log query: {e}")))?;

        let rows = stmt
            .query_map(params![script_name], row_to_log)
            .map_err(|e| Error::Database(format!("failed to execute log query: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to collect log rows: {e}")))
    }

    fn save_log_sync(&self, log: &UpgradeLog) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO upgrade_logs (id, upgrade_script_name, success, exception, run_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                log.id.as_str(),
                log.upgrade_script_name,
                log.success,
                log.exception,
                log.run_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )
        .map_err(|e| Error::Database(format!("failed to insert upgrade log: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl UpgradeLogRepository for SqliteUpgradeLogStore {
    async fn get_logs(&self, script_name: &str) -> Result<Vec<UpgradeLog>> {
        self.get_logs_sync(script_name)
    }

    async fn save_log(&self, log: &UpgradeLog) -> Result<()> {
        self.save_log_sync(log)
    }
}

fn row_to_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<UpgradeLog> {
    let id: String = row.get(0)?;
    let run_at: String = row.get(4)?;

    Ok(UpgradeLog {
        id: UpgradeLogId::from_str(id),
        upgrade_script_name: row.get(1)?,
        success: row.get(2)?,
        exception: row.get(3)?,
        run_at: parse_timestamp(&run_at).map_err(to_sql_error)?,
    })
}

fn to_sql_error(e: Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(e.to_string())))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }

    Err(Error::Database(format!("invalid timestamp format: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::SqliteUpgradeLogStore;
    use crate::repository::UpgradeLogRepository;
    use crate::upgrade_log::UpgradeLog;
    use chrono::{Duration, Utc};
    use deploycms_common::Error;

    #[test]
    fn in_memory_creates_upgrade_logs_table() {
        let store = SqliteUpgradeLogStore::in_memory().expect("failed to create store");
        let conn = store.connection().expect("lock should not be poisoned");
        let exists: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='upgrade_logs'",
                [],
                |row| row.get(0),
            )
            .expect("failed to query sqlite_master");

        assert_eq!(exists, 1);
    }

    #[tokio::test]
    async fn get_logs_filters_by_script_name() {
        let store = SqliteUpgradeLogStore::in_memory().expect("failed to create store");

        store
            .save_log(&UpgradeLog::succeeded("Site.SeedReferenceData"))
            .await
            .expect("save should succeed");
        store
            .save_log(&UpgradeLog::failed("Site.RenameAliases", "alias clash"))
            .await
            .expect("save should succeed");

        let logs = store
            .get_logs("Site.SeedReferenceData")
            .await
            .expect("get_logs should succeed");

        assert_eq!(logs.len(), 1);
        assert!(logs[0].success);
        assert!(logs[0].exception.is_none());
    }

    #[tokio::test]
    async fn saved_log_reads_back_unchanged() {
        let store = SqliteUpgradeLogStore::in_memory().expect("failed to create store");
        let log = UpgradeLog::failed("Site.Fails", "invalid program");

        store.save_log(&log).await.expect("save should succeed");
        let logs = store.get_logs("Site.Fails").await.expect("get_logs should succeed");

        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].id, log.id);
        assert_eq!(logs[0].exception.as_deref(), Some("invalid program"));
        assert_eq!(logs[0].run_at.timestamp(), log.run_at.timestamp());
    }

    #[tokio::test]
    async fn get_logs_returns_oldest_first() {
        let store = SqliteUpgradeLogStore::in_memory().expect("failed to create store");

        let mut older = UpgradeLog::returned_false("Site.Retry");
        older.run_at = Utc::now() - Duration::hours(2);
        let newer = UpgradeLog::succeeded("Site.Retry");

        store.save_log(&newer).await.expect("save should succeed");
        store.save_log(&older).await.expect("save should succeed");

        let logs = store.get_logs("Site.Retry").await.expect("get_logs should succeed");
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].id, older.id);
        assert_eq!(logs[1].id, newer.id);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let store = SqliteUpgradeLogStore::in_memory().expect("failed to create store");
        let log = UpgradeLog::succeeded("Site.Once");

        store.save_log(&log).await.expect("first save should succeed");
        let err = store
            .save_log(&log)
            .await
            .expect_err("saving the same id twice must fail");

        assert!(matches!(err, Error::Database(_)));
    }

    #[tokio::test]
    async fn script_summaries_roll_up_history() {
        let store = SqliteUpgradeLogStore::in_memory().expect("failed to create store");

        let mut first = UpgradeLog::failed("Site.Flaky", "timeout");
        first.run_at = Utc::now() - Duration::minutes(10);
        store.save_log(&first).await.expect("save should succeed");
        store
            .save_log(&UpgradeLog::succeeded("Site.Flaky"))
            .await
            .expect("save should succeed");
        store
            .save_log(&UpgradeLog::returned_false("Site.Never"))
            .await
            .expect("save should succeed");

        let summaries = store.script_summaries().expect("summaries should load");
        assert_eq!(summaries.len(), 2);

        let flaky = &summaries[0];
        assert_eq!(flaky.upgrade_script_name, "Site.Flaky");
        assert_eq!(flaky.attempts, 2);
        assert!(flaky.ever_succeeded);
        assert!(flaky.last_success);

        let never = &summaries[1];
        assert_eq!(never.upgrade_script_name, "Site.Never");
        assert!(!never.ever_succeeded);
    }

    #[tokio::test]
    async fn recent_logs_are_newest_first() {
        let store = SqliteUpgradeLogStore::in_memory().expect("failed to create store");

        let mut old = UpgradeLog::succeeded("Site.A");
        old.run_at = Utc::now() - Duration::days(1);
        store.save_log(&old).await.expect("save should succeed");
        let new = UpgradeLog::succeeded("Site.B");
        store.save_log(&new).await.expect("save should succeed");

        let recent = store.recent_logs(1).expect("history should load");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, new.id);
    }

    #[tokio::test]
    async fn open_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("logs.db");

        {
            let store = SqliteUpgradeLogStore::open(&path).expect("open should succeed");
            store
                .save_log(&UpgradeLog::succeeded("Site.Persisted"))
                .await
                .expect("save should succeed");
        }

        let reopened = SqliteUpgradeLogStore::open(&path).expect("reopen should succeed");
        let logs = reopened
            .get_logs("Site.Persisted")
            .await
            .expect("get_logs should succeed");
        assert_eq!(logs.len(), 1);
    }
}
