use async_trait::async_trait;
use deploycms_common::{Error, Result};
use std::sync::{Mutex, MutexGuard};

use crate::repository::UpgradeLogRepository;
use crate::upgrade_log::UpgradeLog;

/// Volatile log store for tests and dry runs.
#[derive(Default)]
pub struct InMemoryUpgradeLogStore {
    logs: Mutex<Vec<UpgradeLog>>,
}

impl InMemoryUpgradeLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing history.
    pub fn with_logs(logs: impl IntoIterator<Item = UpgradeLog>) -> Self {
        Self {
            logs: Mutex::new(logs.into_iter().collect()),
        }
    }

    pub fn all_logs(&self) -> Result<Vec<UpgradeLog>> {
        Ok(self.guard()?.clone())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.guard()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.guard()?.is_empty())
    }

    fn guard(&self) -> Result<MutexGuard<'_, Vec<UpgradeLog>>> {
        self.logs
            .lock()
            .map_err(|_| Error::Database("in-memory upgrade log lock poisoned".into()))
    }
}

#[async_trait]
impl UpgradeLogRepository for InMemoryUpgradeLogStore {
    async fn get_logs(&self, script_name: &str) -> Result<Vec<UpgradeLog>> {
        let mut logs: Vec<UpgradeLog> = self
            .guard()?
            .iter()
            .filter(|log| log.upgrade_script_name == script_name)
            .cloned()
            .collect();
        logs.sort_by_key(|log| log.run_at);
        Ok(logs)
    }

    async fn save_log(&self, log: &UpgradeLog) -> Result<()> {
        let mut logs = self.guard()?;
        if logs.iter().any(|existing| existing.id == log.id) {
            return Err(Error::Database(format!(
                "upgrade log {} already exists",
                log.id
            )));
        }
        logs.push(log.clone());
        Ok(())
    }
}
