use async_trait::async_trait;
use deploycms_common::Result;

use crate::upgrade_log::UpgradeLog;

/// Persistence of upgrade script execution history.
///
/// Implementations serialize their own writes. Errors returned here are
/// infrastructure failures and are never absorbed by the script manager.
#[async_trait]
pub trait UpgradeLogRepository: Send + Sync {
    /// All recorded attempts for `script_name`, successful or not, oldest first.
    async fn get_logs(&self, script_name: &str) -> Result<Vec<UpgradeLog>>;

    /// Append one attempt to the history.
    async fn save_log(&self, log: &UpgradeLog) -> Result<()>;
}
