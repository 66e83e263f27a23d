use chrono::{DateTime, Utc};
use deploycms_common::UpgradeLogId;
use serde::{Deserialize, Serialize};

/// Exception text reported when no script was handed to the manager.
pub const UPGRADE_SCRIPT_IS_NULL: &str = "upgrade script is null";

/// Record of one execution attempt of an upgrade script.
///
/// Logs are append-only: once saved they are owned by the repository and
/// never updated or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeLog {
    pub id: UpgradeLogId,
    /// Stable script name; the idempotency key.
    pub upgrade_script_name: String,
    pub success: bool,
    /// Failure detail. Always `None` for successful runs and for scripts that
    /// reported `false` without erroring.
    pub exception: Option<String>,
    pub run_at: DateTime<Utc>,
}

impl UpgradeLog {
    fn new(
        upgrade_script_name: impl Into<String>,
        success: bool,
        exception: Option<String>,
    ) -> Self {
        Self {
            id: UpgradeLogId::new(),
            upgrade_script_name: upgrade_script_name.into(),
            success,
            exception,
            run_at: Utc::now(),
        }
    }

    pub fn succeeded(upgrade_script_name: impl Into<String>) -> Self {
        Self::new(upgrade_script_name, true, None)
    }

    pub fn returned_false(upgrade_script_name: impl Into<String>) -> Self {
        Self::new(upgrade_script_name, false, None)
    }

    pub fn failed(upgrade_script_name: impl Into<String>, exception: impl Into<String>) -> Self {
        Self::new(upgrade_script_name, false, Some(exception.into()))
    }

    /// Sentinel for a missing script. Never persisted.
    pub fn missing_script() -> Self {
        Self::new(String::new(), false, Some(UPGRADE_SCRIPT_IS_NULL.to_string()))
    }

    pub fn exception_text(&self) -> &str {
        self.exception.as_deref().unwrap_or_default()
    }
}
