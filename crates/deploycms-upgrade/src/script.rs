use async_trait::async_trait;
use deploycms_db::UpgradeLogRepository;
use serde::{Deserialize, Serialize};

/// Whether a script honours its own success history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Run until one attempt succeeds, then never again.
    #[default]
    Once,
    /// Run on every deployment regardless of prior success.
    EveryTime,
}

/// Identity and scheduling declared by the script author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptMetadata {
    /// Stable idempotency key. Renaming a script makes it look new.
    pub name: String,
    #[serde(default)]
    pub run_mode: RunMode,
}

impl ScriptMetadata {
    pub fn once(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run_mode: RunMode::Once,
        }
    }

    pub fn every_time(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run_mode: RunMode::EveryTime,
        }
    }

    pub fn runs_every_time(&self) -> bool {
        self.run_mode == RunMode::EveryTime
    }
}

/// A data migration applied to the CMS content store.
///
/// `run_script` returns `Ok(true)` when the migration applied, `Ok(false)` when
/// it decided it could not apply, and `Err` on unexpected failure. Partial side
/// effects of a failing script are the script's own concern.
#[async_trait]
pub trait UpgradeScript: Send + Sync {
    fn metadata(&self) -> &ScriptMetadata;

    async fn run_script(&self, logs: &dyn UpgradeLogRepository) -> anyhow::Result<bool>;
}
