pub mod in_memory_store;
pub mod migrations;
pub mod repository;
pub mod sqlite_store;
pub mod upgrade_log;

pub use in_memory_store::InMemoryUpgradeLogStore;
pub use repository::UpgradeLogRepository;
pub use sqlite_store::{ScriptSummary, SqliteUpgradeLogStore};
pub use upgrade_log::{UPGRADE_SCRIPT_IS_NULL, UpgradeLog};
