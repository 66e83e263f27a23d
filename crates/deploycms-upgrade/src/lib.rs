pub mod manager;
pub mod registry;
pub mod runner;
pub mod script;

pub use manager::{RunOutcome, UpgradeScriptManager};
pub use registry::ScriptRegistry;
pub use runner::{DeploymentReport, DeploymentRunner, ScriptFailure};
pub use script::{RunMode, ScriptMetadata, UpgradeScript};
