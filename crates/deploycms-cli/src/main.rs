use std::process::ExitCode;

use deploycms_upgrade::ScriptRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Deployment projects build their own binary around `run_cli` with their
    // scripts registered; this one only inspects and reports history.
    deploycms_cli::run_cli(ScriptRegistry::new()).await
}
