use deploycms_common::{Error, Result};
use deploycms_config::RunnerConfig;
use deploycms_db::UpgradeLog;
use tracing::{info, warn};

use crate::manager::{RunOutcome, UpgradeScriptManager};
use crate::registry::ScriptRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFailure {
    pub script_name: String,
    /// Empty when the script reported `false` without erroring.
    pub exception: String,
}

#[derive(Debug, Clone, Default)]
pub struct DeploymentReport {
    pub executed: usize,
    pub succeeded: usize,
    pub already_run: usize,
    pub skipped: Vec<String>,
    /// Scripts a dry run found pending.
    pub pending: Vec<String>,
    /// Scripts never reached because an earlier one failed.
    pub not_attempted: Vec<String>,
    pub failures: Vec<ScriptFailure>,
    pub dry_run: bool,
}

impl DeploymentReport {
    fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    fn record(&mut self, log: &UpgradeLog) {
        self.executed += 1;
        if log.success {
            self.succeeded += 1;
        } else {
            self.failures.push(ScriptFailure {
                script_name: log.upgrade_script_name.clone(),
                exception: log.exception_text().to_string(),
            });
        }
    }

    pub fn print_summary(&self) {
        let mode = if self.dry_run { " (dry run)" } else { "" };
        println!("Upgrade Script Report{mode}");
        println!("─────────────────────");
        if self.dry_run {
            println!("  Pending:     {}", self.pending.len());
            for name in &self.pending {
                println!("    - {name}");
            }
        } else {
            println!(
                "  Executed:    {} ({} succeeded, {} failed)",
                self.executed,
                self.succeeded,
                self.failures.len()
            );
        }
        println!("  Already run: {}", self.already_run);
        if !self.skipped.is_empty() {
            println!("  Skipped:     {}", self.skipped.join(", "));
        }
        if !self.not_attempted.is_empty() {
            println!("  Not attempted: {}", self.not_attempted.join(", "));
        }
        if !self.failures.is_empty() {
            println!("  Failures ({}):", self.failures.len());
            for f in &self.failures {
                if f.exception.is_empty() {
                    println!("    - {} (returned false)", f.script_name);
                } else {
                    println!("    - {}: {}", f.script_name, f.exception);
                }
            }
        }
    }
}

/// Applies every registered script in order through the manager.
///
/// A failing script does not stop the ones after it unless `stop_on_failure`
/// is set. Repository errors always abort.
pub struct DeploymentRunner {
    manager: UpgradeScriptManager,
    skip: Vec<String>,
    stop_on_failure: bool,
    dry_run: bool,
}

impl DeploymentRunner {
    pub fn new(manager: UpgradeScriptManager) -> Self {
        Self {
            manager,
            skip: Vec::new(),
            stop_on_failure: false,
            dry_run: false,
        }
    }

    pub fn from_config(manager: UpgradeScriptManager, config: &RunnerConfig) -> Self {
        let manager = match config.script_timeout() {
            Some(limit) => manager.with_timeout(limit),
            None => manager,
        };

        Self {
            manager,
            skip: config.skip.clone(),
            stop_on_failure: config.stop_on_failure,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }

    pub fn skip(mut self, name: impl Into<String>) -> Self {
        self.skip.push(name.into());
        self
    }

    pub fn manager(&self) -> &UpgradeScriptManager {
        &self.manager
    }

    pub async fn run(&self, registry: &ScriptRegistry) -> Result<DeploymentReport> {
        let mut report = DeploymentReport::new(self.dry_run);
        let mut stopped = false;

        for script in registry.iter() {
            let name = UpgradeScriptManager::get_script_name(script.as_ref());

            if stopped {
                report.not_attempted.push(name.to_string());
                continue;
            }

            if self.skip.iter().any(|s| s == name) {
                info!("upgrade script {name} skipped by configuration");
                report.skipped.push(name.to_string());
                continue;
            }

            if self.dry_run {
                if self.manager.needs_run(script.as_ref()).await? {
                    report.pending.push(name.to_string());
                } else {
                    report.already_run += 1;
                }
                continue;
            }

            match self.manager.run_script_if_needed(Some(script)).await? {
                RunOutcome::Executed(log) => {
                    report.record(&log);
                    if !log.success && self.stop_on_failure {
                        warn!("stopping deployment after failed upgrade script {name}");
                        stopped = true;
                    }
                }
                RunOutcome::AlreadyRun { .. } => report.already_run += 1,
                RunOutcome::MissingScript(log) => report.record(&log),
            }
        }

        info!(
            "deployment finished: {} executed, {} failed, {} already run",
            report.executed,
            report.failures.len(),
            report.already_run
        );
        Ok(report)
    }

    /// Force one registered script to run again.
    pub async fn rerun(&self, registry: &ScriptRegistry, name: &str) -> Result<UpgradeLog> {
        let script = registry
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("upgrade script '{name}'")))?;
        self.manager.run_script(script).await
    }
}
