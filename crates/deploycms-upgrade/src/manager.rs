use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use deploycms_common::Result;
use deploycms_db::{UpgradeLog, UpgradeLogRepository};
use futures::FutureExt;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::script::UpgradeScript;

/// What `run_script_if_needed` did with a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The script was invoked and its attempt was saved.
    Executed(UpgradeLog),
    /// A prior attempt succeeded; nothing was invoked or written.
    AlreadyRun { script_name: String },
    /// No script was supplied. The log is a sentinel and was not saved.
    MissingScript(UpgradeLog),
}

impl RunOutcome {
    pub fn log(&self) -> Option<&UpgradeLog> {
        match self {
            Self::Executed(log) | Self::MissingScript(log) => Some(log),
            Self::AlreadyRun { .. } => None,
        }
    }

    pub fn was_executed(&self) -> bool {
        matches!(self, Self::Executed(_))
    }

    pub fn is_failure(&self) -> bool {
        self.log().is_some_and(|log| !log.success)
    }
}

enum Attempt {
    Finished(anyhow::Result<bool>),
    Panicked(String),
    TimedOut(Duration),
}

/// Decides whether upgrade scripts need to run, runs them in isolation, and
/// records every attempt in the log repository.
///
/// Script failures (errors, panics, timeouts) become failure logs. Repository
/// failures are returned to the caller untouched.
pub struct UpgradeScriptManager {
    repository: Arc<dyn UpgradeLogRepository>,
    timeout: Option<Duration>,
}

impl UpgradeScriptManager {
    pub fn new(repository: Arc<dyn UpgradeLogRepository>) -> Self {
        Self {
            repository,
            timeout: None,
        }
    }

    /// Fail any single script that runs longer than `timeout`.
    ///
    /// With a timeout set, each script runs on tokio's blocking pool so a
    /// script that blocks its thread is still cut off. A timed-out script is
    /// abandoned, not cancelled: it keeps its thread until it returns and its
    /// result is discarded.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn repository(&self) -> &dyn UpgradeLogRepository {
        self.repository.as_ref()
    }

    /// Stable identity of `script`, used as the idempotency key.
    pub fn get_script_name(script: &dyn UpgradeScript) -> &str {
        &script.metadata().name
    }

    /// Whether `run_script_if_needed` would invoke `script`.
    pub async fn needs_run(&self, script: &dyn UpgradeScript) -> Result<bool> {
        let name = Self::get_script_name(script);
        let logs = self.repository.get_logs(name).await?;

        if script.metadata().runs_every_time() {
            return Ok(true);
        }

        Ok(!logs.iter().any(|log| log.success))
    }

    pub async fn run_script_if_needed(
        &self,
        script: Option<&Arc<dyn UpgradeScript>>,
    ) -> Result<RunOutcome> {
        let Some(script) = script else {
            warn!("no upgrade script supplied");
            return Ok(RunOutcome::MissingScript(UpgradeLog::missing_script()));
        };

        if !self.needs_run(script.as_ref()).await? {
            let script_name = Self::get_script_name(script.as_ref()).to_string();
            info!("upgrade script {script_name} already run, skipping");
            return Ok(RunOutcome::AlreadyRun { script_name });
        }

        self.run_script(script).await.map(RunOutcome::Executed)
    }

    /// Run `script` unconditionally and save exactly one log for the attempt.
    pub async fn run_script(&self, script: &Arc<dyn UpgradeScript>) -> Result<UpgradeLog> {
        let name = Self::get_script_name(script.as_ref());
        info!("running upgrade script {name}");

        let log = match self.attempt(script).await {
            Attempt::Finished(Ok(true)) => {
                info!("upgrade script {name} succeeded");
                UpgradeLog::succeeded(name)
            }
            Attempt::Finished(Ok(false)) => {
                warn!("upgrade script {name} returned false");
                UpgradeLog::returned_false(name)
            }
            Attempt::Finished(Err(e)) => {
                warn!("upgrade script {name} failed: {e:#}");
                UpgradeLog::failed(name, format!("{e:#}"))
            }
            Attempt::Panicked(message) => {
                error!("upgrade script {name} panicked: {message}");
                UpgradeLog::failed(name, format!("upgrade script panicked: {message}"))
            }
            Attempt::TimedOut(limit) => {
                error!("upgrade script {name} timed out after {limit:?}");
                UpgradeLog::failed(name, format!("upgrade script timed out after {limit:?}"))
            }
        };

        self.repository.save_log(&log).await?;
        Ok(log)
    }

    async fn attempt(&self, script: &Arc<dyn UpgradeScript>) -> Attempt {
        if let Some(limit) = self.timeout {
            return self.attempt_with_deadline(script.clone(), limit).await;
        }

        let execution =
            AssertUnwindSafe(script.run_script(self.repository.as_ref())).catch_unwind();

        match execution.await {
            Ok(finished) => Attempt::Finished(finished),
            Err(payload) => Attempt::Panicked(panic_message(payload.as_ref())),
        }
    }

    async fn attempt_with_deadline(
        &self,
        script: Arc<dyn UpgradeScript>,
        limit: Duration,
    ) -> Attempt {
        let repository = self.repository.clone();
        let handle = Handle::current();
        let task = tokio::task::spawn_blocking(move || {
            handle.block_on(script.run_script(repository.as_ref()))
        });

        match tokio::time::timeout(limit, task).await {
            Ok(Ok(finished)) => Attempt::Finished(finished),
            Ok(Err(join_error)) if join_error.is_panic() => {
                Attempt::Panicked(panic_message(join_error.into_panic().as_ref()))
            }
            Ok(Err(join_error)) => Attempt::Panicked(join_error.to_string()),
            Err(_) => Attempt::TimedOut(limit),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
