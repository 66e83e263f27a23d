use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use deploycms_config::{AppConfig, ConfigLoader};
use deploycms_db::{SqliteUpgradeLogStore, UpgradeLog, UpgradeLogRepository};
use deploycms_upgrade::{DeploymentRunner, RunMode, ScriptRegistry, UpgradeScriptManager};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt, reload};

#[derive(Parser)]
#[command(
    name = "deploycms",
    version,
    about = "deploycms - run one-time CMS upgrade scripts and track their history"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Directory holding config.yml / config.toml
    #[arg(long, global = true, env = "DEPLOYCMS_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Upgrade log database, overriding the configured path
    #[arg(long, global = true, env = "DEPLOYCMS_DB")]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every registered script that has not yet succeeded
    Run {
        /// Report what would run without executing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Force a registered script to run again
    Rerun { name: String },

    /// Show recorded upgrade attempts
    History {
        /// Only show attempts of this script
        name: Option<String>,

        #[arg(long, default_value = "20")]
        limit: NonZeroUsize,
    },

    /// Summarise the stored history per script
    Status,

    /// List registered scripts
    List,
}

/// Entry point for deployment binaries: parse arguments, set up logging and
/// run the requested command against `registry`.
pub async fn run_cli(registry: ScriptRegistry) -> Result<ExitCode> {
    let cli = Cli::parse();

    // RUST_LOG wins, then --log-level, then the config file once it is loaded.
    let env_filter = EnvFilter::try_from_default_env().ok();
    let env_pinned = env_filter.is_some();
    let initial = env_filter.unwrap_or_else(|| {
        EnvFilter::new(cli.log_level.as_deref().unwrap_or("info"))
    });
    let (filter, filter_handle) = reload::Layer::new(initial);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let (loader, config) = load_config(&cli)?;
    if let Some(level) = config_log_level(&cli, &config, env_pinned) {
        filter_handle.reload(EnvFilter::new(level))?;
    }

    if execute_with(cli, &loader, &config, &registry).await? {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Run an already parsed command. Logging is left to the caller.
/// Returns `false` when any upgrade attempt failed.
pub async fn execute(cli: Cli, registry: &ScriptRegistry) -> Result<bool> {
    let (loader, config) = load_config(&cli)?;
    execute_with(cli, &loader, &config, registry).await
}

/// Level from the config file, unless RUST_LOG or `--log-level` already chose one.
fn config_log_level<'a>(cli: &Cli, config: &'a AppConfig, env_pinned: bool) -> Option<&'a str> {
    if env_pinned || cli.log_level.is_some() {
        return None;
    }
    config.log_level.as_deref()
}

fn load_config(cli: &Cli) -> Result<(ConfigLoader, AppConfig)> {
    let loader = match &cli.config_dir {
        Some(dir) => ConfigLoader::with_dir(dir),
        None => ConfigLoader::new()?,
    };
    loader.ensure_dirs()?;
    let config = loader.load()?;
    Ok((loader, config))
}

async fn execute_with(
    cli: Cli,
    loader: &ConfigLoader,
    config: &AppConfig,
    registry: &ScriptRegistry,
) -> Result<bool> {
    let db_path = cli.db.clone().unwrap_or_else(|| loader.database_path(config));
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = Arc::new(SqliteUpgradeLogStore::open(&db_path)?);
    let manager = UpgradeScriptManager::new(store.clone());

    match cli.command {
        Commands::Run { dry_run } => {
            info!("running {} registered upgrade script(s)", registry.len());
            let report = DeploymentRunner::from_config(manager, &config.runner)
                .dry_run(dry_run)
                .run(registry)
                .await?;
            report.print_summary();
            return Ok(!report.has_failures());
        }
        Commands::Rerun { name } => {
            let log = DeploymentRunner::from_config(manager, &config.runner)
                .rerun(registry, &name)
                .await?;
            print_log(&log);
            return Ok(log.success);
        }
        Commands::History { name, limit } => {
            let logs = match name {
                Some(name) => {
                    let logs = store.get_logs(&name).await?;
                    let start = logs.len().saturating_sub(limit.get());
                    logs[start..].to_vec()
                }
                None => store.recent_logs(limit.get())?,
            };
            if logs.is_empty() {
                println!("No upgrade attempts recorded.");
            }
            for log in &logs {
                print_log(log);
            }
        }
        Commands::Status => {
            let summaries = store.script_summaries()?;
            println!("Upgrade script status:");
            if summaries.is_empty() && registry.is_empty() {
                println!("  (no history)");
            }
            for s in &summaries {
                let state = if s.ever_succeeded {
                    "applied".green()
                } else {
                    "pending".yellow()
                };
                println!(
                    "  {} [{}] - {} attempt(s), last {} at {}",
                    s.upgrade_script_name,
                    state,
                    s.attempts,
                    if s.last_success { "succeeded" } else { "failed" },
                    s.last_run_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            for script in registry.iter() {
                let name = UpgradeScriptManager::get_script_name(script.as_ref());
                if !summaries.iter().any(|s| s.upgrade_script_name == name) {
                    println!("  {} [{}] - never run", name, "pending".yellow());
                }
            }
        }
        Commands::List => {
            println!("Registered upgrade scripts:");
            if registry.is_empty() {
                println!("  (none)");
            }
            for script in registry.iter() {
                let mode = match script.metadata().run_mode {
                    RunMode::Once => "once",
                    RunMode::EveryTime => "every time",
                };
                println!("  {} ({})", script.metadata().name, mode);
            }
        }
    }

    Ok(true)
}

fn print_log(log: &UpgradeLog) {
    let status = if log.success {
        "ok".green()
    } else {
        "FAILED".red()
    };
    let mut line = format!(
        "{}  {}  {}  ({})",
        log.run_at.format("%Y-%m-%d %H:%M:%S"),
        status,
        log.upgrade_script_name,
        log.id
    );
    if let Some(exception) = &log.exception {
        line.push_str(&format!("\n    {exception}"));
    }
    println!("{line}");
}
