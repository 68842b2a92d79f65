//! # Grinch — registry event supervisor
//!
//! Usage:
//!   grinch supervise G184098                 # Watch one event until its schedule completes
//!   grinch supervise G184098 --dry-run       # Log alerts instead of sending them
//!   grinch schedule Burst_cwb_AllSky -f 250  # Print the compiled schedule

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use grinch_core::{EventType, SupervisorConfig};
use grinch_scheduler::{DispatchNotifier, HttpRegistry, Overrides, Supervisor, TaskStatus};

#[derive(Parser)]
#[command(name = "grinch", version, about = "🛡️ Grinch — supervises follow-up of registry events")]
struct Cli {
    /// Config file (default: ~/.grinch/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Supervise one event until every scheduled check has run
    Supervise {
        event_id: String,

        /// Override the event type reported by the registry
        #[arg(long)]
        event_type: Option<String>,

        /// Override the central frequency hint, in Hz
        #[arg(short, long)]
        frequency: Option<f64>,

        /// Log alerts instead of sending them
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the schedule compiled for an event type
    Schedule {
        event_type: String,

        /// Central frequency hint, in Hz
        #[arg(short, long)]
        frequency: Option<f64>,
    },
}

fn load_config(path: Option<&str>) -> Result<SupervisorConfig> {
    let config = match path {
        Some(p) => {
            let path = PathBuf::from(shellexpand::tilde(p).to_string());
            SupervisorConfig::load_from(&path)?
        }
        None => SupervisorConfig::load()?,
    };
    Ok(config)
}

fn parse_event_type(raw: &str) -> Result<EventType> {
    EventType::parse(raw).with_context(|| format!("'{raw}' is not an event type (group_pipeline[_search])"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "grinch=debug,grinch_scheduler=debug,grinch_core=debug"
    } else {
        "grinch=info,grinch_scheduler=info,grinch_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Schedule { event_type, frequency } => {
            grinch_scheduler::validate_config(&config).context("invalid configuration")?;
            let event_type = parse_event_type(&event_type)?;
            let schedule = grinch_scheduler::compile(&config, &event_type, frequency)?;
            println!("{}", serde_json::to_string_pretty(&schedule)?);
        }
        Command::Supervise {
            event_id,
            event_type,
            frequency,
            dry_run,
        } => {
            let overrides = Overrides {
                event_type: event_type.as_deref().map(parse_event_type).transpose()?,
                frequency,
            };

            let timeout = Duration::from_secs(config.supervisor.call_timeout_secs);
            let registry = Arc::new(HttpRegistry::new(&config.supervisor.registry_url, timeout));
            let mut notifier = DispatchNotifier::new(&config.notify, timeout);
            if dry_run {
                notifier = notifier.dry_run();
            }

            // Validates the whole config before anything is fetched.
            let supervisor =
                Supervisor::new(config, registry, Arc::new(notifier)).context("invalid configuration")?;

            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("🛑 Interrupted, stopping before the next check");
                    cancel_tx.send_replace(true);
                }
            });

            let report = supervisor
                .supervise(&event_id, &overrides, cancel_rx)
                .await
                .with_context(|| format!("could not supervise {event_id}"))?;

            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.count(TaskStatus::Failed) > 0 {
                tracing::warn!(
                    "⚠️ {} check(s) could not be evaluated",
                    report.count(TaskStatus::Failed)
                );
            }
        }
    }

    Ok(())
}
