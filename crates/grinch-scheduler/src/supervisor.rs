//! Per-event entry point: classify, compile, execute.
//!
//! One [`Supervisor`] is shared by every event of a process. Each call to
//! [`Supervisor::supervise`] or [`Supervisor::spawn`] builds its own
//! schedule and executor; nothing mutable is shared between events.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use grinch_core::config::SupervisorConfig;
use grinch_core::error::{GrinchError, Result};
use grinch_core::traits::{Notifier, Registry};
use grinch_core::types::{EventRecord, EventType};

use crate::compiler::{self, Schedule};
use crate::executor::{ExecutionReport, Executor, ExecutorState};

/// Classification overrides supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub event_type: Option<EventType>,
    pub frequency: Option<f64>,
}

#[derive(Clone)]
pub struct Supervisor {
    config: Arc<SupervisorConfig>,
    registry: Arc<dyn Registry>,
    notifier: Arc<dyn Notifier>,
}

impl Supervisor {
    /// Validates the whole configuration; a bad file fails here.
    pub fn new(config: SupervisorConfig, registry: Arc<dyn Registry>, notifier: Arc<dyn Notifier>) -> Result<Self> {
        compiler::validate_config(&config)?;
        tracing::info!(
            "🛡️ Supervisor ready (registry: {}, notifier: {})",
            registry.name(),
            notifier.name()
        );
        Ok(Self {
            config: Arc::new(config),
            registry,
            notifier,
        })
    }

    /// Fetch the event and compile its schedule.
    pub async fn prepare(&self, event_id: &str, overrides: &Overrides) -> Result<(EventRecord, Schedule)> {
        let timeout = Duration::from_secs(self.config.supervisor.call_timeout_secs);
        let event = tokio::time::timeout(timeout, self.registry.get_event(event_id))
            .await
            .map_err(|_| GrinchError::Timeout(format!("fetching {event_id}")))??;

        let event_type = overrides.event_type.clone().unwrap_or_else(|| event.event_type());
        let frequency = overrides.frequency.or(event.central_frequency);
        let schedule = compiler::compile(&self.config, &event_type, frequency)?;
        Ok((event, schedule))
    }

    /// Supervise one event to completion or cancellation.
    pub async fn supervise(
        &self,
        event_id: &str,
        overrides: &Overrides,
        cancel: watch::Receiver<bool>,
    ) -> Result<ExecutionReport> {
        let (event, schedule) = self.prepare(event_id, overrides).await?;
        let executor = self.executor();
        Ok(run(&executor, &event, &schedule, cancel).await)
    }

    /// Start supervising in the background. The schedule is compiled before
    /// this returns, so configuration and lookup errors surface immediately.
    pub async fn spawn(&self, event_id: &str, overrides: &Overrides) -> Result<SupervisorHandle> {
        let (event, schedule) = self.prepare(event_id, overrides).await?;
        let executor = self.executor();
        let state = executor.subscribe();
        let (cancel, cancel_rx) = watch::channel(false);
        let tasks = schedule.len();

        let join = tokio::spawn(async move { run(&executor, &event, &schedule, cancel_rx).await });
        Ok(SupervisorHandle {
            event_id: event_id.to_string(),
            tasks,
            cancel,
            state,
            join,
        })
    }

    fn executor(&self) -> Executor {
        Executor::new(self.registry.clone(), self.notifier.clone(), &self.config)
    }
}

async fn run(
    executor: &Executor,
    event: &EventRecord,
    schedule: &Schedule,
    cancel: watch::Receiver<bool>,
) -> ExecutionReport {
    let anchor = event.created_at();
    if anchor.is_none() {
        tracing::warn!(
            "⚠️ {}: unparseable creation time '{}', timing from now",
            event.id,
            event.creation_time
        );
    }
    executor.run(&event.id, schedule, anchor, cancel).await
}

/// A supervised event running in the background.
pub struct SupervisorHandle {
    pub event_id: String,
    /// Number of scheduled tasks.
    pub tasks: usize,
    cancel: watch::Sender<bool>,
    state: watch::Receiver<ExecutorState>,
    join: JoinHandle<ExecutionReport>,
}

impl SupervisorHandle {
    /// Ask the executor to stop before its next task.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn state(&self) -> ExecutorState {
        *self.state.borrow()
    }

    pub async fn join(self) -> Result<ExecutionReport> {
        self.join
            .await
            .map_err(|e| GrinchError::Executor(format!("executor task for {} aborted: {e}", self.event_id)))
    }
}
