//! Deferred executor — realizes one event's schedule in time.
//!
//! ```text
//! Scheduled ─→ Waiting(0) ─→ Evaluating(0) ─→ Waiting(1) ─→ … ─→ Done
//!                  │                               │
//!                  └──────────── cancel ───────────┴──────────→ Cancelled
//! ```
//! Tasks run strictly in schedule order. Each waits until
//! `anchor + delay_seconds`; overdue tasks run immediately. Cancellation is
//! observed before and during each wait, never while a predicate runs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use grinch_core::config::{RetryConfig, SupervisorConfig};
use grinch_core::error::{GrinchError, Result};
use grinch_core::traits::{Alert, AlertPriority, Notifier, Registry};

use crate::compiler::{CheckTask, Schedule};
use crate::predicates::{self, Outcome, Verdict};

/// Where the executor is in its schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutorState {
    Scheduled,
    Waiting(usize),
    Evaluating(usize),
    Done,
    Cancelled,
}

/// Final status of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskStatus {
    Clear,
    /// Action required and every recipient was notified.
    Notified,
    /// Action required but delivery failed.
    NotifyFailed,
    Unimplemented,
    /// The predicate could not be evaluated.
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub index: usize,
    pub label: String,
    pub delay_seconds: f64,
    pub status: TaskStatus,
    pub attempts: u32,
    pub outcome: Option<Outcome>,
    pub error: Option<String>,
}

/// What happened to every task of one schedule.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub event_id: String,
    pub event_type: String,
    pub records: Vec<TaskRecord>,
}

impl ExecutionReport {
    pub fn count(&self, status: TaskStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    pub fn cancelled(&self) -> bool {
        self.count(TaskStatus::Cancelled) > 0
    }
}

/// Runs schedules against a registry, escalating through a notifier.
pub struct Executor {
    registry: Arc<dyn Registry>,
    notifier: Arc<dyn Notifier>,
    retry: RetryConfig,
    call_timeout: Duration,
    diagnostic_targets: Vec<String>,
    state: watch::Sender<ExecutorState>,
}

impl Executor {
    pub fn new(registry: Arc<dyn Registry>, notifier: Arc<dyn Notifier>, config: &SupervisorConfig) -> Self {
        let (state, _) = watch::channel(ExecutorState::Scheduled);
        Self {
            registry,
            notifier,
            retry: config.retry.clone(),
            call_timeout: Duration::from_secs(config.supervisor.call_timeout_secs),
            diagnostic_targets: config.supervisor.diagnostic_targets.clone(),
            state,
        }
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ExecutorState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ExecutorState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ExecutorState) {
        tracing::trace!("executor → {state:?}");
        self.state.send_replace(state);
    }

    /// Run every task of `schedule` for `event_id`. Deadlines are measured
    /// from `anchor` (the event's creation time), or from now when unknown.
    pub async fn run(
        &self,
        event_id: &str,
        schedule: &Schedule,
        anchor: Option<DateTime<Utc>>,
        mut cancel: watch::Receiver<bool>,
    ) -> ExecutionReport {
        let started = Instant::now();
        let already_elapsed = anchor
            .map(|a| (Utc::now() - a).to_std().unwrap_or_default())
            .unwrap_or_default();

        tracing::info!(
            "⏰ Supervising {event_id} ({}): {} task(s), {:.0}s since creation",
            schedule.event_type,
            schedule.len(),
            already_elapsed.as_secs_f64()
        );

        let mut report = ExecutionReport {
            event_id: event_id.to_string(),
            event_type: schedule.event_type.clone(),
            records: Vec::with_capacity(schedule.len()),
        };

        for (index, task) in schedule.tasks().iter().enumerate() {
            let offset = task.delay().saturating_sub(already_elapsed);
            self.set_state(ExecutorState::Waiting(index));

            if wait_or_cancel(started + offset, &mut cancel).await {
                tracing::info!("🛑 {event_id}: cancelled before {}", task.label);
                for (i, rest) in schedule.tasks().iter().enumerate().skip(index) {
                    report.records.push(TaskRecord {
                        index: i,
                        label: rest.label.clone(),
                        delay_seconds: rest.delay_seconds,
                        status: TaskStatus::Cancelled,
                        attempts: 0,
                        outcome: None,
                        error: None,
                    });
                }
                self.set_state(ExecutorState::Cancelled);
                return report;
            }

            self.set_state(ExecutorState::Evaluating(index));
            let record = self.run_task(event_id, index, task).await;
            report.records.push(record);
        }

        self.set_state(ExecutorState::Done);
        tracing::info!(
            "✅ {event_id}: done ({} clear, {} notified, {} failed)",
            report.count(TaskStatus::Clear),
            report.count(TaskStatus::Notified),
            report.count(TaskStatus::Failed)
        );
        report
    }

    async fn run_task(&self, event_id: &str, index: usize, task: &CheckTask) -> TaskRecord {
        let mut record = TaskRecord {
            index,
            label: task.label.clone(),
            delay_seconds: task.delay_seconds,
            status: TaskStatus::Clear,
            attempts: 0,
            outcome: None,
            error: None,
        };

        let outcome = match self.evaluate_with_retry(event_id, task, &mut record.attempts).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    "❌ {event_id}: {} failed after {} attempt(s): {e}",
                    task.label,
                    record.attempts
                );
                self.diagnose(event_id, task, &e).await;
                record.status = TaskStatus::Failed;
                record.error = Some(e.to_string());
                return record;
            }
        };

        match outcome.verdict {
            Verdict::Clear => {
                tracing::info!("✔️ {event_id}: {} clear", task.label);
            }
            Verdict::Unimplemented => {
                tracing::warn!(
                    "⚠️ {event_id}: {} cannot be decided: {}",
                    task.label,
                    outcome.notes.join("; ")
                );
                record.status = TaskStatus::Unimplemented;
            }
            Verdict::ActionRequired => {
                tracing::info!("🔔 {event_id}: {} requires action", task.label);
                let mut alert = Alert::new(&task.label, event_id, &task.notify_targets);
                alert.notes = outcome.notes.clone();
                alert.evidence = outcome.evidence.clone();
                match self.send(&alert).await {
                    Ok(()) => record.status = TaskStatus::Notified,
                    Err(e) => {
                        tracing::warn!("⚠️ {event_id}: alert for {} not delivered: {e}", task.label);
                        record.status = TaskStatus::NotifyFailed;
                        record.error = Some(e.to_string());
                    }
                }
            }
        }

        record.outcome = Some(outcome);
        record
    }

    /// Evaluate with a per-attempt timeout, retrying transient failures.
    async fn evaluate_with_retry(&self, event_id: &str, task: &CheckTask, attempts: &mut u32) -> Result<Outcome> {
        let max_attempts = self.retry.max_attempts.max(1);
        loop {
            *attempts += 1;
            let evaluation = predicates::evaluate(self.registry.as_ref(), event_id, task.predicate, &task.params);
            let result = match tokio::time::timeout(self.call_timeout, evaluation).await {
                Ok(result) => result,
                Err(_) => Err(GrinchError::Timeout(format!(
                    "{} for {event_id} after {}s",
                    task.label,
                    self.call_timeout.as_secs()
                ))),
            };

            match result {
                Err(e) if e.is_transient() && *attempts < max_attempts => {
                    let backoff = self.retry.backoff(*attempts);
                    tracing::warn!(
                        "🔄 {event_id}: {} attempt {}/{max_attempts} failed: {e} (retry in {}ms)",
                        task.label,
                        *attempts,
                        backoff.as_millis()
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        if alert.targets.is_empty() {
            return Err(GrinchError::Notify(format!("no recipients for {}", alert.label)));
        }
        match tokio::time::timeout(self.call_timeout, self.notifier.notify(alert)).await {
            Ok(result) => result,
            Err(_) => Err(GrinchError::Timeout(format!("{} via {}", alert.title(), self.notifier.name()))),
        }
    }

    /// Report an evaluation failure on the diagnostic channel, if one is
    /// configured.
    async fn diagnose(&self, event_id: &str, task: &CheckTask, error: &GrinchError) {
        if self.diagnostic_targets.is_empty() {
            return;
        }
        let mut alert = Alert::new(
            &format!("executor error in {}", task.label),
            event_id,
            &self.diagnostic_targets,
        );
        alert.priority = AlertPriority::Urgent;
        alert.notes.push(error.to_string());
        if let Err(e) = self.send(&alert).await {
            tracing::error!("❌ {event_id}: diagnostic not delivered: {e}");
        }
    }
}

/// Sleep until `deadline`. Returns `true` if cancellation was requested
/// before or during the wait. A dropped sender never cancels.
async fn wait_or_cancel(deadline: Instant, cancel: &mut watch::Receiver<bool>) -> bool {
    loop {
        if *cancel.borrow_and_update() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return false,
            changed = cancel.changed() => {
                if changed.is_err() {
                    tokio::time::sleep_until(deadline).await;
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::registry::MemoryRegistry;
    use async_trait::async_trait;
    use grinch_core::types::{EventRecord, EventType};
    use std::sync::Mutex;

    const CONFIG: &str = r#"
        [supervisor]
        call_timeout_secs = 5
        diagnostic_targets = ["oncall@example.org"]

        [retry]
        max_attempts = 3
        base_delay_ms = 100

        [checks.default]
        far = ["ops@example.org"]
        bayestar_start = ["skyloc@example.org"]
        idq_start = ["dq@example.org", "log"]
        lalinference_start = ["pe@example.org"]

        [options.far]
        dt = [0.0]
        maxFAR = 1e-6

        [options.bayestar_start]
        dt = [10.0]

        [options.idq_start]
        dt = [60.0]
        ifos = ["H1", "L1"]

        [options.lalinference_start]
        dt = [30.0]
    "#;

    /// Records alerts; optionally fails every delivery.
    #[derive(Default)]
    struct Recorder {
        alerts: Mutex<Vec<Alert>>,
        fail: bool,
    }

    impl Recorder {
        fn alerts(&self) -> Vec<Alert> {
            self.alerts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn notify(&self, alert: &Alert) -> Result<()> {
            self.alerts.lock().unwrap().push(alert.clone());
            if self.fail {
                Err(GrinchError::Notify("smtp down".into()))
            } else {
                Ok(())
            }
        }
    }

    fn config() -> SupervisorConfig {
        SupervisorConfig::from_toml(CONFIG).unwrap()
    }

    fn registry() -> Arc<MemoryRegistry> {
        let reg = MemoryRegistry::new();
        reg.insert_event(EventRecord {
            id: "G1".into(),
            group: "CBC".into(),
            pipeline: "gstlal".into(),
            search: None,
            far: Some(1e-8),
            event_time: 1_126_259_462.0,
            creation_time: "2015-09-14 09:50:45 UTC".into(),
            central_frequency: None,
        });
        Arc::new(reg)
    }

    fn schedule(config: &SupervisorConfig) -> Schedule {
        compile(config, &EventType::parse("CBC_gstlal").unwrap(), None).unwrap()
    }

    fn no_cancel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    fn statuses(report: &ExecutionReport) -> Vec<(String, TaskStatus)> {
        report.records.iter().map(|r| (r.label.clone(), r.status)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end() {
        let config = config();
        let reg = registry();
        reg.append_log("G1", "Started searching for iDQ information at H1", &[], None);
        let recorder = Arc::new(Recorder::default());
        let executor = Executor::new(reg.clone(), recorder.clone(), &config);
        let (_tx, rx) = no_cancel();

        let started = Instant::now();
        let report = executor.run("G1", &schedule(&config), Some(Utc::now()), rx).await;

        assert!(started.elapsed() >= Duration::from_secs(59));
        assert_eq!(executor.state(), ExecutorState::Done);
        assert_eq!(
            statuses(&report),
            vec![
                ("far".to_string(), TaskStatus::Clear),
                ("bayestar_start".to_string(), TaskStatus::Notified),
                ("lalinference_start".to_string(), TaskStatus::Unimplemented),
                ("idq_start".to_string(), TaskStatus::Notified),
            ]
        );

        let alerts = recorder.alerts();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].label, "bayestar_start");
        assert_eq!(alerts[0].targets, vec!["skyloc@example.org"]);
        assert_eq!(alerts[1].label, "idq_start");
        assert_eq!(alerts[1].targets, vec!["dq@example.org", "log"]);
        assert_eq!(alerts[1].evidence.len(), 1);
        assert!(alerts[1].notes[0].ends_with("for L1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_tasks_run_immediately() {
        let config = config();
        let recorder = Arc::new(Recorder::default());
        let executor = Executor::new(registry(), recorder, &config);
        let (_tx, rx) = no_cancel();

        let started = Instant::now();
        let anchor = Utc::now() - chrono::Duration::seconds(3600);
        let report = executor.run("G1", &schedule(&config), Some(anchor), rx).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(report.records.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_follow_anchor() {
        let config = config();
        let executor = Executor::new(registry(), Arc::new(Recorder::default()), &config);
        let (_tx, rx) = no_cancel();

        // 20s already elapsed: far and bayestar_start are overdue.
        let started = Instant::now();
        let anchor = Utc::now() - chrono::Duration::seconds(20);
        executor.run("G1", &schedule(&config), Some(anchor), rx).await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(39));
        assert!(elapsed <= Duration::from_secs(41));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retried() {
        let config = config();
        let reg = registry();
        let recorder = Arc::new(Recorder::default());
        let executor = Executor::new(reg.clone(), recorder.clone(), &config);
        let (_tx, rx) = no_cancel();

        reg.fail_next(2);
        let report = executor.run("G1", &schedule(&config), Some(Utc::now()), rx).await;

        assert_eq!(report.records[0].status, TaskStatus::Clear);
        assert_eq!(report.records[0].attempts, 3);
        assert_eq!(report.count(TaskStatus::Failed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_go_to_diagnostics() {
        let config = config();
        let reg = registry();
        let recorder = Arc::new(Recorder::default());
        let executor = Executor::new(reg.clone(), recorder.clone(), &config);
        let (_tx, rx) = no_cancel();

        reg.fail_next(3);
        let report = executor.run("G1", &schedule(&config), Some(Utc::now()), rx).await;

        let first = &report.records[0];
        assert_eq!(first.status, TaskStatus::Failed);
        assert_eq!(first.attempts, 3);
        assert!(first.error.is_some());
        // Later tasks still ran.
        assert_eq!(report.records[1].status, TaskStatus::Notified);

        let alerts = recorder.alerts();
        assert_eq!(alerts[0].targets, vec!["oncall@example.org"]);
        assert_eq!(alerts[0].priority, AlertPriority::Urgent);
        assert_eq!(alerts[1].label, "bayestar_start");
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_failure_does_not_abort() {
        let config = config();
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let executor = Executor::new(registry(), recorder.clone(), &config);
        let (_tx, rx) = no_cancel();

        let report = executor.run("G1", &schedule(&config), Some(Utc::now()), rx).await;

        assert_eq!(report.count(TaskStatus::NotifyFailed), 2);
        assert_eq!(report.records.len(), 4);
        // One attempt per task, no retry storm.
        assert_eq!(recorder.alerts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_between_tasks() {
        let config = config();
        let recorder = Arc::new(Recorder::default());
        let executor = Arc::new(Executor::new(registry(), recorder.clone(), &config));
        let (tx, rx) = watch::channel(false);

        let runner = {
            let executor = executor.clone();
            let schedule = schedule(&config);
            tokio::spawn(async move { executor.run("G1", &schedule, Some(Utc::now()), rx).await })
        };

        tokio::time::sleep(Duration::from_secs(15)).await;
        tx.send(true).unwrap();
        let report = runner.await.unwrap();

        assert_eq!(executor.state(), ExecutorState::Cancelled);
        assert_eq!(
            statuses(&report),
            vec![
                ("far".to_string(), TaskStatus::Clear),
                ("bayestar_start".to_string(), TaskStatus::Notified),
                ("lalinference_start".to_string(), TaskStatus::Cancelled),
                ("idq_start".to_string(), TaskStatus::Cancelled),
            ]
        );
        assert_eq!(recorder.alerts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let config = config();
        let executor = Executor::new(registry(), Arc::new(Recorder::default()), &config);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let report = executor.run("G1", &schedule(&config), Some(Utc::now()), rx).await;
        assert_eq!(report.count(TaskStatus::Cancelled), 4);
        assert!(report.cancelled());
    }
}
