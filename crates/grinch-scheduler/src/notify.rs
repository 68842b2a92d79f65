//! Notifier that routes each alert to its recipients by scheme.
//! Lightweight: no queues. Send to every recipient, remember what happened.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use grinch_core::config::NotifyConfig;
use grinch_core::error::{GrinchError, Result};
use grinch_core::traits::{Alert, Notifier};

use crate::dispatch::{self, NotifyTarget, Transports};

/// One delivered (or attempted) alert.
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub alert: Alert,
    /// Recipients that failed, with the reason.
    pub failures: Vec<(String, String)>,
}

impl Delivery {
    pub fn delivered(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Routes alerts through [`dispatch`]. Keeps the last `history_size`
/// deliveries in memory.
pub struct DispatchNotifier {
    transports: Transports,
    dry_run: bool,
    history: Mutex<VecDeque<Delivery>>,
    history_size: usize,
}

impl DispatchNotifier {
    pub fn new(config: &NotifyConfig, timeout: Duration) -> Self {
        Self {
            transports: Transports::from_config(config, timeout),
            dry_run: false,
            history: Mutex::new(VecDeque::new()),
            history_size: config.history_size,
        }
    }

    /// Log alerts instead of sending them.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Recorded deliveries, oldest first.
    pub fn history(&self) -> Vec<Delivery> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Delivery>> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, delivery: Delivery) {
        let mut history = self.lock();
        history.push_back(delivery);
        // Ring buffer
        while history.len() > self.history_size {
            history.pop_front();
        }
    }
}

#[async_trait]
impl Notifier for DispatchNotifier {
    fn name(&self) -> &str {
        if self.dry_run { "dry-run" } else { "dispatch" }
    }

    async fn notify(&self, alert: &Alert) -> Result<()> {
        let mut failures = Vec::new();

        for raw in &alert.targets {
            let target = match NotifyTarget::parse(raw) {
                Ok(target) => target,
                Err(e) => {
                    failures.push((raw.clone(), e.to_string()));
                    continue;
                }
            };

            let sent = if self.dry_run {
                tracing::info!("📣 [dry-run] {} → {target}", alert.title());
                Ok(())
            } else {
                dispatch::dispatch(alert, &target, &self.transports).await
            };
            if let Err(e) = sent {
                tracing::warn!("⚠️ {} alert to {target} failed: {e}", target.kind());
                failures.push((raw.clone(), e.to_string()));
            }
        }

        let summary = failures
            .iter()
            .map(|(target, reason)| format!("{target}: {reason}"))
            .collect::<Vec<_>>()
            .join("; ");
        let failed = failures.len();
        self.record(Delivery {
            alert: alert.clone(),
            failures,
        });

        if failed == 0 {
            Ok(())
        } else {
            Err(GrinchError::Notify(format!(
                "{failed} of {} recipients failed: {summary}",
                alert.targets.len()
            )))
        }
    }
}
