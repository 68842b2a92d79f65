//! Notifier trait and the alert it delivers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::LogEntry;

/// Alert priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlertPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// One escalation to a human operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Check label, e.g. `idq_start`.
    pub label: String,
    pub event_id: String,
    /// Recipient identifiers as written in the configuration.
    pub targets: Vec<String>,
    /// Human-readable reasons produced by the check.
    pub notes: Vec<String>,
    /// Log entries supporting the verdict.
    pub evidence: Vec<LogEntry>,
    pub priority: AlertPriority,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(label: &str, event_id: &str, targets: &[String]) -> Self {
        Self {
            label: label.to_string(),
            event_id: event_id.to_string(),
            targets: targets.to_vec(),
            notes: Vec::new(),
            evidence: Vec::new(),
            priority: AlertPriority::Normal,
            timestamp: Utc::now(),
        }
    }

    pub fn title(&self) -> String {
        format!("action required : {} : {}", self.event_id, self.label)
    }

    /// Plain-text body shared by every transport.
    pub fn body(&self) -> String {
        let mut out = format!(
            "Check '{}' requires action for event {}.\n",
            self.label, self.event_id
        );
        for note in &self.notes {
            out.push_str(&format!("  - {note}\n"));
        }
        if !self.evidence.is_empty() {
            out.push_str("\nSupporting log entries:\n");
            for entry in &self.evidence {
                let tags: Vec<&str> = entry.tag_names.iter().map(String::as_str).collect();
                out.push_str(&format!(
                    "  #{} [{}] {}\n",
                    entry.sequence_number,
                    tags.join(","),
                    entry.comment
                ));
            }
        }
        out
    }
}

/// Delivers alerts. Delivery failure is reported back to the caller, which
/// logs it; notifiers do not retry on their own.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, alert: &Alert) -> Result<()>;
}
