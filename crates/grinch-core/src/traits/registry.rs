//! Registry trait — read access to the external event store.

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::error::Result;
use crate::types::{EventFilter, EventRecord, LabelSet, LogEntry, TimeRange};

/// Read-only view of the event registry.
///
/// Implementations are network services: every call may be slow, may fail
/// transiently, and may not yet reflect writes made by other pipelines.
/// Instances are passed explicitly to whoever needs them; there is no
/// process-wide client.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &str;

    async fn get_event(&self, id: &str) -> Result<EventRecord>;

    /// All log entries for the event, in any order.
    async fn get_logs(&self, id: &str) -> Result<Vec<LogEntry>>;

    /// Names of all files uploaded to the event.
    async fn get_files(&self, id: &str) -> Result<BTreeSet<String>>;

    async fn get_labels(&self, id: &str) -> Result<LabelSet>;

    /// Events whose timestamp on `range.key` falls inside `range`. May
    /// return a superset; callers re-check the bounds.
    async fn query_events(&self, range: &TimeRange, filter: &EventFilter)
    -> Result<Vec<EventRecord>>;
}
