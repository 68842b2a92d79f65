//! In-process registry.
//!
//! Holds events, logs, and labels in memory. Files are derived from the
//! `filename` of log entries, the way a real registry records an upload.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use grinch_core::error::{GrinchError, Result};
use grinch_core::traits::Registry;
use grinch_core::types::{EventFilter, EventRecord, LabelSet, LogEntry, TimeRange};

#[derive(Default)]
struct Store {
    events: BTreeMap<String, EventRecord>,
    logs: BTreeMap<String, Vec<LogEntry>>,
    labels: BTreeMap<String, LabelSet>,
}

/// Registry backed by in-memory maps.
#[derive(Default)]
pub struct MemoryRegistry {
    store: RwLock<Store>,
    /// Calls to `get_logs`, `get_files`, `get_labels`.
    content_reads: AtomicUsize,
    /// Remaining calls that fail with a transient error.
    failures: AtomicU32,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.store.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.store.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace an event record.
    pub fn insert_event(&self, event: EventRecord) {
        self.write().events.insert(event.id.clone(), event);
    }

    /// Append a log entry and return its sequence number (1-based per event).
    pub fn append_log(&self, id: &str, comment: &str, tags: &[&str], filename: Option<&str>) -> u64 {
        let mut store = self.write();
        let logs = store.logs.entry(id.to_string()).or_default();
        let sequence_number = logs.len() as u64 + 1;
        logs.push(LogEntry {
            sequence_number,
            comment: comment.to_string(),
            tag_names: tags.iter().map(|t| t.to_string()).collect(),
            filename: filename.map(str::to_string),
            timestamp: Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        });
        sequence_number
    }

    pub fn add_label(&self, id: &str, label: &str) {
        self.write()
            .labels
            .entry(id.to_string())
            .or_default()
            .insert(label.to_string());
    }

    /// Number of log, file, and label reads served so far.
    pub fn content_reads(&self) -> usize {
        self.content_reads.load(Ordering::SeqCst)
    }

    /// Make the next `n` calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn check_failure(&self) -> Result<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(GrinchError::transient("registry unavailable (injected)"))
        } else {
            Ok(())
        }
    }

    fn ensure_event(&self, id: &str) -> Result<()> {
        if self.read().events.contains_key(id) {
            Ok(())
        } else {
            Err(GrinchError::NotFound(id.to_string()))
        }
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_event(&self, id: &str) -> Result<EventRecord> {
        self.check_failure()?;
        self.read()
            .events
            .get(id)
            .cloned()
            .ok_or_else(|| GrinchError::NotFound(id.to_string()))
    }

    async fn get_logs(&self, id: &str) -> Result<Vec<LogEntry>> {
        self.check_failure()?;
        self.ensure_event(id)?;
        self.content_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.read().logs.get(id).cloned().unwrap_or_default())
    }

    async fn get_files(&self, id: &str) -> Result<BTreeSet<String>> {
        self.check_failure()?;
        self.ensure_event(id)?;
        self.content_reads.fetch_add(1, Ordering::SeqCst);
        let store = self.read();
        let files = store
            .logs
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.filename.clone())
            .filter(|name| !name.is_empty())
            .collect();
        Ok(files)
    }

    async fn get_labels(&self, id: &str) -> Result<LabelSet> {
        self.check_failure()?;
        self.ensure_event(id)?;
        self.content_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.read().labels.get(id).cloned().unwrap_or_default())
    }

    async fn query_events(&self, range: &TimeRange, filter: &EventFilter) -> Result<Vec<EventRecord>> {
        self.check_failure()?;
        let store = self.read();
        let events = store
            .events
            .values()
            .filter(|e| filter.matches(e))
            .filter(|e| e.time_on(range.key).is_some_and(|t| range.contains(t)))
            .cloned()
            .collect();
        Ok(events)
    }
}
