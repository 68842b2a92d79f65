//! Registry data model — events, their log entries, files, and labels.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Labels attached to an event (e.g. `DQV`, `INJ`, `EM_READY`).
pub type LabelSet = BTreeSet<String>;

/// Snapshot of one candidate event in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub group: String,
    pub pipeline: String,
    #[serde(default)]
    pub search: Option<String>,
    /// False-alarm rate in Hz. Absent for events the pipeline did not rank.
    #[serde(default)]
    pub far: Option<f64>,
    /// GPS time of the signal, in seconds.
    pub event_time: f64,
    /// Wall-clock time the registry created the record.
    pub creation_time: String,
    /// Dominant signal frequency reported by burst pipelines, in Hz.
    #[serde(default)]
    pub central_frequency: Option<f64>,
}

impl EventRecord {
    pub fn event_type(&self) -> EventType {
        EventType {
            group: self.group.clone(),
            pipeline: self.pipeline.clone(),
            search: self.search.clone(),
        }
    }

    /// Parsed creation time. Accepts the registry's `YYYY-MM-DD HH:MM:SS UTC`
    /// form, the same without the zone suffix, and RFC 3339.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.creation_time)
    }

    /// The event's position on the axis selected by `key`, in seconds.
    pub fn time_on(&self, key: TimeKey) -> Option<f64> {
        match key {
            TimeKey::EventTime => Some(self.event_time),
            TimeKey::CreationTime => self
                .created_at()
                .map(|t| t.timestamp() as f64 + f64::from(t.timestamp_subsec_micros()) * 1e-6),
        }
    }
}

/// Parse a registry timestamp.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    let naive = raw.strip_suffix(" UTC").unwrap_or(raw);
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|t| t.and_utc())
}

/// Classification key `group_pipeline[_search]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventType {
    pub group: String,
    pub pipeline: String,
    pub search: Option<String>,
}

impl EventType {
    /// Parse `group_pipeline` or `group_pipeline_search`. The search part may
    /// itself contain underscores.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, '_');
        let group = parts.next().filter(|s| !s.is_empty())?;
        let pipeline = parts.next().filter(|s| !s.is_empty())?;
        let search = parts.next().filter(|s| !s.is_empty()).map(String::from);
        Some(Self {
            group: group.to_string(),
            pipeline: pipeline.to_string(),
            search,
        })
    }
}

impl EventType {
    /// Equality ignoring ASCII case, the way registries compare names.
    pub fn same_as(&self, other: &EventType) -> bool {
        self.to_string().eq_ignore_ascii_case(&other.to_string())
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.search {
            Some(search) => write!(f, "{}_{}_{}", self.group, self.pipeline, search),
            None => write!(f, "{}_{}", self.group, self.pipeline),
        }
    }
}

/// One append-only annotation on an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub sequence_number: u64,
    pub comment: String,
    #[serde(default)]
    pub tag_names: BTreeSet<String>,
    /// Set when the entry accompanies an uploaded file.
    #[serde(default)]
    pub filename: Option<String>,
    pub timestamp: String,
}

impl LogEntry {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tag_names.contains(tag)
    }
}

/// Which timestamp a time-range query filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeKey {
    #[default]
    EventTime,
    CreationTime,
}

/// Closed interval `[start, end]` on the axis named by `key`, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
    pub key: TimeKey,
}

impl TimeRange {
    pub fn around(center: f64, half_width: f64, key: TimeKey) -> Self {
        Self {
            start: center - half_width,
            end: center + half_width,
            key,
        }
    }

    pub fn contains(&self, t: f64) -> bool {
        self.start <= t && t <= self.end
    }
}

/// Restricts a registry query. The default filter matches every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    pub event_type: Option<EventType>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches(&self, event: &EventRecord) -> bool {
        match &self.event_type {
            Some(wanted) => event.event_type().same_as(wanted),
            None => true,
        }
    }
}
