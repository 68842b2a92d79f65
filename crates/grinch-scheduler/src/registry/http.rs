//! GraceDB-style REST registry.
//!
//! Endpoints, relative to the configured base URL:
//! ```text
//! GET events/{id}           → event record
//! GET events/{id}/log/      → {"log": [{"N", "comment", "tag_names", "filename", "created"}]}
//! GET events/{id}/files/    → {"<name>": "<url>", ...}
//! GET events/{id}/labels/   → {"labels": [{"name"}]}
//! GET events/?query=a .. b  → {"events": [...]}
//! ```
//! 5xx, 429, timeouts, and connection failures are transient; 404 is
//! `NotFound`; anything else is permanent.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use grinch_core::error::{GrinchError, Result};
use grinch_core::traits::Registry;
use grinch_core::types::{EventFilter, EventRecord, LabelSet, LogEntry, TimeKey, TimeRange};

/// Registry client over HTTP.
pub struct HttpRegistry {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpRegistry {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: format!("{}/", base_url.trim_end_matches('/')),
            client: reqwest::Client::new(),
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.url(path);
        tracing::debug!("GET {url}");
        let resp = self
            .client
            .get(&url)
            .query(query)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify_send_error(&url, e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(GrinchError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = format!("{url} returned {status}: {body}");
            return Err(if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                GrinchError::transient(message)
            } else {
                GrinchError::permanent(message)
            });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| GrinchError::permanent(format!("{url}: invalid JSON: {e}")))
    }
}

fn classify_send_error(url: &str, e: reqwest::Error) -> GrinchError {
    if e.is_timeout() {
        GrinchError::Timeout(url.to_string())
    } else if e.is_connect() || e.is_request() {
        GrinchError::transient(format!("{url}: {e}"))
    } else {
        GrinchError::permanent(format!("{url}: {e}"))
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    graceid: String,
    group: String,
    pipeline: String,
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    far: Option<f64>,
    gpstime: f64,
    created: String,
    #[serde(default)]
    extra_attributes: Value,
}

impl From<RawEvent> for EventRecord {
    fn from(raw: RawEvent) -> Self {
        Self {
            id: raw.graceid,
            group: raw.group,
            pipeline: raw.pipeline,
            search: raw.search.filter(|s| !s.is_empty()),
            far: raw.far,
            event_time: raw.gpstime,
            creation_time: raw.created,
            central_frequency: central_frequency(&raw.extra_attributes),
        }
    }
}

/// Burst pipelines report the dominant frequency under a pipeline-specific
/// attribute group; take the first one present.
fn central_frequency(extra: &Value) -> Option<f64> {
    extra
        .as_object()?
        .values()
        .find_map(|group| group.get("central_freq").and_then(Value::as_f64))
}

#[derive(Debug, Deserialize)]
struct RawLog {
    #[serde(rename = "N")]
    n: u64,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    tag_names: Vec<String>,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    created: String,
}

impl From<RawLog> for LogEntry {
    fn from(raw: RawLog) -> Self {
        Self {
            sequence_number: raw.n,
            comment: raw.comment,
            tag_names: raw.tag_names.into_iter().collect(),
            filename: Some(raw.filename).filter(|f| !f.is_empty()),
            timestamp: raw.created,
        }
    }
}

fn field<T: serde::de::DeserializeOwned>(mut value: Value, key: &str) -> Result<T> {
    let inner = value
        .get_mut(key)
        .map(Value::take)
        .ok_or_else(|| GrinchError::permanent(format!("response has no '{key}' field")))?;
    Ok(serde_json::from_value(inner)?)
}

#[async_trait]
impl Registry for HttpRegistry {
    fn name(&self) -> &str {
        "gracedb"
    }

    async fn get_event(&self, id: &str) -> Result<EventRecord> {
        let value = self.get_json(&format!("events/{id}"), &[]).await?;
        let raw: RawEvent = serde_json::from_value(value)?;
        Ok(raw.into())
    }

    async fn get_logs(&self, id: &str) -> Result<Vec<LogEntry>> {
        let value = self.get_json(&format!("events/{id}/log/"), &[]).await?;
        let raw: Vec<RawLog> = field(value, "log")?;
        Ok(raw.into_iter().map(LogEntry::from).collect())
    }

    async fn get_files(&self, id: &str) -> Result<BTreeSet<String>> {
        let value = self.get_json(&format!("events/{id}/files/"), &[]).await?;
        let files = value
            .as_object()
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default();
        Ok(files)
    }

    async fn get_labels(&self, id: &str) -> Result<LabelSet> {
        #[derive(Debug, Deserialize)]
        struct RawLabel {
            name: String,
        }

        let value = self.get_json(&format!("events/{id}/labels/"), &[]).await?;
        let raw: Vec<RawLabel> = field(value, "labels")?;
        Ok(raw.into_iter().map(|l| l.name).collect())
    }

    async fn query_events(&self, range: &TimeRange, filter: &EventFilter) -> Result<Vec<EventRecord>> {
        let query = search_query(range, filter);
        let value = self.get_json("events/", &[("query", query)]).await?;
        let raw: Vec<RawEvent> = field(value, "events")?;
        Ok(raw
            .into_iter()
            .map(EventRecord::from)
            .filter(|e| filter.matches(e))
            .collect())
    }
}

/// GraceDB search string. GPS bounds are plain seconds; the `created:`
/// filter wants UTC date strings.
fn search_query(range: &TimeRange, filter: &EventFilter) -> String {
    let (start, end) = (range.start.floor(), range.end.ceil());
    let mut query = match range.key {
        TimeKey::EventTime => format!("{start:.0} .. {end:.0}"),
        TimeKey::CreationTime => format!("created: {} .. {}", utc_date(start), utc_date(end)),
    };
    if let Some(event_type) = &filter.event_type {
        query = format!("{} {} {query}", event_type.group, event_type.pipeline);
    }
    query
}

fn utc_date(unix_secs: f64) -> String {
    DateTime::<Utc>::from_timestamp(unix_secs as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| format!("{unix_secs:.0}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use grinch_core::types::EventType;
    use serde_json::json;

    #[test]
    fn test_event_conversion() {
        let raw: RawEvent = serde_json::from_value(json!({
            "graceid": "G184098",
            "group": "Burst",
            "pipeline": "CWB",
            "search": "AllSky",
            "far": 1.2e-8,
            "gpstime": 1126259462.39,
            "created": "2015-09-14 09:51:02 UTC",
            "extra_attributes": {"MultiBurst": {"central_freq": 123.4, "duration": 0.2}}
        }))
        .unwrap();
        let event = EventRecord::from(raw);
        assert_eq!(event.id, "G184098");
        assert_eq!(event.event_type().to_string(), "Burst_CWB_AllSky");
        assert_eq!(event.central_frequency, Some(123.4));
        assert!(event.created_at().is_some());
    }

    #[test]
    fn test_log_conversion() {
        let raw: Vec<RawLog> = field(
            json!({"log": [
                {"N": 3, "comment": "skymap", "tag_names": ["sky_loc", "lvem"], "filename": "bayestar.fits.gz", "created": "2015-09-14 09:52:00 UTC"},
                {"N": 4, "comment": "Coinc Table Created", "filename": ""}
            ]}),
            "log",
        )
        .unwrap();
        let logs: Vec<LogEntry> = raw.into_iter().map(LogEntry::from).collect();
        assert_eq!(logs[0].sequence_number, 3);
        assert!(logs[0].has_tag("lvem"));
        assert_eq!(logs[0].filename.as_deref(), Some("bayestar.fits.gz"));
        assert_eq!(logs[1].filename, None);
        assert!(logs[1].tag_names.is_empty());
    }

    #[test]
    fn test_missing_field_is_permanent() {
        let err = field::<Vec<RawLog>>(json!({"detail": "nope"}), "log").unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_search_query_bounds() {
        let gps = TimeRange::around(1_126_259_462.4, 5.0, TimeKey::EventTime);
        assert_eq!(search_query(&gps, &EventFilter::all()), "1126259457 .. 1126259468");

        // 2015-09-14 09:50:45 UTC
        let created = TimeRange::around(1_442_224_245.0, 5.0, TimeKey::CreationTime);
        let filter = EventFilter {
            event_type: EventType::parse("Burst_CWB_AllSky"),
        };
        assert_eq!(
            search_query(&created, &filter),
            "Burst CWB created: 2015-09-14 09:50:40 .. 2015-09-14 09:50:50"
        );
    }

    #[test]
    fn test_base_url_normalized() {
        let reg = HttpRegistry::new("https://gracedb.example.org/api", Duration::from_secs(5));
        assert_eq!(reg.url("events/G1"), "https://gracedb.example.org/api/events/G1");
    }
}
