//! Grinch configuration system.
//!
//! ```toml
//! [supervisor]
//! registry_url = "https://gracedb.ligo.org/api/"
//! frequency_threshold = 100.0
//! default_far_threshold = 1e-6
//! far_thresholds = { "gstlal.LowMass" = 1e-7 }
//!
//! [checks.default]
//! far = ["ops@example.org"]
//! idq_start = ["dq@example.org"]
//!
//! [checks.CBC_gstlal_LowMass]
//! bayestar_finish = ["skyloc@example.org"]
//!
//! [options.idq_start]
//! dt = [30.0, 120.0]
//! ifos = ["H1", "L1"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{GrinchError, Result};
use crate::types::{EventType, TimeKey};

/// Name of the section every event type inherits from.
pub const DEFAULT_SECTION: &str = "default";

/// Check name → recipient identifiers.
pub type CheckSection = BTreeMap<String, Vec<String>>;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    /// `default` plus one optional section per event type.
    #[serde(default)]
    pub checks: BTreeMap<String, CheckSection>,
    /// Per-check options, keyed by check name.
    #[serde(default)]
    pub options: BTreeMap<String, CheckOptions>,
}

impl SupervisorConfig {
    /// Load config from the default path (~/.grinch/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GrinchError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| GrinchError::Config(format!("Failed to parse config: {e}")))?;
        tracing::debug!(
            "Loaded config: {} check section(s), {} option block(s)",
            config.checks.len(),
            config.options.len()
        );
        Ok(config)
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".grinch")
            .join("config.toml")
    }

    /// Enabled checks for `event_type`: the default section with the
    /// event-type section merged over it key by key.
    pub fn enabled_checks(&self, event_type: &EventType) -> CheckSection {
        let mut merged = self
            .checks
            .get(DEFAULT_SECTION)
            .cloned()
            .unwrap_or_default();
        if let Some(specific) = get_ignore_case(&self.checks, &event_type.to_string()) {
            merged.extend(specific.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }

    /// FAR ceiling for a `(pipeline, search)` pair: `pipeline.search`, then
    /// `pipeline`, then the global default.
    pub fn far_threshold_for(&self, pipeline: &str, search: Option<&str>) -> f64 {
        let thresholds = &self.supervisor.far_thresholds;
        search
            .and_then(|s| get_ignore_case(thresholds, &format!("{pipeline}.{s}")))
            .or_else(|| get_ignore_case(thresholds, pipeline))
            .copied()
            .unwrap_or(self.supervisor.default_far_threshold)
    }
}

/// Registries report pipeline names in their own casing (`CWB`, `MBTAOnline`);
/// config keys match regardless. An exact match wins over a folded one.
fn get_ignore_case<'a, V>(map: &'a BTreeMap<String, V>, key: &str) -> Option<&'a V> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

/// Process-wide supervisor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorSettings {
    #[serde(default = "default_registry_url")]
    pub registry_url: String,
    /// Timeout applied to each registry and notifier call.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Signals at or above this frequency (Hz) take the high-frequency
    /// branch of frequency-dependent checks.
    #[serde(default = "default_frequency_threshold")]
    pub frequency_threshold: f64,
    #[serde(default = "default_far_threshold")]
    pub default_far_threshold: f64,
    /// `pipeline.search` or `pipeline` → FAR ceiling.
    #[serde(default)]
    pub far_thresholds: BTreeMap<String, f64>,
    /// Who hears about executor failures (exhausted retries).
    #[serde(default)]
    pub diagnostic_targets: Vec<String>,
}

fn default_registry_url() -> String { "https://gracedb.ligo.org/api/".into() }
fn default_call_timeout() -> u64 { 30 }
fn default_frequency_threshold() -> f64 { 100.0 }
fn default_far_threshold() -> f64 { 1e-6 }

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            call_timeout_secs: default_call_timeout(),
            frequency_threshold: default_frequency_threshold(),
            default_far_threshold: default_far_threshold(),
            far_thresholds: BTreeMap::new(),
            diagnostic_targets: Vec::new(),
        }
    }
}

/// Bounded retry of predicate evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 500 }
fn default_max_delay_ms() -> u64 { 10_000 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Backoff before attempt `attempt + 1`, doubling from `base_delay_ms`.
    pub fn backoff(&self, attempt: u32) -> std::time::Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        std::time::Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

/// Transport settings for notification delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyConfig {
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    /// How many delivered alerts to keep in memory.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

fn default_history_size() -> usize { 100 }

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            smtp: None,
            telegram_bot_token: None,
            history_size: default_history_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

fn default_smtp_port() -> u16 { 587 }

/// Options for one check. Which fields are required depends on the check;
/// the schedule compiler enforces that.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckOptions {
    /// Delays in seconds after event creation.
    #[serde(default)]
    pub dt: Option<Vec<f64>>,
    /// Delays used when the signal frequency is at or above the threshold.
    #[serde(default)]
    pub dt_high_freq: Option<Vec<f64>>,
    /// Delays used when the signal frequency is below the threshold.
    #[serde(default)]
    pub dt_low_freq: Option<Vec<f64>>,
    /// Skip the check for events with FAR above this ceiling.
    #[serde(default, alias = "farThreshold")]
    pub far_threshold: Option<f64>,
    /// Gate on the per-pipeline FAR threshold from `[supervisor]`.
    #[serde(default)]
    pub far_gated: bool,
    #[serde(default, alias = "minFAR")]
    pub min_far: Option<f64>,
    #[serde(default, alias = "maxFAR")]
    pub max_far: Option<f64>,
    /// Events per second considered abnormal.
    #[serde(default)]
    pub rate: Option<f64>,
    /// Half-width of the counting window, in seconds.
    #[serde(default)]
    pub window: Option<f64>,
    #[serde(default)]
    pub time_key: Option<TimeKey>,
    #[serde(default)]
    pub ifos: Option<Vec<String>>,
    #[serde(default)]
    pub pe_pipelines: Option<Vec<String>>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    /// Expected presence of the `lvem` tag on the artifact.
    #[serde(default)]
    pub lvem: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [supervisor]
        default_far_threshold = 1e-6
        far_thresholds = { "gstlal.LowMass" = 1e-7, "cwb" = 1e-5 }

        [checks.default]
        far = ["ops@example.org"]
        idq_start = ["dq@example.org"]

        [checks.CBC_gstlal_LowMass]
        idq_start = ["dq-cbc@example.org"]
        bayestar_finish = ["skyloc@example.org"]

        [options.far]
        dt = [10.0]
        minFAR = 0.0
        maxFAR = 1e-6

        [options.idq_start]
        dt = [30.0, 120.0]
        ifos = ["H1", "L1"]
    "#;

    #[test]
    fn test_parse_sample() {
        let config = SupervisorConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.supervisor.call_timeout_secs, 30);
        assert_eq!(config.retry.max_attempts, 3);
        let far = &config.options["far"];
        assert_eq!(far.max_far, Some(1e-6));
        assert_eq!(far.dt.as_deref(), Some(&[10.0][..]));
    }

    #[test]
    fn test_event_section_overrides_default() {
        let config = SupervisorConfig::from_toml(SAMPLE).unwrap();
        let cbc = EventType::parse("CBC_gstlal_LowMass").unwrap();
        let merged = config.enabled_checks(&cbc);
        assert_eq!(merged["idq_start"], vec!["dq-cbc@example.org".to_string()]);
        assert_eq!(merged["far"], vec!["ops@example.org".to_string()]);
        assert!(merged.contains_key("bayestar_finish"));

        let burst = EventType::parse("Burst_cwb").unwrap();
        let merged = config.enabled_checks(&burst);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["idq_start"], vec!["dq@example.org".to_string()]);
    }

    #[test]
    fn test_far_threshold_fallback() {
        let config = SupervisorConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.far_threshold_for("gstlal", Some("LowMass")), 1e-7);
        assert_eq!(config.far_threshold_for("gstlal", Some("HighMass")), 1e-6);
        assert_eq!(config.far_threshold_for("cwb", Some("AllSky")), 1e-5);
        assert_eq!(config.far_threshold_for("mbtaonline", None), 1e-6);
    }

    #[test]
    fn test_registry_casing_matches_config_keys() {
        let config = SupervisorConfig::from_toml(SAMPLE).unwrap();
        let cbc = EventType::parse("CBC_GSTLAL_LowMass").unwrap();
        let merged = config.enabled_checks(&cbc);
        assert_eq!(merged["idq_start"], vec!["dq-cbc@example.org".to_string()]);
        assert!(merged.contains_key("bayestar_finish"));

        assert_eq!(config.far_threshold_for("GstLAL", Some("LowMass")), 1e-7);
        assert_eq!(config.far_threshold_for("CWB", Some("AllSky")), 1e-5);
    }

    #[test]
    fn test_unknown_option_rejected() {
        let err = SupervisorConfig::from_toml("[options.far]\ndeltat = [1.0]\n").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 350,
        };
        assert_eq!(retry.backoff(1).as_millis(), 100);
        assert_eq!(retry.backoff(2).as_millis(), 200);
        assert_eq!(retry.backoff(3).as_millis(), 350);
    }
}
