//! Schedule compiler — turns layered configuration into an ordered list of
//! delayed checks for one event.
//!
//! ```text
//! [checks.default] ─┐
//!                   ├─ merge ─→ check names ─→ predicates ─→ CheckTask × delays
//! [checks.<type>] ──┘                 │
//!                         [options.<check>] (dt, thresholds, ifos, ...)
//! ```

use std::time::Duration;

use serde::Serialize;

use grinch_core::config::{CheckOptions, SupervisorConfig, DEFAULT_SECTION};
use grinch_core::error::{GrinchError, Result};
use grinch_core::types::{EventType, TimeKey};

use crate::checks::{CheckName, PePipeline, PredicateId};
use crate::dispatch::NotifyTarget;

/// One delayed check bound to an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckTask {
    /// Seconds after event creation at which the check runs.
    pub delay_seconds: f64,
    #[serde(serialize_with = "serialize_display")]
    pub check: CheckName,
    #[serde(serialize_with = "serialize_display")]
    pub predicate: PredicateId,
    pub params: TaskParams,
    pub notify_targets: Vec<String>,
    pub label: String,
}

impl CheckTask {
    /// The delay as a `Duration`. Compiled delays are always in range.
    pub fn delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.delay_seconds).unwrap_or_default()
    }
}

fn serialize_display<T: std::fmt::Display, S: serde::Serializer>(
    value: &T,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Resolved, validated parameters for a predicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskParams {
    /// FAR ceiling; events above it (or without a FAR) skip the check.
    pub far_ceiling: Option<f64>,
    pub min_far: f64,
    pub max_far: f64,
    pub rate: f64,
    pub window: f64,
    pub time_key: TimeKey,
    pub ifos: Vec<String>,
    #[serde(skip)]
    pub pe_pipelines: Vec<PePipeline>,
    pub filename: Option<String>,
    pub tag: Option<String>,
    pub lvem: Option<bool>,
}

impl Default for TaskParams {
    fn default() -> Self {
        Self {
            far_ceiling: None,
            min_far: 0.0,
            max_far: 1e-6,
            rate: 5.0,
            window: 5.0,
            time_key: TimeKey::EventTime,
            ifos: default_ifos(),
            pe_pipelines: vec![PePipeline::Lib, PePipeline::Bayeswave, PePipeline::Lalinference],
            filename: None,
            tag: None,
            lvem: None,
        }
    }
}

fn default_ifos() -> Vec<String> {
    vec!["H1".into(), "L1".into()]
}

/// Ordered checks for one event. Immutable once compiled.
#[derive(Debug, Clone, Serialize)]
pub struct Schedule {
    pub event_type: String,
    pub frequency_hint: Option<f64>,
    tasks: Vec<CheckTask>,
}

impl Schedule {
    pub fn tasks(&self) -> &[CheckTask] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Build the schedule for `event_type`.
///
/// Deterministic: the same inputs always produce the same tasks in the same
/// order. Tasks are sorted by delay; ties keep catalogue declaration order.
pub fn compile(
    config: &SupervisorConfig,
    event_type: &EventType,
    frequency_hint: Option<f64>,
) -> Result<Schedule> {
    let frequency_hint = frequency_hint.filter(|f| f.is_finite());
    let mut enabled = config
        .enabled_checks(event_type)
        .into_iter()
        .map(|(name, targets)| Ok((name.parse::<CheckName>()?, targets)))
        .collect::<Result<Vec<_>>>()?;
    enabled.sort_by_key(|(check, _)| *check);

    let mut tasks = Vec::new();
    for (check, targets) in enabled {
        let Some(predicate) = check.predicate_for(&event_type.pipeline) else {
            tracing::warn!(
                "{check}: no rule for pipeline '{}', not scheduled for {event_type}",
                event_type.pipeline
            );
            continue;
        };
        let options = config.options.get(check.as_str()).cloned().unwrap_or_default();
        let delays = resolve_delays(check, &options, frequency_hint, config.supervisor.frequency_threshold)?;
        let params = resolve_params(check, &options, config, event_type)?;
        let label = match check {
            CheckName::EventCreation => predicate.as_str().to_string(),
            _ => check.as_str().to_string(),
        };

        tracing::debug!("{event_type}: {label} at {delays:?}");
        for delay_seconds in delays {
            tasks.push(CheckTask {
                delay_seconds,
                check,
                predicate,
                params: params.clone(),
                notify_targets: targets.clone(),
                label: label.clone(),
            });
        }
    }

    // Stable: equal delays keep declaration order.
    tasks.sort_by(|a, b| a.delay_seconds.total_cmp(&b.delay_seconds));

    tracing::info!(
        "📅 Compiled {} task(s) for {event_type} (frequency hint: {})",
        tasks.len(),
        frequency_hint.map_or_else(|| "unknown".to_string(), |f| format!("{f:.1} Hz"))
    );

    Ok(Schedule {
        event_type: event_type.to_string(),
        frequency_hint,
        tasks,
    })
}

/// Check the whole configuration up front so a bad file fails at startup,
/// not when the first event of some rare type arrives.
pub fn validate_config(config: &SupervisorConfig) -> Result<()> {
    for name in config.options.keys() {
        name.parse::<CheckName>()?;
    }

    for (section, checks) in &config.checks {
        let event_type = if section == DEFAULT_SECTION {
            EventType {
                group: String::new(),
                pipeline: String::new(),
                search: None,
            }
        } else {
            EventType::parse(section).ok_or_else(|| {
                GrinchError::Config(format!(
                    "section [checks.{section}] is not an event type (group_pipeline[_search])"
                ))
            })?
        };

        for (name, targets) in checks {
            let check: CheckName = name.parse()?;
            let options = config.options.get(name).cloned().unwrap_or_default();
            resolve_delays(check, &options, None, config.supervisor.frequency_threshold)?;
            resolve_params(check, &options, config, &event_type)?;
            for target in targets {
                NotifyTarget::parse(target)?;
            }
        }
    }

    for target in &config.supervisor.diagnostic_targets {
        NotifyTarget::parse(target)?;
    }
    Ok(())
}

fn resolve_delays(
    check: CheckName,
    options: &CheckOptions,
    frequency_hint: Option<f64>,
    threshold: f64,
) -> Result<Vec<f64>> {
    let name = check.as_str();
    let branched = options.dt_high_freq.is_some() || options.dt_low_freq.is_some();

    let delays = if branched {
        if !check.frequency_dependent() {
            return Err(GrinchError::invalid(
                name,
                "dt_high_freq",
                "check does not depend on signal frequency",
            ));
        }
        let high = validated_delays(name, "dt_high_freq", options.dt_high_freq.as_deref())?;
        let low = validated_delays(name, "dt_low_freq", options.dt_low_freq.as_deref())?;
        match frequency_hint {
            Some(f) if f >= threshold => high,
            Some(_) => low,
            None => {
                let mut union = high;
                for d in low {
                    if !union.contains(&d) {
                        union.push(d);
                    }
                }
                union.sort_by(f64::total_cmp);
                union
            }
        }
    } else {
        validated_delays(name, "dt", options.dt.as_deref())?
    };
    Ok(delays)
}

/// Longest accepted delay: 30 days after creation.
pub const MAX_DELAY_SECS: f64 = 30.0 * 86_400.0;

fn validated_delays(check: &str, option: &str, delays: Option<&[f64]>) -> Result<Vec<f64>> {
    let delays = delays
        .filter(|d| !d.is_empty())
        .ok_or_else(|| GrinchError::missing(check, option))?;
    if let Some(bad) = delays.iter().find(|d| !d.is_finite() || **d < 0.0) {
        return Err(GrinchError::invalid(
            check,
            option,
            format!("delay {bad} is not a non-negative number of seconds"),
        ));
    }
    if let Some(bad) = delays.iter().find(|d| **d > MAX_DELAY_SECS) {
        return Err(GrinchError::invalid(
            check,
            option,
            format!("delay {bad}s exceeds the {MAX_DELAY_SECS}s limit"),
        ));
    }
    Ok(delays.to_vec())
}

fn resolve_params(
    check: CheckName,
    options: &CheckOptions,
    config: &SupervisorConfig,
    event_type: &EventType,
) -> Result<TaskParams> {
    let name = check.as_str();
    let mut params = TaskParams {
        far_ceiling: options.far_threshold.or_else(|| {
            options.far_gated.then(|| {
                config.far_threshold_for(&event_type.pipeline, event_type.search.as_deref())
            })
        }),
        filename: options.filename.clone(),
        tag: options.tag.clone(),
        lvem: options.lvem,
        time_key: options.time_key.unwrap_or_default(),
        ..TaskParams::default()
    };

    match check {
        CheckName::Far => {
            params.max_far = options.max_far.ok_or_else(|| GrinchError::missing(name, "max_far"))?;
            params.min_far = options.min_far.unwrap_or(0.0);
            if params.min_far >= params.max_far {
                return Err(GrinchError::invalid(name, "min_far", "must be below max_far"));
            }
        }
        CheckName::LocalRates => {
            params.rate = positive(name, "rate", options.rate)?;
            params.window = positive(name, "window", options.window)?;
            if params.window * params.rate < 1.0 {
                tracing::warn!(
                    "local_rates: window*rate < 1, every event will exceed the count threshold"
                );
            }
        }
        CheckName::IdqStart | CheckName::IdqFinish => {
            if let Some(ifos) = &options.ifos {
                if ifos.is_empty() {
                    return Err(GrinchError::invalid(name, "ifos", "list is empty"));
                }
                params.ifos = ifos.clone();
            }
        }
        CheckName::PeReadyLabel => {
            if let Some(names) = &options.pe_pipelines {
                if names.is_empty() {
                    return Err(GrinchError::invalid(name, "pe_pipelines", "list is empty"));
                }
                params.pe_pipelines = names
                    .iter()
                    .map(|p| p.parse::<PePipeline>())
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| GrinchError::invalid(name, "pe_pipelines", e))?;
            }
        }
        _ => {}
    }
    Ok(params)
}

fn positive(check: &str, option: &str, value: Option<f64>) -> Result<f64> {
    let value = value.ok_or_else(|| GrinchError::missing(check, option))?;
    if !(value.is_finite() && value > 0.0) {
        return Err(GrinchError::invalid(check, option, "must be a positive number"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        [supervisor]
        frequency_threshold = 100.0
        default_far_threshold = 1e-6
        far_thresholds = { "cwb.AllSky" = 1e-5 }

        [checks.default]
        far = ["ops@example.org"]
        idq_start = ["dq@example.org"]
        eventcreation = ["ops@example.org"]

        [checks.Burst_cwb_AllSky]
        lib_start = ["pe@example.org"]
        plot_skymaps = ["skyloc@example.org"]

        [options.far]
        dt = [10.0]
        maxFAR = 1e-6

        [options.idq_start]
        dt = [120.0, 30.0]
        ifos = ["H1", "L1"]

        [options.eventcreation]
        dt = [30.0]

        [options.lib_start]
        dt_high_freq = [60.0, 300.0]
        dt_low_freq = [600.0, 300.0]

        [options.plot_skymaps]
        dt = [300.0]
        far_gated = true
    "#;

    fn config() -> SupervisorConfig {
        SupervisorConfig::from_toml(CONFIG).unwrap()
    }

    fn burst() -> EventType {
        EventType::parse("Burst_cwb_AllSky").unwrap()
    }

    fn delays(schedule: &Schedule) -> Vec<(f64, String)> {
        schedule
            .tasks()
            .iter()
            .map(|t| (t.delay_seconds, t.label.clone()))
            .collect()
    }

    #[test]
    fn test_sorted_and_deterministic() {
        let a = compile(&config(), &burst(), Some(250.0)).unwrap();
        let b = compile(&config(), &burst(), Some(250.0)).unwrap();
        assert_eq!(a.tasks(), b.tasks());
        assert!(a
            .tasks()
            .windows(2)
            .all(|w| w[0].delay_seconds <= w[1].delay_seconds));
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let schedule = compile(&config(), &burst(), None).unwrap();
        let at_30: Vec<String> = delays(&schedule)
            .into_iter()
            .filter(|(d, _)| *d == 30.0)
            .map(|(_, l)| l)
            .collect();
        assert_eq!(at_30, vec!["cwb_eventcreation", "idq_start"]);
    }

    #[test]
    fn test_one_task_per_delay() {
        let schedule = compile(&config(), &burst(), Some(250.0)).unwrap();
        let idq: Vec<f64> = schedule
            .tasks()
            .iter()
            .filter(|t| t.check == CheckName::IdqStart)
            .map(|t| t.delay_seconds)
            .collect();
        assert_eq!(idq, vec![30.0, 120.0]);
        assert!(schedule
            .tasks()
            .iter()
            .filter(|t| t.check == CheckName::IdqStart)
            .all(|t| t.notify_targets == vec!["dq@example.org".to_string()]));
    }

    #[test]
    fn test_frequency_branch_selection() {
        let lib = |hint| -> Vec<f64> {
            compile(&config(), &burst(), hint)
                .unwrap()
                .tasks()
                .iter()
                .filter(|t| t.check == CheckName::LibStart)
                .map(|t| t.delay_seconds)
                .collect()
        };
        assert_eq!(lib(Some(250.0)), vec![60.0, 300.0]);
        assert_eq!(lib(Some(100.0)), vec![60.0, 300.0]);
        assert_eq!(lib(Some(40.0)), vec![300.0, 600.0]);
        assert_eq!(lib(None), vec![60.0, 300.0, 600.0]);
        assert_eq!(lib(Some(f64::NAN)), vec![60.0, 300.0, 600.0]);
    }

    #[test]
    fn test_default_only_event_type() {
        let cbc = EventType::parse("CBC_gstlal_LowMass").unwrap();
        let schedule = compile(&config(), &cbc, None).unwrap();
        let labels: Vec<String> = schedule.tasks().iter().map(|t| t.label.clone()).collect();
        assert_eq!(labels, vec!["far", "gstlal_eventcreation", "idq_start", "idq_start"]);
    }

    #[test]
    fn test_eventcreation_skipped_for_unknown_pipeline() {
        let spiir = EventType::parse("CBC_spiir").unwrap();
        let schedule = compile(&config(), &spiir, None).unwrap();
        assert!(schedule
            .tasks()
            .iter()
            .all(|t| t.check != CheckName::EventCreation));
    }

    #[test]
    fn test_far_gate_resolved_per_pipeline() {
        let schedule = compile(&config(), &burst(), None).unwrap();
        let plot = schedule
            .tasks()
            .iter()
            .find(|t| t.check == CheckName::PlotSkymaps)
            .unwrap();
        assert_eq!(plot.params.far_ceiling, Some(1e-5));

        let far = schedule.tasks().iter().find(|t| t.check == CheckName::Far).unwrap();
        assert_eq!(far.params.far_ceiling, None);
        assert_eq!(far.params.max_far, 1e-6);
    }

    #[test]
    fn test_explicit_far_threshold_wins() {
        let mut config = config();
        config.options.get_mut("plot_skymaps").unwrap().far_threshold = Some(3e-8);
        let schedule = compile(&config, &burst(), None).unwrap();
        let plot = schedule
            .tasks()
            .iter()
            .find(|t| t.check == CheckName::PlotSkymaps)
            .unwrap();
        assert_eq!(plot.params.far_ceiling, Some(3e-8));
    }

    #[test]
    fn test_unknown_check_fails() {
        let mut config = config();
        config
            .checks
            .get_mut("default")
            .unwrap()
            .insert("idq_begin".into(), vec![]);
        let err = compile(&config, &burst(), None).unwrap_err();
        assert!(matches!(err, GrinchError::UnknownCheck(ref n) if n == "idq_begin"));
    }

    #[test]
    fn test_missing_dt_fails() {
        let mut config = config();
        config.options.remove("idq_start");
        let err = compile(&config, &burst(), None).unwrap_err();
        assert!(matches!(err, GrinchError::MissingOption { ref option, .. } if option == "dt"));
    }

    #[test]
    fn test_missing_threshold_fails() {
        let mut config = config();
        config.options.get_mut("far").unwrap().max_far = None;
        let err = compile(&config, &burst(), None).unwrap_err();
        assert!(matches!(err, GrinchError::MissingOption { ref option, .. } if option == "max_far"));
    }

    #[test]
    fn test_half_branched_check_fails() {
        let mut config = config();
        config.options.get_mut("lib_start").unwrap().dt_low_freq = None;
        let err = compile(&config, &burst(), Some(300.0)).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_out_of_range_delay_rejected() {
        let mut config = config();
        config.options.get_mut("idq_start").unwrap().dt = Some(vec![30.0, 1e20]);
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, GrinchError::InvalidOption { ref option, .. } if option == "dt"));

        config.options.get_mut("idq_start").unwrap().dt = Some(vec![MAX_DELAY_SECS]);
        let schedule = compile(&config, &burst(), None).unwrap();
        let task = schedule.tasks().iter().find(|t| t.label == "idq_start").unwrap();
        assert_eq!(task.delay(), Duration::from_secs(30 * 86_400));
    }

    #[test]
    fn test_validate_config() {
        assert!(validate_config(&config()).is_ok());

        let mut bad = config();
        bad.checks.insert("Burst".into(), Default::default());
        assert!(validate_config(&bad).is_err());

        let mut bad = config();
        bad.checks
            .get_mut("default")
            .unwrap()
            .insert("far".into(), vec!["pager:1234".into()]);
        assert!(validate_config(&bad).is_err());
    }
}
