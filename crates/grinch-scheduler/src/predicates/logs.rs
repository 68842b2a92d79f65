//! Log-marker predicates — pipelines announce stage start/finish by writing
//! a known phrase into a log comment.

use grinch_core::error::Result;
use grinch_core::traits::Registry;
use grinch_core::types::LogEntry;

use super::Outcome;
use crate::checks::PredicateId;

pub const IDQ_START: &str = "Started searching for iDQ information";
pub const IDQ_FINISH: &str = "Finished searching for iDQ information";
pub const UNBLIND_INJECTIONS_NONE: &str = "No unblind injections in window";

/// Marker phrase for single-marker stage predicates.
pub fn marker_for(predicate: PredicateId) -> Option<&'static str> {
    let marker = match predicate {
        PredicateId::LibStart => "LIB Parameter estimation started.",
        PredicateId::LibFinish => "LIB Parameter estimation finished.",
        PredicateId::BayestarStart => "INFO:BAYESTAR:starting sky localization",
        PredicateId::BayestarFinish => "INFO:BAYESTAR:sky localization complete",
        PredicateId::BayeswaveStart => "BayesWaveBurst launched",
        PredicateId::BayeswaveFinish => "BWB Follow-up results",
        PredicateId::LalinferenceFinish => "online parameter estimation",
        PredicateId::ExternalTriggersSearch => "Coincidence search complete",
        _ => return None,
    };
    Some(marker)
}

/// Every phrase a search pipeline writes while creating an event.
pub fn creation_markers(predicate: PredicateId) -> &'static [&'static str] {
    match predicate {
        PredicateId::CwbEventCreation => &["cWB skymap fit", "cWB parameter estimation"],
        PredicateId::OlibEventCreation => &["Preliminary results: "],
        PredicateId::GstlalEventCreation => &["strain spectral densities", "Coinc Table Created"],
        PredicateId::MbtaEventCreation => &["Coinc Table Created", "PSDs"],
        _ => &[],
    }
}

/// Entries whose comment contains `marker`.
pub fn matching(logs: &[LogEntry], marker: &str) -> Vec<LogEntry> {
    logs.iter()
        .filter(|entry| entry.comment.contains(marker))
        .cloned()
        .collect()
}

/// Whether `comment` names instrument `ifo`, either bare (`H`) or with a
/// detector number (`H1`). Single letters inside other words do not count.
pub fn mentions_ifo(comment: &str, ifo: &str) -> bool {
    comment
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| match token.strip_prefix(ifo) {
            Some("") => true,
            Some(rest) => rest.chars().all(|c| c.is_ascii_digit()),
            None => false,
        })
}

/// Action required iff no log entry contains `marker`.
pub async fn marker(registry: &dyn Registry, event_id: &str, marker: &str) -> Result<Outcome> {
    let logs = registry.get_logs(event_id).await?;
    let found = matching(&logs, marker);
    if found.is_empty() {
        Ok(Outcome::action_required().note(format!("no log entry containing '{marker}'")))
    } else {
        Ok(Outcome::clear().evidence(found))
    }
}

/// Action required unless every instrument in `ifos` is named by some entry
/// containing `marker`. Different instruments may be named by different
/// entries.
pub async fn per_ifo(
    registry: &dyn Registry,
    event_id: &str,
    marker: &str,
    ifos: &[String],
) -> Result<Outcome> {
    let logs = registry.get_logs(event_id).await?;
    let found = matching(&logs, marker);

    let missing: Vec<&String> = ifos
        .iter()
        .filter(|ifo| !found.iter().any(|e| mentions_ifo(&e.comment, ifo)))
        .collect();

    let mut outcome = Outcome::from_missing(!missing.is_empty()).evidence(found);
    for ifo in missing {
        outcome = outcome.note(format!("no '{marker}' entry for {ifo}"));
    }
    Ok(outcome)
}

/// All creation markers for the event's search pipeline must be present.
pub async fn event_creation(
    registry: &dyn Registry,
    event_id: &str,
    predicate: PredicateId,
) -> Result<Outcome> {
    let markers = creation_markers(predicate);
    if markers.is_empty() {
        return Ok(Outcome::unimplemented(format!("{predicate} has no creation markers")));
    }

    let logs = registry.get_logs(event_id).await?;
    let mut evidence = Vec::new();
    let mut missing = Vec::new();
    for marker in markers {
        let found = matching(&logs, marker);
        if found.is_empty() {
            missing.push(*marker);
        }
        evidence.extend(found);
    }

    let mut outcome = Outcome::from_missing(!missing.is_empty()).evidence(evidence);
    for marker in missing {
        outcome = outcome.note(format!("no log entry containing '{marker}'"));
    }
    Ok(outcome)
}

/// The injection search only reports the empty case in a parseable form, so
/// anything else cannot be judged.
pub async fn unblind_injections(registry: &dyn Registry, event_id: &str) -> Result<Outcome> {
    let logs = registry.get_logs(event_id).await?;
    let found = matching(&logs, UNBLIND_INJECTIONS_NONE);
    if found.is_empty() {
        Ok(Outcome::unimplemented(
            "no 'No unblind injections in window' entry; other reports are not parsed",
        ))
    } else {
        Ok(Outcome::clear().evidence(found))
    }
}
