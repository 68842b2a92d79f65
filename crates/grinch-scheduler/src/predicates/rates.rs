//! Event-property predicates: FAR bounds and local event rates.
//!
//! `local_rates` is not a completion check. It flags events that arrive as
//! part of an abnormal burst, which usually means an upstream pipeline is
//! misbehaving.

use grinch_core::error::Result;
use grinch_core::traits::Registry;
use grinch_core::types::{EventFilter, TimeRange};

use super::Outcome;
use crate::compiler::TaskParams;

/// Action required when FAR is missing or outside `(min_far, max_far)`.
pub async fn far_check(registry: &dyn Registry, event_id: &str, min_far: f64, max_far: f64) -> Result<Outcome> {
    let event = registry.get_event(event_id).await?;
    let Some(far) = event.far else {
        return Ok(Outcome::action_required().note("no FAR found"));
    };

    let mut outcome = Outcome::from_missing(!(min_far < far && far < max_far));
    if far <= min_far {
        outcome = outcome.note(format!("FAR {far:.3e} <= {min_far:.3e}"));
    }
    if far >= max_far {
        outcome = outcome.note(format!("FAR {far:.3e} >= {max_far:.3e}"));
    }
    Ok(outcome)
}

/// Count events within `±window` of this one, for its own type and for all
/// types. Action required if either count exceeds `2 · window · rate`.
///
/// The event itself is removed from the queried neighbours and then counted
/// exactly once in both totals.
pub async fn local_rates(registry: &dyn Registry, event_id: &str, params: &TaskParams) -> Result<Outcome> {
    let event = registry.get_event(event_id).await?;
    let Some(center) = event.time_on(params.time_key) else {
        return Ok(Outcome::unimplemented(format!(
            "cannot place {event_id} on {:?} axis (creation time '{}')",
            params.time_key, event.creation_time
        )));
    };

    let range = TimeRange::around(center, params.window, params.time_key);
    let query = TimeRange {
        start: range.start.floor(),
        end: range.end.ceil(),
        ..range
    };
    let neighbours: Vec<_> = registry
        .query_events(&query, &EventFilter::all())
        .await?
        .into_iter()
        .filter(|e| e.id != event.id)
        .filter(|e| e.time_on(params.time_key).is_some_and(|t| range.contains(t)))
        .collect();

    let event_type = event.event_type();
    let total = 1 + neighbours.len();
    let same_type = 1 + neighbours.iter().filter(|e| e.event_type().same_as(&event_type)).count();
    let count_thr = 2.0 * params.window * params.rate;

    tracing::debug!(
        "{event_id} : local_rates {same_type} {event_type}, {total} total within ±{}s (threshold {count_thr})",
        params.window
    );

    let mut outcome = Outcome::clear();
    if same_type as f64 > count_thr {
        outcome = Outcome::action_required().note(format!(
            "{same_type} {event_type} events within ±{}s exceeds {count_thr}",
            params.window
        ));
    }
    if total as f64 > count_thr {
        outcome = Outcome {
            verdict: super::Verdict::ActionRequired,
            ..outcome
        }
        .note(format!(
            "{total} events of all types within ±{}s exceeds {count_thr}",
            params.window
        ));
    }
    Ok(outcome)
}
