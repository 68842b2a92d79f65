//! Predicate library — "has stage X happened for event Y?"
//!
//! Every predicate is read-only on the registry and idempotent: evaluating
//! it twice against unchanged registry state yields equal [`Outcome`]s.
//! An `Err` means the registry could not be read, never that a stage is
//! missing.
//!
//! ## Families
//! ```text
//! logs   — substring markers in log comments (optionally per instrument)
//! files  — artifacts in the file manifest, their tags, derived artifacts
//! rates  — bursts of events around this one, FAR bounds
//! ```

pub mod files;
pub mod logs;
pub mod rates;

use serde::Serialize;

use grinch_core::error::Result;
use grinch_core::traits::Registry;
use grinch_core::types::LogEntry;

use crate::checks::PredicateId;
use crate::compiler::TaskParams;

/// Verdict of one predicate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    /// Expected state observed; nothing to do.
    Clear,
    /// Expected state missing; a human should look.
    ActionRequired,
    /// The rule cannot be decided from registry state.
    Unimplemented,
}

/// Result of evaluating a predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub verdict: Verdict,
    /// Log entries supporting the verdict, ascending by sequence number.
    pub evidence: Vec<LogEntry>,
    /// Human-readable reasons.
    pub notes: Vec<String>,
}

impl Outcome {
    pub fn clear() -> Self {
        Self::with(Verdict::Clear)
    }

    pub fn action_required() -> Self {
        Self::with(Verdict::ActionRequired)
    }

    pub fn unimplemented(reason: impl Into<String>) -> Self {
        Self::with(Verdict::Unimplemented).note(reason)
    }

    /// `ActionRequired` when `missing`, `Clear` otherwise.
    pub fn from_missing(missing: bool) -> Self {
        if missing {
            Self::action_required()
        } else {
            Self::clear()
        }
    }

    fn with(verdict: Verdict) -> Self {
        Self {
            verdict,
            evidence: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn evidence(mut self, mut entries: Vec<LogEntry>) -> Self {
        entries.sort_by_key(|e| e.sequence_number);
        entries.dedup_by_key(|e| e.sequence_number);
        self.evidence = entries;
        self
    }

    pub fn is_action_required(&self) -> bool {
        self.verdict == Verdict::ActionRequired
    }
}

/// Evaluate `predicate` for `event_id`, honouring the FAR gate in `params`.
pub async fn evaluate(
    registry: &dyn Registry,
    event_id: &str,
    predicate: PredicateId,
    params: &TaskParams,
) -> Result<Outcome> {
    if let Some(ceiling) = params.far_ceiling {
        if let Some(skip) = far_gate(registry, event_id, ceiling).await? {
            tracing::debug!("{event_id} : {predicate} skipped by FAR gate");
            return Ok(skip);
        }
    }
    evaluate_ungated(registry, event_id, predicate, params).await
}

/// `Some(Clear)` when the event's FAR is missing or above `ceiling`. Reads
/// only the event record.
pub async fn far_gate(
    registry: &dyn Registry,
    event_id: &str,
    ceiling: f64,
) -> Result<Option<Outcome>> {
    let event = registry.get_event(event_id).await?;
    let skip = match event.far {
        None => Some(Outcome::clear().note("no FAR; check skipped")),
        Some(far) if far > ceiling => Some(
            Outcome::clear().note(format!("FAR {far:.3e} above {ceiling:.3e}; check skipped")),
        ),
        Some(_) => None,
    };
    Ok(skip)
}

async fn evaluate_ungated(
    registry: &dyn Registry,
    event_id: &str,
    predicate: PredicateId,
    params: &TaskParams,
) -> Result<Outcome> {
    use PredicateId::*;

    let outcome = match predicate {
        Far => rates::far_check(registry, event_id, params.min_far, params.max_far).await?,
        LocalRates => rates::local_rates(registry, event_id, params).await?,

        CwbEventCreation | OlibEventCreation | GstlalEventCreation | MbtaEventCreation => {
            logs::event_creation(registry, event_id, predicate).await?
        }
        IdqStart => logs::per_ifo(registry, event_id, logs::IDQ_START, &params.ifos).await?,
        IdqFinish => logs::per_ifo(registry, event_id, logs::IDQ_FINISH, &params.ifos).await?,
        LalinferenceStart => Outcome::unimplemented(
            "LALInference does not report that it has started; nothing to check",
        ),
        UnblindInjectionsSearch => logs::unblind_injections(registry, event_id).await?,
        LibStart | LibFinish | BayestarStart | BayestarFinish | BayeswaveStart
        | BayeswaveFinish | LalinferenceFinish | ExternalTriggersSearch => {
            match logs::marker_for(predicate) {
                Some(marker) => logs::marker(registry, event_id, marker).await?,
                None => Outcome::unimplemented(format!("no log marker known for {predicate}")),
            }
        }

        SkymapUpload => files::artifact(registry, event_id, params).await?,
        PlotSkymaps => files::paired(registry, event_id, "png").await?,
        JsonSkymaps => files::paired(registry, event_id, "json").await?,
        EmReadyLabel => files::emready_label(registry, event_id).await?,
        PeReadyLabel => files::peready_label(registry, event_id, &params.pe_pipelines).await?,
    };

    tracing::debug!(
        "{event_id} : {predicate} → {:?} ({} evidence entries)",
        outcome.verdict,
        outcome.evidence.len()
    );
    Ok(outcome)
}
