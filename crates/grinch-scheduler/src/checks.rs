//! Check catalogue — configured check names and the predicates behind them.

use std::fmt;
use std::str::FromStr;

use grinch_core::error::GrinchError;

/// A check name as written in `[checks.*]` sections.
///
/// Variant order is the declaration order used to break ties between tasks
/// sharing a delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CheckName {
    Far,
    LocalRates,
    EventCreation,
    IdqStart,
    IdqFinish,
    LibStart,
    LibFinish,
    BayestarStart,
    BayestarFinish,
    BayeswaveStart,
    BayeswaveFinish,
    LalinferenceStart,
    LalinferenceFinish,
    ExternalTriggersSearch,
    UnblindInjectionsSearch,
    SkymapUpload,
    PlotSkymaps,
    JsonSkymaps,
    EmReadyLabel,
    PeReadyLabel,
}

impl CheckName {
    pub const ALL: [CheckName; 20] = [
        Self::Far,
        Self::LocalRates,
        Self::EventCreation,
        Self::IdqStart,
        Self::IdqFinish,
        Self::LibStart,
        Self::LibFinish,
        Self::BayestarStart,
        Self::BayestarFinish,
        Self::BayeswaveStart,
        Self::BayeswaveFinish,
        Self::LalinferenceStart,
        Self::LalinferenceFinish,
        Self::ExternalTriggersSearch,
        Self::UnblindInjectionsSearch,
        Self::SkymapUpload,
        Self::PlotSkymaps,
        Self::JsonSkymaps,
        Self::EmReadyLabel,
        Self::PeReadyLabel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Far => "far",
            Self::LocalRates => "local_rates",
            Self::EventCreation => "eventcreation",
            Self::IdqStart => "idq_start",
            Self::IdqFinish => "idq_finish",
            Self::LibStart => "lib_start",
            Self::LibFinish => "lib_finish",
            Self::BayestarStart => "bayestar_start",
            Self::BayestarFinish => "bayestar_finish",
            Self::BayeswaveStart => "bayeswave_start",
            Self::BayeswaveFinish => "bayeswave_finish",
            Self::LalinferenceStart => "lalinference_start",
            Self::LalinferenceFinish => "lalinference_finish",
            Self::ExternalTriggersSearch => "externaltriggers_search",
            Self::UnblindInjectionsSearch => "unblindinjections_search",
            Self::SkymapUpload => "skymap_upload",
            Self::PlotSkymaps => "plot_skymaps",
            Self::JsonSkymaps => "json_skymaps",
            Self::EmReadyLabel => "emready_label",
            Self::PeReadyLabel => "peready_label",
        }
    }

    /// Parameter-estimation stages whose latency depends on signal frequency.
    pub fn frequency_dependent(&self) -> bool {
        matches!(
            self,
            Self::LibStart
                | Self::LibFinish
                | Self::BayeswaveStart
                | Self::BayeswaveFinish
                | Self::LalinferenceStart
                | Self::LalinferenceFinish
        )
    }

    /// Predicate for this check on events from `pipeline`. `None` when the
    /// check has no rule for that pipeline.
    pub fn predicate_for(&self, pipeline: &str) -> Option<PredicateId> {
        let id = match self {
            Self::Far => PredicateId::Far,
            Self::LocalRates => PredicateId::LocalRates,
            Self::EventCreation => match pipeline.to_ascii_lowercase().as_str() {
                "cwb" => PredicateId::CwbEventCreation,
                "olib" => PredicateId::OlibEventCreation,
                "gstlal" => PredicateId::GstlalEventCreation,
                "mbtaonline" => PredicateId::MbtaEventCreation,
                _ => return None,
            },
            Self::IdqStart => PredicateId::IdqStart,
            Self::IdqFinish => PredicateId::IdqFinish,
            Self::LibStart => PredicateId::LibStart,
            Self::LibFinish => PredicateId::LibFinish,
            Self::BayestarStart => PredicateId::BayestarStart,
            Self::BayestarFinish => PredicateId::BayestarFinish,
            Self::BayeswaveStart => PredicateId::BayeswaveStart,
            Self::BayeswaveFinish => PredicateId::BayeswaveFinish,
            Self::LalinferenceStart => PredicateId::LalinferenceStart,
            Self::LalinferenceFinish => PredicateId::LalinferenceFinish,
            Self::ExternalTriggersSearch => PredicateId::ExternalTriggersSearch,
            Self::UnblindInjectionsSearch => PredicateId::UnblindInjectionsSearch,
            Self::SkymapUpload => PredicateId::SkymapUpload,
            Self::PlotSkymaps => PredicateId::PlotSkymaps,
            Self::JsonSkymaps => PredicateId::JsonSkymaps,
            Self::EmReadyLabel => PredicateId::EmReadyLabel,
            Self::PeReadyLabel => PredicateId::PeReadyLabel,
        };
        Some(id)
    }
}

impl fmt::Display for CheckName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckName {
    type Err = GrinchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| GrinchError::UnknownCheck(s.to_string()))
    }
}

/// A concrete rule in the predicate library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredicateId {
    Far,
    LocalRates,
    CwbEventCreation,
    OlibEventCreation,
    GstlalEventCreation,
    MbtaEventCreation,
    IdqStart,
    IdqFinish,
    LibStart,
    LibFinish,
    BayestarStart,
    BayestarFinish,
    BayeswaveStart,
    BayeswaveFinish,
    LalinferenceStart,
    LalinferenceFinish,
    ExternalTriggersSearch,
    UnblindInjectionsSearch,
    SkymapUpload,
    PlotSkymaps,
    JsonSkymaps,
    EmReadyLabel,
    PeReadyLabel,
}

impl PredicateId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Far => "far_check",
            Self::LocalRates => "local_rates",
            Self::CwbEventCreation => "cwb_eventcreation",
            Self::OlibEventCreation => "olib_eventcreation",
            Self::GstlalEventCreation => "gstlal_eventcreation",
            Self::MbtaEventCreation => "mbta_eventcreation",
            Self::IdqStart => "idq_start",
            Self::IdqFinish => "idq_finish",
            Self::LibStart => "lib_start",
            Self::LibFinish => "lib_finish",
            Self::BayestarStart => "bayestar_start",
            Self::BayestarFinish => "bayestar_finish",
            Self::BayeswaveStart => "bayeswave_start",
            Self::BayeswaveFinish => "bayeswave_finish",
            Self::LalinferenceStart => "lalinference_start",
            Self::LalinferenceFinish => "lalinference_finish",
            Self::ExternalTriggersSearch => "externaltriggers_search",
            Self::UnblindInjectionsSearch => "unblindinjections_search",
            Self::SkymapUpload => "skymap_upload",
            Self::PlotSkymaps => "plot_skymaps",
            Self::JsonSkymaps => "json_skymaps",
            Self::EmReadyLabel => "emready_label",
            Self::PeReadyLabel => "peready_label",
        }
    }
}

impl fmt::Display for PredicateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameter-estimation pipelines `peready_label` can consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PePipeline {
    Lib,
    Bayeswave,
    Lalinference,
}

impl PePipeline {
    pub fn finish_predicate(&self) -> PredicateId {
        match self {
            Self::Lib => PredicateId::LibFinish,
            Self::Bayeswave => PredicateId::BayeswaveFinish,
            Self::Lalinference => PredicateId::LalinferenceFinish,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lib => "lib",
            Self::Bayeswave => "bayeswave",
            Self::Lalinference => "lalinference",
        }
    }
}

impl FromStr for PePipeline {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lib" => Ok(Self::Lib),
            "bayeswave" => Ok(Self::Bayeswave),
            "lalinference" => Ok(Self::Lalinference),
            other => Err(format!("unknown PE pipeline '{other}'")),
        }
    }
}
