//! # kinfit-finders
//!
//! The decay finders of `kinfit`. Each finder implements the [`Finder`] trait and appends its
//! candidates to the per-event [`EventCandidates`], which later finders may consult for vetoes.
#![warn(clippy::perf, clippy::style)]
#![allow(clippy::excessive_precision)]

use std::fmt::Display;

use dyn_clone::DynClone;
use indexmap::IndexMap;
use kinfit_core::{
    candidate::{DecayCandidate, EventCandidates},
    cuts::{CutFlow, CutRegistry},
    data::Event,
    fit::FitResult,
    io::ConfigValue,
    observer::{FinderSummary, Observer},
    utils::enums::{DecayKind, Mode, TruthMatch},
    KinFitError, KinFitResult,
};

/// The driver which runs a chain of finders over a set of events.
pub mod analysis;
/// Photon conversion $`\gamma \to e^+e^-`$ reconstruction.
pub mod conversion;
/// $`D^0 \to K\pi`$ reconstruction.
pub mod d0;
/// $`D^{*\pm} \to D^0\pi^\pm_s`$ reconstruction.
pub mod dstar;
/// $`K^0_S \to \pi^+\pi^-`$ reconstruction.
pub mod k0s;
/// $`\Lambda \to p\pi`$ reconstruction.
pub mod lambda;
/// Flagging of candidates which share tracks.
pub mod shared;
/// Generator-level validation of candidates.
pub mod truth;
/// Cross-type vetoes against photon conversions, $`K^0_S`$ and $`\Lambda`$ decays.
pub mod veto;

pub use analysis::Analysis;
pub use conversion::{ConversionConfig, ConversionFinder};
pub use d0::{D0Config, D0Finder};
pub use dstar::{DstarConfig, DstarFinder};
pub use k0s::{K0sConfig, K0sFinder};
pub use lambda::{LambdaConfig, LambdaFinder};
pub use shared::find_shared_tracks;

/// Every track of an MC event must carry a truth link above this probability to be considered
/// at all, so that purities are computed on tracks with a generator-level counterpart.
pub const TRUTH_LINK_MIN: f64 = 1e-4;

/// The parts of the event record a finder reads.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Branch {
    /// Run and event number and the event weight.
    EventHeader,
    PrimaryVertex,
    Vertices,
    Tracks,
    /// Generator-level particles (simulation only).
    McParticles,
}
impl Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Branch::EventHeader => write!(f, "EventHeader"),
            Branch::PrimaryVertex => write!(f, "PrimaryVertex"),
            Branch::Vertices => write!(f, "Vertices"),
            Branch::Tracks => write!(f, "Tracks"),
            Branch::McParticles => write!(f, "McParticles"),
        }
    }
}

/// Running totals kept by every finder over a job.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FinderStats {
    pub cut_flow: CutFlow,
    pub n_events: u64,
    pub n_fits: u64,
    pub n_signal: u64,
    pub n_background: u64,
    pub abundance_true: u64,
    pub n_true: u64,
    pub n_false: u64,
    pub n_indeterminate: u64,
}

impl FinderStats {
    /// Fresh statistics whose cut-flow lists `stages` in order.
    pub fn new<I, S>(stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cut_flow: CutFlow::new(stages),
            ..Default::default()
        }
    }

    pub fn pass(&mut self, stage: &str, weight: f64) {
        self.cut_flow.pass(stage, weight);
    }

    pub fn record_truth(&mut self, truth: TruthMatch) {
        match truth {
            TruthMatch::True => self.n_true += 1,
            TruthMatch::False => self.n_false += 1,
            TruthMatch::Indeterminate => self.n_indeterminate += 1,
        }
    }

    /// The same stages with every count at zero.
    pub fn cleared(&self) -> Self {
        Self::new(self.cut_flow.iter().map(|(name, _)| name))
    }

    pub fn merge(&mut self, other: &FinderStats) {
        self.cut_flow.merge(&other.cut_flow);
        self.n_events += other.n_events;
        self.n_fits += other.n_fits;
        self.n_signal += other.n_signal;
        self.n_background += other.n_background;
        self.abundance_true += other.abundance_true;
        self.n_true += other.n_true;
        self.n_false += other.n_false;
        self.n_indeterminate += other.n_indeterminate;
    }

    pub fn summary(&self, finder: &str, kind: DecayKind, mode: Mode) -> FinderSummary {
        FinderSummary {
            finder: finder.to_string(),
            kind,
            mode,
            n_events: self.n_events,
            n_fits: self.n_fits,
            n_signal: self.n_signal,
            n_background: self.n_background,
            abundance_true: self.abundance_true,
            n_true: self.n_true,
            n_false: self.n_false,
            n_indeterminate: self.n_indeterminate,
            cut_flow: self.cut_flow.clone(),
        }
    }
}

/// The configuration of one finder: numeric cuts reachable through a [`CutRegistry`], a
/// reconstruction [`Mode`], and optional boolean switches.
pub trait FinderConfig: Sized + 'static {
    /// The name of the configuration-file table holding this finder's settings.
    const SECTION: &'static str;
    fn registry() -> &'static CutRegistry<Self>;
    fn mode(&self) -> Mode;
    /// Switch the reconstruction mode, rejecting modes the finder does not implement.
    fn set_mode(&mut self, mode: Mode) -> KinFitResult<()>;
    /// Set a boolean switch. No switches exist unless a finder overrides this.
    fn set_flag(&mut self, name: &str, _value: bool) -> KinFitResult<()> {
        Err(KinFitError::UnknownCut {
            name: name.to_string(),
            finder: Self::registry().finder().to_string(),
        })
    }
    /// Apply one configuration table. Numbers are cuts, `mode` is a [`Mode`] and booleans are
    /// switches; anything else is rejected.
    fn apply(&mut self, section: &IndexMap<String, ConfigValue>) -> KinFitResult<()> {
        for (key, value) in section {
            match value {
                ConfigValue::Number(v) => Self::registry().set(self, key, *v)?,
                ConfigValue::Flag(b) => self.set_flag(key, *b)?,
                ConfigValue::Text(s) if key == "mode" => self.set_mode(s.parse()?)?,
                ConfigValue::Text(_) => {
                    return Err(KinFitError::UnknownCut {
                        name: key.clone(),
                        finder: Self::registry().finder().to_string(),
                    })
                }
            }
        }
        Ok(())
    }
    /// Every registered cut with its description and current value.
    fn cut_values(&self) -> Vec<(&'static str, &'static str, f64)> {
        Self::registry().values(self)
    }
}

/// A decay finder.
///
/// A finder is run once per event by the [`Analysis`] driver. It reads the immutable [`Event`]
/// and pushes its candidates into the [`EventCandidates`] of that event. All bookkeeping which
/// outlives an event lives in the finder's [`FinderStats`].
pub trait Finder: DynClone + Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> DecayKind;
    fn mode(&self) -> Mode;
    /// The parts of the event record this finder reads.
    fn set_branch_status(&self) -> Vec<Branch>;
    /// Announce the finder to `observer` before the first event.
    fn book_histograms(&mut self, observer: &mut dyn Observer) {
        for (cut, description, value) in self.cut_values() {
            tracing::info!(finder = %self.name(), cut, value, "{}", description);
        }
        observer.book(self.name(), self.kind());
    }
    /// Reconstruct all candidates of one event.
    ///
    /// Rejected combinations are simply dropped. Errors are reserved for fatal conditions such
    /// as a missing primary vertex or a negative chi-square.
    fn analyze_event(&mut self, event: &Event, candidates: &mut EventCandidates) -> KinFitResult<()>;
    /// The end-of-job report.
    fn terminate(&self) -> FinderSummary {
        let summary = self.stats().summary(self.name(), self.kind(), self.mode());
        tracing::info!(
            finder = %self.name(),
            events = summary.n_events,
            fits = summary.n_fits,
            signal = summary.n_signal,
            background = summary.n_background,
            "finder summary"
        );
        tracing::debug!(finder = %self.name(), "cut flow:\n{}", summary.cut_flow);
        summary
    }
    fn stats(&self) -> &FinderStats;
    fn stats_mut(&mut self) -> &mut FinderStats;
    /// Apply the table of this finder from a configuration file.
    fn configure(&mut self, section: &IndexMap<String, ConfigValue>) -> KinFitResult<()>;
    /// The name of the configuration table read by [`Finder::configure`].
    fn section(&self) -> &'static str;
    fn cut_values(&self) -> Vec<(&'static str, &'static str, f64)>;
}

dyn_clone::clone_trait_object!(Finder);

/// Which of two mass-hypothesis orderings of the same tracks to keep.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Hypothesis {
    First,
    Second,
}

/// Choose between two fits of the same tracks under swapped mass hypotheses.
///
/// Non-converged fits are never chosen. If both converged, the lower $`\chi^2/n_{dof}`$ wins
/// and a tie goes to the first ordering.
pub fn select_hypothesis(first: &FitResult, second: &FitResult) -> Option<Hypothesis> {
    match (first.converged(), second.converged()) {
        (false, false) => None,
        (true, false) => Some(Hypothesis::First),
        (false, true) => Some(Hypothesis::Second),
        (true, true) => {
            if first.chi2_over_ndof() <= second.chi2_over_ndof() {
                Some(Hypothesis::First)
            } else {
                Some(Hypothesis::Second)
            }
        }
    }
}

/// Route a finished candidate into the signal list (opposite-charge legs) or the background
/// list (same-charge legs) of its kind, attaching a truth verdict to signal candidates of
/// simulated events.
pub(crate) fn store(
    event: &Event,
    stats: &mut FinderStats,
    candidates: &mut EventCandidates,
    mut candidate: DecayCandidate,
    opposite: bool,
    matching_prob_min: f64,
) -> KinFitResult<()> {
    let lists = candidates.get_mut(candidate.kind);
    if opposite {
        stats.pass("Opp. sign", event.weight);
        candidate.truth = truth::match_candidate(event, &candidate, matching_prob_min)?;
        if let Some(verdict) = candidate.truth {
            stats.record_truth(verdict);
        }
        lists.push_signal(candidate);
        stats.n_signal += 1;
    } else {
        stats.pass("Same sign", event.weight);
        lists.push_background(candidate);
        stats.n_background += 1;
    }
    Ok(())
}

/// The shared part of [`Finder`] for finders holding a [`FinderConfig`] and [`FinderStats`].
macro_rules! impl_finder_config_access {
    ($config:ty) => {
        fn stats(&self) -> &$crate::FinderStats {
            &self.stats
        }
        fn stats_mut(&mut self) -> &mut $crate::FinderStats {
            &mut self.stats
        }
        fn mode(&self) -> kinfit_core::utils::enums::Mode {
            <$config as $crate::FinderConfig>::mode(&self.config)
        }
        fn section(&self) -> &'static str {
            <$config as $crate::FinderConfig>::SECTION
        }
        fn cut_values(&self) -> Vec<(&'static str, &'static str, f64)> {
            <$config as $crate::FinderConfig>::cut_values(&self.config)
        }
    };
}
pub(crate) use impl_finder_config_access;

#[cfg(test)]
mod tests {
    use kinfit_core::utils::enums::FitStatus;

    use super::*;

    fn fit(status: FitStatus, chi2: f64) -> FitResult {
        FitResult {
            status,
            chi2,
            ndof: 1,
            iterations: 3,
            constraint_residual: 0.0,
            p4s: Vec::new(),
        }
    }

    #[test]
    fn test_select_hypothesis() {
        let kpi = fit(FitStatus::Converged, 1.2);
        let pik = fit(FitStatus::Converged, 3.4);
        assert_eq!(select_hypothesis(&kpi, &pik), Some(Hypothesis::First));
        assert_eq!(select_hypothesis(&pik, &kpi), Some(Hypothesis::Second));
        assert_eq!(select_hypothesis(&kpi, &kpi.clone()), Some(Hypothesis::First));
        let failed = fit(FitStatus::NotConverged, 0.1);
        let aborted = fit(FitStatus::Aborted, 0.0);
        assert_eq!(select_hypothesis(&failed, &pik), Some(Hypothesis::Second));
        assert_eq!(select_hypothesis(&kpi, &aborted), Some(Hypothesis::First));
        assert_eq!(select_hypothesis(&failed, &aborted), None);
    }

    #[test]
    fn test_stats_merge_and_clear() {
        let mut a = FinderStats::new(["A", "B"]);
        a.pass("A", 0.5);
        a.n_events = 2;
        a.record_truth(TruthMatch::True);
        let mut b = a.cleared();
        assert_eq!(b.cut_flow.len(), 2);
        assert_eq!(b.cut_flow.count("A"), 0);
        b.pass("B", 1.0);
        b.n_events = 3;
        b.record_truth(TruthMatch::Indeterminate);
        a.merge(&b);
        assert_eq!(a.n_events, 5);
        assert_eq!(a.cut_flow.count("A"), 1);
        assert_eq!(a.cut_flow.count("B"), 1);
        assert_eq!((a.n_true, a.n_false, a.n_indeterminate), (1, 0, 1));
        let summary = a.summary("TestFinder", DecayKind::D0, Mode::KinFit);
        assert_eq!(summary.n_true, 1);
        assert_eq!(summary.finder, "TestFinder");
    }

    #[test]
    fn enum_displays() {
        assert_eq!(format!("{}", Branch::Tracks), "Tracks");
        assert_eq!(format!("{}", Branch::McParticles), "McParticles");
    }
}
