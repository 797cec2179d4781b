use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    candidate::{DecayCandidate, EventCandidates},
    cuts::CutFlow,
    data::Event,
    utils::{
        enums::{DecayKind, Mode, TruthMatch},
        Histogram,
    },
};

/// The end-of-job report of one finder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinderSummary {
    pub finder: String,
    pub kind: DecayKind,
    pub mode: Mode,
    pub n_events: u64,
    pub n_fits: u64,
    pub n_signal: u64,
    pub n_background: u64,
    /// Generated decays in acceptance whose legs were all reconstructed.
    pub abundance_true: u64,
    pub n_true: u64,
    pub n_false: u64,
    pub n_indeterminate: u64,
    pub cut_flow: CutFlow,
}

impl FinderSummary {
    /// Truth-matched candidates per generated decay in acceptance.
    pub fn efficiency(&self) -> Option<f64> {
        (self.abundance_true > 0).then(|| self.n_true as f64 / self.abundance_true as f64)
    }

    /// Truth-matched candidates per candidate with a decided truth verdict.
    pub fn purity(&self) -> Option<f64> {
        let decided = self.n_true + self.n_false;
        (decided > 0).then(|| self.n_true as f64 / decided as f64)
    }
}

/// A sink for reconstruction results.
///
/// Finders never write histograms or output files themselves. Instead, the driver hands every
/// event's finished candidates to an [`Observer`] after all finders and the shared-track
/// resolution have run.
pub trait Observer {
    /// Called once per finder before the first event.
    fn book(&mut self, _finder: &str, _kind: DecayKind) {}
    /// Called once per event with everything that was reconstructed in it.
    fn observe(&mut self, event: &Event, candidates: &EventCandidates);
    /// Called once at the end of the job.
    fn terminate(&mut self, _summaries: &[FinderSummary]) {}
}

/// An [`Observer`] which ignores everything.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn observe(&mut self, _event: &Event, _candidates: &EventCandidates) {}
}

/// Weighted invariant-mass histograms of signal and background candidates, with the signal
/// additionally split by truth verdict for simulated events.
///
/// Candidates flagged as sharing tracks and candidates with an indeterminate truth verdict are
/// never filled.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MassHistograms {
    bins: usize,
    pub histograms: IndexMap<String, Histogram>,
}

impl MassHistograms {
    pub fn new(bins: usize) -> Self {
        Self {
            bins,
            histograms: IndexMap::new(),
        }
    }

    /// The mass range shown for each kind (GeV).
    pub fn range(kind: DecayKind) -> (f64, f64) {
        match kind {
            DecayKind::K0s => (0.4, 0.6),
            DecayKind::Lambda => (1.08, 1.16),
            DecayKind::D0 => (1.7, 2.0),
            DecayKind::Dstar => (1.9, 2.1),
            DecayKind::Conversion => (0.0, 0.1),
        }
    }

    pub fn get(&self, kind: DecayKind, label: &str) -> Option<&Histogram> {
        self.histograms.get(&format!("{kind} {label}"))
    }

    fn fill(&mut self, kind: DecayKind, label: &str, value: f64, weight: f64) {
        if let Some(h) = self.histograms.get_mut(&format!("{kind} {label}")) {
            h.fill(value, weight);
        }
    }

    fn fill_signal(&mut self, candidate: &DecayCandidate, weight: f64) {
        if candidate.shared_tracks {
            return;
        }
        match candidate.truth {
            Some(TruthMatch::Indeterminate) => {}
            Some(TruthMatch::True) => {
                self.fill(candidate.kind, "signal", candidate.m(), weight);
                self.fill(candidate.kind, "true", candidate.m(), weight);
            }
            Some(TruthMatch::False) => {
                self.fill(candidate.kind, "signal", candidate.m(), weight);
                self.fill(candidate.kind, "false", candidate.m(), weight);
            }
            None => self.fill(candidate.kind, "signal", candidate.m(), weight),
        }
    }
}

impl Observer for MassHistograms {
    fn book(&mut self, finder: &str, kind: DecayKind) {
        let range = Self::range(kind);
        let bins = self.bins;
        for label in ["signal", "background", "true", "false"] {
            self.histograms
                .entry(format!("{kind} {label}"))
                .or_insert_with(|| Histogram::new(bins, range));
        }
        tracing::debug!(finder, kind = %kind, bins, "booked mass histograms");
    }

    fn observe(&mut self, event: &Event, candidates: &EventCandidates) {
        for kind in DecayKind::all() {
            let lists = candidates.get(kind);
            for candidate in &lists.signal {
                self.fill_signal(candidate, event.weight);
            }
            for candidate in &lists.background {
                if candidate.truth != Some(TruthMatch::Indeterminate) {
                    self.fill(kind, "background", candidate.m(), event.weight);
                }
            }
        }
    }

    fn terminate(&mut self, _summaries: &[FinderSummary]) {
        for (name, histogram) in &self.histograms {
            tracing::info!(histogram = %name, entries = histogram.integral(), "mass histogram");
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        candidate::FittedDaughter,
        data::{test_event, VertexId},
        utils::enums::Species,
    };

    fn candidate() -> DecayCandidate {
        let event = test_event();
        let daughters = event
            .tracks
            .iter()
            .map(|t| FittedDaughter::new(t, Species::Pion, t.p4(0.13957)))
            .collect();
        DecayCandidate::new(DecayKind::K0s, daughters, VertexId(0))
    }

    #[test]
    fn test_summary_ratios() {
        let summary = FinderSummary {
            finder: "K0sFinder".to_string(),
            kind: DecayKind::K0s,
            mode: Mode::KinFit,
            n_events: 10,
            n_fits: 12,
            n_signal: 8,
            n_background: 1,
            abundance_true: 10,
            n_true: 6,
            n_false: 2,
            n_indeterminate: 0,
            cut_flow: CutFlow::default(),
        };
        assert_relative_eq!(summary.efficiency().unwrap(), 0.6);
        assert_relative_eq!(summary.purity().unwrap(), 0.75);
        let empty = FinderSummary {
            abundance_true: 0,
            n_true: 0,
            n_false: 0,
            ..summary
        };
        assert_eq!(empty.efficiency(), None);
        assert_eq!(empty.purity(), None);
    }

    #[test]
    fn test_mass_histograms_skip_shared_and_indeterminate() {
        let event = test_event();
        let mut observer = MassHistograms::new(50);
        observer.book("K0sFinder", DecayKind::K0s);
        let mut candidates = EventCandidates::new(event.number);
        let mut good = candidate();
        good.truth = Some(TruthMatch::True);
        let mut shared = candidate();
        shared.shared_tracks = true;
        let mut unknown = candidate();
        unknown.truth = Some(TruthMatch::Indeterminate);
        candidates.k0s.push_signal(good);
        candidates.k0s.push_signal(shared);
        candidates.k0s.push_signal(unknown);
        candidates.k0s.push_background(candidate());
        observer.observe(&event, &candidates);
        let signal = observer.get(DecayKind::K0s, "signal").unwrap();
        assert_relative_eq!(signal.integral(), event.weight);
        assert_relative_eq!(observer.get(DecayKind::K0s, "true").unwrap().integral(), event.weight);
        assert_relative_eq!(observer.get(DecayKind::K0s, "false").unwrap().integral(), 0.0);
        assert_relative_eq!(
            observer.get(DecayKind::K0s, "background").unwrap().integral(),
            event.weight
        );
        assert!(observer.get(DecayKind::D0, "signal").is_none());
    }
}
