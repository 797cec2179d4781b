use serde::Serialize;

use crate::{
    data::{Track, TrackId, VertexId},
    fit::probability,
    utils::{
        enums::{DecayKind, Species, TruthMatch},
        vectors::Vec4,
    },
};

/// One leg of a decay candidate: the track it came from, the particle-type hypothesis, and its
/// (refitted) four-momentum.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FittedDaughter {
    pub track: TrackId,
    pub species: Species,
    pub charge: i32,
    pub p4: Vec4,
}

impl FittedDaughter {
    pub fn new(track: &Track, species: Species, p4: Vec4) -> Self {
        Self {
            track: track.id,
            species,
            charge: track.charge(),
            p4,
        }
    }

    /// The signed PDG code implied by the hypothesis and the measured charge.
    pub fn pdg_code(&self) -> i32 {
        let code = self.species.pdg_code();
        // electrons carry the opposite sign convention to hadrons
        let sign = if self.species == Species::Electron {
            -self.charge.signum()
        } else {
            self.charge.signum()
        };
        code * sign
    }
}

/// A reconstructed decay hypothesis built from two or three tracks.
///
/// The candidate four-momentum is computed from the legs on construction and cannot be set
/// independently, so it always equals the sum of the (refitted) daughter four-momenta.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DecayCandidate {
    /// Position in the list that owns this candidate.
    pub id: usize,
    pub kind: DecayKind,
    p4: Vec4,
    daughters: Vec<FittedDaughter>,
    pub primary_vertex: VertexId,
    /// The vertex at which the legs were produced, if one was reconstructed.
    pub production_vertex: Option<VertexId>,
    pub chi2: f64,
    /// Zero for candidates which were not kinematically fitted.
    pub ndof: usize,
    pub shared_tracks: bool,
    pub truth: Option<TruthMatch>,
    /// The index of the signal candidate this one was grown from (a $`D^*`$'s $`D^0`$).
    pub seed: Option<usize>,
}

impl DecayCandidate {
    pub fn new(kind: DecayKind, daughters: Vec<FittedDaughter>, primary_vertex: VertexId) -> Self {
        let p4 = daughters.iter().map(|d| d.p4).sum();
        Self {
            id: 0,
            kind,
            p4,
            daughters,
            primary_vertex,
            production_vertex: None,
            chi2: 0.0,
            ndof: 0,
            shared_tracks: false,
            truth: None,
            seed: None,
        }
    }

    pub fn with_fit(mut self, chi2: f64, ndof: usize) -> Self {
        self.chi2 = chi2;
        self.ndof = ndof;
        self
    }

    pub fn with_production_vertex(mut self, vertex: VertexId) -> Self {
        self.production_vertex = Some(vertex);
        self
    }

    pub fn with_seed(mut self, seed: usize) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn p4(&self) -> Vec4 {
        self.p4
    }

    pub fn m(&self) -> f64 {
        self.p4.m()
    }

    pub fn daughters(&self) -> &[FittedDaughter] {
        &self.daughters
    }

    /// The first leg with the given particle-type hypothesis.
    pub fn leg(&self, species: Species) -> Option<&FittedDaughter> {
        self.daughters.iter().find(|d| d.species == species)
    }

    pub fn tracks(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.daughters.iter().map(|d| d.track)
    }

    pub fn uses_track(&self, track: TrackId) -> bool {
        self.tracks().any(|t| t == track)
    }

    /// `true` if the two candidates have at least one leg track in common.
    pub fn shares_track_with(&self, other: &DecayCandidate) -> bool {
        self.tracks().any(|t| other.uses_track(t))
    }

    pub fn charge(&self) -> i32 {
        self.daughters.iter().map(|d| d.charge).sum()
    }

    pub fn chi2_over_ndof(&self) -> Option<f64> {
        (self.ndof > 0).then(|| self.chi2 / self.ndof as f64)
    }

    /// The fit p-value, if the candidate was kinematically fitted.
    pub fn probability(&self) -> Option<f64> {
        (self.ndof > 0).then(|| probability(self.chi2, self.ndof))
    }
}

/// The same-event signal (opposite-charge) and background (same-charge) candidates of one
/// decay kind.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CandidateLists {
    pub signal: Vec<DecayCandidate>,
    pub background: Vec<DecayCandidate>,
}

impl CandidateLists {
    /// Take ownership of a signal candidate, assigning its id. Returns the id.
    pub fn push_signal(&mut self, mut candidate: DecayCandidate) -> usize {
        candidate.id = self.signal.len();
        self.signal.push(candidate);
        self.signal.len() - 1
    }

    pub fn push_background(&mut self, mut candidate: DecayCandidate) -> usize {
        candidate.id = self.background.len();
        self.background.push(candidate);
        self.background.len() - 1
    }

    /// `true` if any signal or background candidate uses `track`.
    pub fn uses_track(&self, track: TrackId) -> bool {
        self.signal
            .iter()
            .chain(self.background.iter())
            .any(|c| c.uses_track(track))
    }

    pub fn is_empty(&self) -> bool {
        self.signal.is_empty() && self.background.is_empty()
    }
}

/// Every candidate built while processing one event. A fresh value is created for each event
/// and dropped once the observer has seen it.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EventCandidates {
    pub event: u64,
    pub k0s: CandidateLists,
    pub lambda: CandidateLists,
    pub d0: CandidateLists,
    pub dstar: CandidateLists,
    pub conversion: CandidateLists,
}

impl EventCandidates {
    pub fn new(event: u64) -> Self {
        Self {
            event,
            ..Default::default()
        }
    }

    pub fn get(&self, kind: DecayKind) -> &CandidateLists {
        match kind {
            DecayKind::K0s => &self.k0s,
            DecayKind::Lambda => &self.lambda,
            DecayKind::D0 => &self.d0,
            DecayKind::Dstar => &self.dstar,
            DecayKind::Conversion => &self.conversion,
        }
    }

    pub fn get_mut(&mut self, kind: DecayKind) -> &mut CandidateLists {
        match kind {
            DecayKind::K0s => &mut self.k0s,
            DecayKind::Lambda => &mut self.lambda,
            DecayKind::D0 => &mut self.d0,
            DecayKind::Dstar => &mut self.dstar,
            DecayKind::Conversion => &mut self.conversion,
        }
    }

    pub fn n_signal(&self) -> usize {
        DecayKind::all()
            .iter()
            .map(|&k| self.get(k).signal.len())
            .sum()
    }
}
