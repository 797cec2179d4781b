use indexmap::IndexMap;
use kinfit_core::{
    candidate::{DecayCandidate, EventCandidates, FittedDaughter},
    cut_registry,
    cuts::{in_window, CutRegistry},
    data::{Event, Track, Vertex},
    fit::{FitParticle, FitResult, FitSettings, KinFitter, MassConstraint},
    io::ConfigValue,
    utils::{
        enums::{DecayKind, Mode, Species},
        variables::{opening_angle, proper_lifetime, transverse_decay_length},
        vectors::Vec4,
    },
    KinFitError, KinFitResult,
};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::{
    impl_finder_config_access, select_hypothesis, store,
    truth::count_true_decays,
    veto::{in_k0s_window, is_conversion, uses_either, uses_vertex},
    Branch, Finder, FinderConfig, FinderStats, Hypothesis, TRUTH_LINK_MIN,
};

/// The $`\Lambda`$ mass used in the constraint (GeV).
pub const LAMBDA_MASS: f64 = 1.115683;

/// Selection of [`LambdaFinder`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LambdaConfig {
    pub mode: Mode,
    pub pt_min: f64,
    pub pt_max: f64,
    pub eta_min: f64,
    pub eta_max: f64,
    pub mass_min: f64,
    pub mass_max: f64,
    /// ps
    pub lifetime_min: f64,
    pub opening_angle_min: f64,
    /// cm, both legs (kinematic fit)
    pub d0_min: f64,
    /// cm (kinematic fit)
    pub z_diff_max: f64,
    pub transv_decay_length_min: f64,
    pub angle_to_primary_max: f64,
    pub vertex_chi2_ndof_max: f64,
    pub track_chi2_ndof_max: f64,
    pub kinfit_pvalue_min: f64,
    pub matching_prob_min: f64,
    pub photon_mass_max: f64,
    pub k0s_mass_min: f64,
    pub k0s_mass_max: f64,
}

impl Default for LambdaConfig {
    fn default() -> Self {
        Self {
            mode: Mode::KinFit,
            pt_min: 0.5,
            pt_max: 1.0e10,
            eta_min: -2.5,
            eta_max: 2.5,
            mass_min: 1.10,
            mass_max: 1.13,
            lifetime_min: 0.0,
            opening_angle_min: 0.0,
            d0_min: 0.0,
            z_diff_max: 1.0,
            transv_decay_length_min: 0.2,
            angle_to_primary_max: 0.2,
            vertex_chi2_ndof_max: 5.0,
            track_chi2_ndof_max: 5.0,
            kinfit_pvalue_min: 0.05,
            matching_prob_min: 0.5,
            photon_mass_max: 0.05,
            k0s_mass_min: 0.48,
            k0s_mass_max: 0.515,
        }
    }
}

lazy_static! {
    static ref LAMBDA_CUTS: CutRegistry<LambdaConfig> = cut_registry!(LambdaConfig, "LambdaFinder", {
        "Signal_Pt_min" => pt_min: "minimum Lambda pT (GeV)",
        "Signal_Pt_max" => pt_max: "maximum Lambda pT (GeV)",
        "Signal_Eta_min" => eta_min: "minimum Lambda eta",
        "Signal_Eta_max" => eta_max: "maximum Lambda eta",
        "Lambda_M_min" => mass_min: "lower edge of the Lambda mass window (GeV, cut-based)",
        "Lambda_M_max" => mass_max: "upper edge of the Lambda mass window (GeV, cut-based)",
        "Lifetime_min" => lifetime_min: "minimum proper lifetime (ps)",
        "OpeningAngle_min" => opening_angle_min: "minimum opening angle of the legs (rad)",
        "D0_min" => d0_min: "minimum |transverse impact parameter| of both legs (cm, kinfit)",
        "ZDiff_max" => z_diff_max: "maximum z0 difference of the legs (cm, kinfit)",
        "TransvDecayLen_min" => transv_decay_length_min: "minimum transverse decay length (cm, cut-based)",
        "AngleToPrimary_max" => angle_to_primary_max: "maximum angle between momentum and flight direction (rad)",
        "VertexChi2ovNDoF_max" => vertex_chi2_ndof_max: "maximum secondary-vertex chi2/ndof",
        "TrackChi2ovNDoF_max" => track_chi2_ndof_max: "maximum track chi2/ndof",
        "KinFitPvalue_min" => kinfit_pvalue_min: "minimum fit p-value",
        "MatchingProb_min" => matching_prob_min: "minimum truth-link probability for truth matching",
        "PhotonMass_max" => photon_mass_max: "ee mass below which a pair is taken as a conversion (GeV)",
        "K0s_M_min" => k0s_mass_min: "lower edge of the K0s veto window (GeV)",
        "K0s_M_max" => k0s_mass_max: "upper edge of the K0s veto window (GeV)",
    });
}

impl FinderConfig for LambdaConfig {
    const SECTION: &'static str = "lambda";

    fn registry() -> &'static CutRegistry<Self> {
        &LAMBDA_CUTS
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) -> KinFitResult<()> {
        self.mode = mode;
        Ok(())
    }
}

const KINFIT_STAGES: [&str; 17] = [
    "Track pair",
    "Displaced legs",
    "Z0 diff",
    "Trk chi2",
    "MC exists",
    "No gamma",
    "No K0s",
    "Vtx chi2",
    "Fit ok",
    "Opening angle",
    "Angle to primary",
    "Lifetime",
    "Lambda pT",
    "Lambda eta",
    "KinFit p-value",
    "Opp. sign",
    "Same sign",
];

const CUT_BASED_STAGES: [&str; 13] = [
    "Sec. Vtx & 2 Dght.",
    "Vtx chi2",
    "Transv. decay length",
    "Trk chi2",
    "MC exists",
    "No gamma",
    "No K0s",
    "Mass window",
    "Angle to primary",
    "Lambda pT",
    "Lambda eta",
    "Opp. sign",
    "Same sign",
];

/// Reconstruction of $`\Lambda \to p\pi`$ (and its charge conjugate).
///
/// With the kinematic fit every pair of tracks in the event that passes a cheap preselection
/// (legs not attached to the primary vertex, impact parameters, $`z_0`$ compatibility) is fitted
/// under both $`(p, \pi)`$ assignments and the better fit is kept. If the two legs share a
/// secondary vertex, that vertex is the decay point for the vertex quality, angle to primary and
/// lifetime cuts. A pair without one has no measured decay point and passes those cuts
/// unconditionally. The cut-based path uses two-track vertices only and takes the harder track
/// as the proton. Pairs compatible with a photon conversion or a $`K^0_S`$ are vetoed in both
/// modes.
#[derive(Clone, Debug)]
pub struct LambdaFinder {
    config: LambdaConfig,
    stats: FinderStats,
}

impl Default for LambdaFinder {
    fn default() -> Self {
        Self::new(LambdaConfig::default())
    }
}

impl LambdaFinder {
    pub fn new(config: LambdaConfig) -> Self {
        let stats = Self::fresh_stats(config.mode);
        Self { config, stats }
    }

    pub fn config(&self) -> &LambdaConfig {
        &self.config
    }

    fn fresh_stats(mode: Mode) -> FinderStats {
        match mode {
            Mode::KinFit => FinderStats::new(KINFIT_STAGES),
            Mode::CutBased => FinderStats::new(CUT_BASED_STAGES),
        }
    }

    fn fit_hypothesis(&mut self, proton: &Track, pion: &Track) -> KinFitResult<FitResult> {
        let mut fitter = KinFitter::new("Lambda", FitSettings::with_max_f(1e-4));
        let p = fitter.add_particle(FitParticle::from_track(proton, Species::Proton.mass()));
        let pi = fitter.add_particle(FitParticle::from_track(pion, Species::Pion.mass()));
        fitter.add_constraint(MassConstraint::new("m(Lambda)", &[p, pi], LAMBDA_MASS));
        let result = fitter.fit()?;
        self.stats.n_fits += 1;
        Ok(result)
    }

    /// The combinatorial cuts of the all-pairs path, applied before anything else.
    fn preselect_pair(&mut self, event: &Event, pv: &Vertex, t1: &Track, t2: &Track) -> bool {
        let w = event.weight;
        let c = &self.config;
        self.stats.pass("Track pair", w);
        if [t1, t2]
            .iter()
            .any(|t| t.vertex == Some(pv.id) || t.d0.abs() < c.d0_min)
        {
            return false;
        }
        self.stats.pass("Displaced legs", w);
        if (t1.z0 - t2.z0).abs() >= c.z_diff_max {
            return false;
        }
        self.stats.pass("Z0 diff", w);
        true
    }

    /// Common preselection of both modes, from the track quality up to the $`K^0_S`$ veto.
    fn preselect(
        &mut self,
        event: &Event,
        vertex: Option<&Vertex>,
        t1: &Track,
        t2: &Track,
        candidates: &EventCandidates,
    ) -> bool {
        let w = event.weight;
        let c = &self.config;
        if t1.chi2_over_ndof() > c.track_chi2_ndof_max || t2.chi2_over_ndof() > c.track_chi2_ndof_max {
            return false;
        }
        self.stats.pass("Trk chi2", w);
        if event.is_mc()
            && !(t1.has_valid_truth_match(TRUTH_LINK_MIN) && t2.has_valid_truth_match(TRUTH_LINK_MIN))
        {
            return false;
        }
        self.stats.pass("MC exists", w);
        if is_conversion(t1, t2, c.photon_mass_max) {
            return false;
        }
        self.stats.pass("No gamma", w);
        if vertex.is_some_and(|v| uses_vertex(&candidates.k0s, v.id))
            || uses_either(&candidates.k0s, t1, t2)
            || in_k0s_window(t1, t2, c.k0s_mass_min, c.k0s_mass_max)
        {
            return false;
        }
        self.stats.pass("No K0s", w);
        true
    }

    /// The flight-direction, $`p_T`$ and $`\eta`$ cuts shared by both modes. Without a decay
    /// vertex the flight-direction cuts are passed.
    fn select_parent(&mut self, event: &Event, pv: &Vertex, vertex: Option<&Vertex>, parent: &Vec4) -> bool {
        let w = event.weight;
        let c = &self.config;
        if vertex.is_some_and(|v| parent.vec3().angle(&(v.position - pv.position)) > c.angle_to_primary_max) {
            return false;
        }
        self.stats.pass("Angle to primary", w);
        if self.config.mode == Mode::KinFit {
            if vertex.is_some_and(|v| proper_lifetime(parent, &pv.position, &v.position) < c.lifetime_min) {
                return false;
            }
            self.stats.pass("Lifetime", w);
        }
        if !in_window(parent.pt(), c.pt_min, c.pt_max) {
            return false;
        }
        self.stats.pass("Lambda pT", w);
        if !in_window(parent.eta(), c.eta_min, c.eta_max) {
            return false;
        }
        self.stats.pass("Lambda eta", w);
        true
    }

    fn reconstruct_kinfit(
        &mut self,
        event: &Event,
        pv: &Vertex,
        t1: &Track,
        t2: &Track,
        candidates: &mut EventCandidates,
    ) -> KinFitResult<()> {
        let w = event.weight;
        if !self.preselect_pair(event, pv, t1, t2) {
            return Ok(());
        }
        let vertex = common_vertex(event, t1, t2);
        if !self.preselect(event, vertex, t1, t2, candidates) {
            return Ok(());
        }
        if vertex.is_some_and(|v| v.chi2_over_ndof() > self.config.vertex_chi2_ndof_max) {
            return Ok(());
        }
        self.stats.pass("Vtx chi2", w);
        let first = self.fit_hypothesis(t1, t2)?;
        let second = self.fit_hypothesis(t2, t1)?;
        let (proton, pion, fit) = match select_hypothesis(&first, &second) {
            Some(Hypothesis::First) => (t1, t2, first),
            Some(Hypothesis::Second) => (t2, t1, second),
            None => return Ok(()),
        };
        self.stats.pass("Fit ok", w);
        if opening_angle(&fit.p4s[0].vec3(), &fit.p4s[1].vec3()) < self.config.opening_angle_min {
            return Ok(());
        }
        self.stats.pass("Opening angle", w);
        let parent = fit.p4s[0] + fit.p4s[1];
        if !self.select_parent(event, pv, vertex, &parent) {
            return Ok(());
        }
        if fit.probability() < self.config.kinfit_pvalue_min {
            return Ok(());
        }
        self.stats.pass("KinFit p-value", w);
        let mut candidate = DecayCandidate::new(
            DecayKind::Lambda,
            vec![
                FittedDaughter::new(proton, Species::Proton, fit.p4s[0]),
                FittedDaughter::new(pion, Species::Pion, fit.p4s[1]),
            ],
            pv.id,
        )
        .with_fit(fit.chi2, fit.ndof);
        if let Some(v) = vertex {
            candidate = candidate.with_production_vertex(v.id);
        }
        let opposite = proton.charge() * pion.charge() < 0;
        let min_prob = self.config.matching_prob_min;
        store(event, &mut self.stats, candidates, candidate, opposite, min_prob)
    }

    fn reconstruct_cut_based(
        &mut self,
        event: &Event,
        pv: &Vertex,
        vertex: &Vertex,
        candidates: &mut EventCandidates,
    ) -> KinFitResult<()> {
        let w = event.weight;
        if vertex.n_daughters() != 2 {
            return Ok(());
        }
        self.stats.pass("Sec. Vtx & 2 Dght.", w);
        let t1 = event.track(vertex.daughters[0])?;
        let t2 = event.track(vertex.daughters[1])?;
        if vertex.chi2_over_ndof() > self.config.vertex_chi2_ndof_max {
            return Ok(());
        }
        self.stats.pass("Vtx chi2", w);
        if transverse_decay_length(&pv.position, &vertex.position) < self.config.transv_decay_length_min {
            return Ok(());
        }
        self.stats.pass("Transv. decay length", w);
        if !self.preselect(event, Some(vertex), t1, t2, candidates) {
            return Ok(());
        }
        let (proton, pion) = if t1.p3.mag() >= t2.p3.mag() { (t1, t2) } else { (t2, t1) };
        let p4_proton = proton.p4(Species::Proton.mass());
        let p4_pion = pion.p4(Species::Pion.mass());
        let parent = p4_proton + p4_pion;
        if !in_window(parent.m(), self.config.mass_min, self.config.mass_max) {
            return Ok(());
        }
        self.stats.pass("Mass window", w);
        if !self.select_parent(event, pv, Some(vertex), &parent) {
            return Ok(());
        }
        let candidate = DecayCandidate::new(
            DecayKind::Lambda,
            vec![
                FittedDaughter::new(proton, Species::Proton, p4_proton),
                FittedDaughter::new(pion, Species::Pion, p4_pion),
            ],
            pv.id,
        )
        .with_production_vertex(vertex.id);
        let opposite = proton.charge() * pion.charge() < 0;
        let min_prob = self.config.matching_prob_min;
        store(event, &mut self.stats, candidates, candidate, opposite, min_prob)
    }
}

/// The secondary vertex both tracks are attached to, if any.
fn common_vertex<'a>(event: &'a Event, t1: &Track, t2: &Track) -> Option<&'a Vertex> {
    event
        .secondary_vertices()
        .find(|v| v.daughters.contains(&t1.id) && v.daughters.contains(&t2.id))
}

impl Finder for LambdaFinder {
    impl_finder_config_access!(LambdaConfig);

    fn name(&self) -> &str {
        "LambdaFinder"
    }

    fn kind(&self) -> DecayKind {
        DecayKind::Lambda
    }

    fn set_branch_status(&self) -> Vec<Branch> {
        vec![
            Branch::EventHeader,
            Branch::PrimaryVertex,
            Branch::Vertices,
            Branch::Tracks,
            Branch::McParticles,
        ]
    }

    fn analyze_event(&mut self, event: &Event, candidates: &mut EventCandidates) -> KinFitResult<()> {
        let pv = event.require_primary_vertex(self.name())?;
        self.stats.n_events += 1;
        if event.is_mc() {
            self.stats.abundance_true +=
                count_true_decays(event, DecayKind::Lambda, self.config.matching_prob_min);
        }
        match self.config.mode {
            Mode::KinFit => {
                for (i, t1) in event.tracks.iter().enumerate() {
                    for t2 in &event.tracks[i + 1..] {
                        self.reconstruct_kinfit(event, pv, t1, t2, candidates)?;
                    }
                }
            }
            Mode::CutBased => {
                for vertex in event.secondary_vertices() {
                    self.reconstruct_cut_based(event, pv, vertex, candidates)?;
                }
            }
        }
        crate::find_shared_tracks(&mut candidates.lambda.signal);
        tracing::debug!(
            event = event.number,
            signal = candidates.lambda.signal.len(),
            background = candidates.lambda.background.len(),
            "Lambda candidates"
        );
        Ok(())
    }

    fn configure(&mut self, section: &IndexMap<String, ConfigValue>) -> KinFitResult<()> {
        let before = self.config.mode;
        self.config.apply(section)?;
        if self.config.mode != before {
            self.stats = Self::fresh_stats(self.config.mode);
        }
        Ok(())
    }
}

impl TryFrom<&IndexMap<String, ConfigValue>> for LambdaFinder {
    type Error = KinFitError;

    fn try_from(section: &IndexMap<String, ConfigValue>) -> Result<Self, Self::Error> {
        let mut finder = Self::default();
        finder.configure(section)?;
        Ok(finder)
    }
}
