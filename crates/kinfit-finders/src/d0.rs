use indexmap::IndexMap;
use kinfit_core::{
    candidate::{DecayCandidate, EventCandidates, FittedDaughter},
    cut_registry,
    cuts::{in_window, CutRegistry},
    data::{Event, Track, Vertex},
    fit::{FitParticle, FitResult, FitSettings, KinFitter, MassConstraint},
    io::ConfigValue,
    observer::Observer,
    utils::{
        enums::{DecayKind, Mode, Species},
        variables::opening_angle,
    },
    KinFitError, KinFitResult,
};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::{
    impl_finder_config_access, select_hypothesis, store,
    truth::count_true_decays,
    veto::{in_d0_window, in_k0s_window, in_lambda_window, is_conversion, uses_either},
    Branch, Finder, FinderConfig, FinderStats, Hypothesis, TRUTH_LINK_MIN,
};

/// The $`D^0`$ mass used in the constraint (GeV).
pub const D0_MASS: f64 = 1.86484;

/// Selection of [`D0Finder`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct D0Config {
    pub mode: Mode,
    /// Run the vertex-based cut-based reconstruction when [`Mode::CutBased`] is selected.
    /// Without it the cut-based mode books and counts events but builds nothing.
    pub enable_cut_based: bool,
    pub pt_min: f64,
    pub pt_max: f64,
    pub eta_min: f64,
    pub eta_max: f64,
    pub mass_min: f64,
    pub mass_max: f64,
    pub opening_angle_max: f64,
    /// cm
    pub z_diff_max: f64,
    pub kaon_d0_min: f64,
    pub kaon_d0_max: f64,
    pub pion_d0_min: f64,
    pub pion_d0_max: f64,
    pub vertex_chi2_ndof_max: f64,
    pub track_chi2_ndof_max: f64,
    pub kinfit_pvalue_min: f64,
    pub matching_prob_min: f64,
    pub photon_mass_max: f64,
    pub k0s_veto_min: f64,
    pub k0s_veto_max: f64,
    pub lambda_veto_min: f64,
    pub lambda_veto_max: f64,
}

impl Default for D0Config {
    fn default() -> Self {
        Self {
            mode: Mode::KinFit,
            enable_cut_based: false,
            pt_min: 0.5,
            pt_max: 1.0e10,
            eta_min: -2.5,
            eta_max: 2.5,
            mass_min: 1.7,
            mass_max: 2.0,
            opening_angle_max: 1.0,
            z_diff_max: 1.0,
            kaon_d0_min: -1.0,
            kaon_d0_max: 1.0,
            pion_d0_min: -1.0,
            pion_d0_max: 1.0,
            vertex_chi2_ndof_max: 5.0,
            track_chi2_ndof_max: 5.0,
            kinfit_pvalue_min: 0.05,
            matching_prob_min: 0.5,
            photon_mass_max: 0.05,
            k0s_veto_min: 0.492,
            k0s_veto_max: 0.503,
            lambda_veto_min: 1.11,
            lambda_veto_max: 1.12,
        }
    }
}

lazy_static! {
    static ref D0_CUTS: CutRegistry<D0Config> = cut_registry!(D0Config, "D0Finder", {
        "Signal_Pt_min" => pt_min: "minimum D0 pT (GeV)",
        "Signal_Pt_max" => pt_max: "maximum D0 pT (GeV)",
        "Signal_Eta_min" => eta_min: "minimum D0 eta",
        "Signal_Eta_max" => eta_max: "maximum D0 eta",
        "D0_M_min" => mass_min: "lower edge of the K pi mass window (GeV)",
        "D0_M_max" => mass_max: "upper edge of the K pi mass window (GeV)",
        "OAngle_max" => opening_angle_max: "maximum opening angle of kaon and pion (rad)",
        "ZDiff_max" => z_diff_max: "maximum z0 difference of the legs (cm)",
        "D0_K_min" => kaon_d0_min: "minimum kaon transverse impact parameter (cm)",
        "D0_K_max" => kaon_d0_max: "maximum kaon transverse impact parameter (cm)",
        "D0_Pi_min" => pion_d0_min: "minimum pion transverse impact parameter (cm)",
        "D0_Pi_max" => pion_d0_max: "maximum pion transverse impact parameter (cm)",
        "VertexChi2ovNDoF_max" => vertex_chi2_ndof_max: "maximum vertex chi2/ndof (cut-based)",
        "TrackChi2ovNDoF_max" => track_chi2_ndof_max: "maximum track chi2/ndof",
        "KinFitPvalue_min" => kinfit_pvalue_min: "minimum fit p-value",
        "MatchingProb_min" => matching_prob_min: "minimum truth-link probability for truth matching",
        "PhotonMass_max" => photon_mass_max: "ee mass below which a pair is taken as a conversion (GeV)",
        "K0sVeto_M_min" => k0s_veto_min: "lower edge of the K0s veto window (GeV)",
        "K0sVeto_M_max" => k0s_veto_max: "upper edge of the K0s veto window (GeV)",
        "LambdaVeto_M_min" => lambda_veto_min: "lower edge of the Lambda veto window (GeV)",
        "LambdaVeto_M_max" => lambda_veto_max: "upper edge of the Lambda veto window (GeV)",
    });
}

impl FinderConfig for D0Config {
    const SECTION: &'static str = "d0";

    fn registry() -> &'static CutRegistry<Self> {
        &D0_CUTS
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) -> KinFitResult<()> {
        self.mode = mode;
        Ok(())
    }

    fn set_flag(&mut self, name: &str, value: bool) -> KinFitResult<()> {
        match name {
            "enable_cut_based" => {
                self.enable_cut_based = value;
                Ok(())
            }
            _ => Err(KinFitError::UnknownCut {
                name: name.to_string(),
                finder: Self::registry().finder().to_string(),
            }),
        }
    }
}

const KINFIT_STAGES: [&str; 16] = [
    "Trk chi2",
    "MC exists",
    "Kaon d0",
    "Pion d0",
    "Z0 diff",
    "No gamma",
    "No K0s",
    "No Lambda",
    "D0 mass window",
    ">= 1 Fit ok",
    "D0 eta",
    "Opening angle",
    "D0 pT",
    "KinFit p-value",
    "Opp. sign",
    "Same sign",
];

const CUT_BASED_STAGES: [&str; 8] = [
    "Sec. Vtx & 2 Dght.",
    "Vtx chi2",
    "Trk chi2",
    "D0 mass window",
    "Track pT",
    "Track eta",
    "Opp. sign",
    "Same sign",
];

/// Reconstruction of $`D^0 \to K\pi`$ from all pairs of tracks.
///
/// Each pair passing the preselection is fitted twice, once with either track as the kaon,
/// and the better converged fit is kept. Pairs used by a $`K^0_S`$ or $`\Lambda`$ signal
/// candidate, or compatible with a photon conversion, are skipped.
#[derive(Clone, Debug)]
pub struct D0Finder {
    config: D0Config,
    stats: FinderStats,
}

impl Default for D0Finder {
    fn default() -> Self {
        Self::new(D0Config::default())
    }
}

impl D0Finder {
    pub fn new(config: D0Config) -> Self {
        let stats = Self::fresh_stats(config.mode);
        Self { config, stats }
    }

    pub fn config(&self) -> &D0Config {
        &self.config
    }

    fn fresh_stats(mode: Mode) -> FinderStats {
        match mode {
            Mode::KinFit => FinderStats::new(KINFIT_STAGES),
            Mode::CutBased => FinderStats::new(CUT_BASED_STAGES),
        }
    }

    fn cut_based_disabled(&self) -> bool {
        self.config.mode == Mode::CutBased && !self.config.enable_cut_based
    }

    fn warn_if_disabled(&self) {
        if self.cut_based_disabled() {
            tracing::warn!(
                finder = %self.name(),
                "cut-based D0 reconstruction is disabled (set enable_cut_based = true); no candidates will be built"
            );
        }
    }

    fn fit_hypothesis(&mut self, kaon: &Track, pion: &Track) -> KinFitResult<FitResult> {
        let mut fitter = KinFitter::new("D0", FitSettings::with_max_f(1e-4));
        let k = fitter.add_particle(FitParticle::from_track(kaon, Species::Kaon.mass()));
        let pi = fitter.add_particle(FitParticle::from_track(pion, Species::Pion.mass()));
        fitter.add_constraint(MassConstraint::new("m(D0)", &[k, pi], D0_MASS));
        let result = fitter.fit()?;
        self.stats.n_fits += 1;
        Ok(result)
    }

    /// The cheap cuts applied to a pair before any fit.
    fn preselect(&mut self, event: &Event, t1: &Track, t2: &Track, candidates: &EventCandidates) -> bool {
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
        if !in_window(t1.d0, c.kaon_d0_min, c.kaon_d0_max) {
            return false;
        }
        self.stats.pass("Kaon d0", w);
        if !in_window(t2.d0, c.pion_d0_min, c.pion_d0_max) {
            return false;
        }
        self.stats.pass("Pion d0", w);
        if (t1.z0 - t2.z0).abs() >= c.z_diff_max {
            return false;
        }
        self.stats.pass("Z0 diff", w);
        if is_conversion(t1, t2, c.photon_mass_max) {
            return false;
        }
        self.stats.pass("No gamma", w);
        if uses_either(&candidates.k0s, t1, t2) || in_k0s_window(t1, t2, c.k0s_veto_min, c.k0s_veto_max) {
            return false;
        }
        self.stats.pass("No K0s", w);
        if uses_either(&candidates.lambda, t1, t2)
            || in_lambda_window(t1, t2, c.lambda_veto_min, c.lambda_veto_max)
        {
            return false;
        }
        self.stats.pass("No Lambda", w);
        if !in_d0_window(t1, t2, c.mass_min, c.mass_max) {
            return false;
        }
        self.stats.pass("D0 mass window", w);
        true
    }

    fn reconstruct_pair(
        &mut self,
        event: &Event,
        pv: &Vertex,
        t1: &Track,
        t2: &Track,
        candidates: &mut EventCandidates,
    ) -> KinFitResult<()> {
        let w = event.weight;
        if !self.preselect(event, t1, t2, candidates) {
            return Ok(());
        }
        let kpi = self.fit_hypothesis(t1, t2)?;
        let pik = self.fit_hypothesis(t2, t1)?;
        let (kaon, pion, fit) = match select_hypothesis(&kpi, &pik) {
            Some(Hypothesis::First) => (t1, t2, kpi),
            Some(Hypothesis::Second) => (t2, t1, pik),
            None => return Ok(()),
        };
        self.stats.pass(">= 1 Fit ok", w);
        let c = &self.config;
        let parent = fit.p4s[0] + fit.p4s[1];
        if !in_window(parent.eta(), c.eta_min, c.eta_max) {
            return Ok(());
        }
        self.stats.pass("D0 eta", w);
        if opening_angle(&fit.p4s[0].vec3(), &fit.p4s[1].vec3()) > c.opening_angle_max {
            return Ok(());
        }
        self.stats.pass("Opening angle", w);
        if !in_window(parent.pt(), c.pt_min, c.pt_max) {
            return Ok(());
        }
        self.stats.pass("D0 pT", w);
        if fit.probability() < c.kinfit_pvalue_min {
            return Ok(());
        }
        self.stats.pass("KinFit p-value", w);
        let candidate = DecayCandidate::new(
            DecayKind::D0,
            vec![
                FittedDaughter::new(kaon, Species::Kaon, fit.p4s[0]),
                FittedDaughter::new(pion, Species::Pion, fit.p4s[1]),
            ],
            pv.id,
        )
        .with_fit(fit.chi2, fit.ndof);
        let opposite = kaon.charge() * pion.charge() < 0;
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
        let c = &self.config;
        if vertex.chi2_over_ndof() > c.vertex_chi2_ndof_max {
            return Ok(());
        }
        self.stats.pass("Vtx chi2", w);
        let t1 = event.track(vertex.daughters[0])?;
        let t2 = event.track(vertex.daughters[1])?;
        if t1.chi2_over_ndof() > c.track_chi2_ndof_max || t2.chi2_over_ndof() > c.track_chi2_ndof_max {
            return Ok(());
        }
        self.stats.pass("Trk chi2", w);
        if !in_d0_window(t1, t2, c.mass_min, c.mass_max) {
            return Ok(());
        }
        self.stats.pass("D0 mass window", w);
        if !(in_window(t1.pt(), c.pt_min, c.pt_max) && in_window(t2.pt(), c.pt_min, c.pt_max)) {
            return Ok(());
        }
        self.stats.pass("Track pT", w);
        if !(in_window(t1.eta(), c.eta_min, c.eta_max) && in_window(t2.eta(), c.eta_min, c.eta_max)) {
            return Ok(());
        }
        self.stats.pass("Track eta", w);
        let (kaon, pion) = if t1.pt() > t2.pt() { (t2, t1) } else { (t1, t2) };
        let candidate = DecayCandidate::new(
            DecayKind::D0,
            vec![
                FittedDaughter::new(kaon, Species::Kaon, kaon.p4(Species::Kaon.mass())),
                FittedDaughter::new(pion, Species::Pion, pion.p4(Species::Pion.mass())),
            ],
            pv.id,
        )
        .with_production_vertex(vertex.id);
        let opposite = kaon.charge() * pion.charge() < 0;
        let min_prob = self.config.matching_prob_min;
        store(event, &mut self.stats, candidates, candidate, opposite, min_prob)
    }
}

impl Finder for D0Finder {
    impl_finder_config_access!(D0Config);

    fn name(&self) -> &str {
        "D0Finder"
    }

    fn kind(&self) -> DecayKind {
        DecayKind::D0
    }

    fn set_branch_status(&self) -> Vec<Branch> {
        let mut branches = vec![
            Branch::EventHeader,
            Branch::PrimaryVertex,
            Branch::Tracks,
            Branch::McParticles,
        ];
        if self.config.mode == Mode::CutBased {
            branches.push(Branch::Vertices);
        }
        branches
    }

    fn book_histograms(&mut self, observer: &mut dyn Observer) {
        self.warn_if_disabled();
        for (cut, description, value) in self.cut_values() {
            tracing::info!(finder = %self.name(), cut, value, "{}", description);
        }
        observer.book(self.name(), self.kind());
    }

    fn analyze_event(&mut self, event: &Event, candidates: &mut EventCandidates) -> KinFitResult<()> {
        let pv = event.require_primary_vertex(self.name())?;
        self.stats.n_events += 1;
        if self.cut_based_disabled() {
            return Ok(());
        }
        if event.is_mc() {
            self.stats.abundance_true +=
                count_true_decays(event, DecayKind::D0, self.config.matching_prob_min);
        }
        match self.config.mode {
            Mode::KinFit => {
                for (i, t1) in event.tracks.iter().enumerate() {
                    for t2 in &event.tracks[i + 1..] {
                        self.reconstruct_pair(event, pv, t1, t2, candidates)?;
                    }
                }
            }
            Mode::CutBased => {
                for vertex in event.secondary_vertices() {
                    self.reconstruct_cut_based(event, pv, vertex, candidates)?;
                }
            }
        }
        crate::find_shared_tracks(&mut candidates.d0.signal);
        tracing::debug!(
            event = event.number,
            signal = candidates.d0.signal.len(),
            background = candidates.d0.background.len(),
            "D0 candidates"
        );
        Ok(())
    }

    fn configure(&mut self, section: &IndexMap<String, ConfigValue>) -> KinFitResult<()> {
        let before = self.config.mode;
        self.config.apply(section)?;
        if self.config.mode != before {
            self.stats = Self::fresh_stats(self.config.mode);
        }
        self.warn_if_disabled();
        Ok(())
    }
}

impl TryFrom<&IndexMap<String, ConfigValue>> for D0Finder {
    type Error = KinFitError;

    fn try_from(section: &IndexMap<String, ConfigValue>) -> Result<Self, Self::Error> {
        let mut finder = Self::default();
        finder.configure(section)?;
        Ok(finder)
    }
}
