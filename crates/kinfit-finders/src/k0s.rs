use indexmap::IndexMap;
use kinfit_core::{
    candidate::{DecayCandidate, EventCandidates, FittedDaughter},
    cut_registry,
    cuts::{in_window, CutRegistry},
    data::{Event, Vertex},
    fit::{FitParticle, FitSettings, KinFitter, MassConstraint},
    io::ConfigValue,
    utils::{
        enums::{DecayKind, Mode, Species},
        variables::{cos_decay_angle, cos_pointing_angle, opening_angle, transverse_decay_length},
        vectors::Vec4,
    },
    KinFitError, KinFitResult,
};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::{
    impl_finder_config_access, store, truth::count_true_decays, veto::uses_vertex, Branch,
    Finder, FinderConfig, FinderStats, TRUTH_LINK_MIN,
};

/// The $`K^0_S`$ mass used in the constraint (GeV).
pub const K0S_MASS: f64 = 0.497;

/// Selection of [`K0sFinder`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct K0sConfig {
    pub mode: Mode,
    pub pion_pt_min: f64,
    pub pion_pt_max: f64,
    pub pion_eta_min: f64,
    pub pion_eta_max: f64,
    pub mass_min: f64,
    pub mass_max: f64,
    pub vertex_chi2_ndof_max: f64,
    pub track_chi2_ndof_max: f64,
    /// cm
    pub transv_decay_length_min: f64,
    pub pointing_angle_min: f64,
    pub decay_angle_max: f64,
    pub opening_angle_min: f64,
    pub kinfit_pvalue_min: f64,
    pub matching_prob_min: f64,
}

impl Default for K0sConfig {
    fn default() -> Self {
        Self {
            mode: Mode::KinFit,
            pion_pt_min: 0.5,
            pion_pt_max: 1.0e10,
            pion_eta_min: -2.5,
            pion_eta_max: 2.5,
            mass_min: 0.48,
            mass_max: 0.515,
            vertex_chi2_ndof_max: 5.0,
            track_chi2_ndof_max: 5.0,
            transv_decay_length_min: 0.2,
            pointing_angle_min: 0.99,
            decay_angle_max: 0.95,
            opening_angle_min: 0.005,
            kinfit_pvalue_min: 0.05,
            matching_prob_min: 0.5,
        }
    }
}

lazy_static! {
    static ref K0S_CUTS: CutRegistry<K0sConfig> = cut_registry!(K0sConfig, "K0sFinder", {
        "SignalPion_Pt_min" => pion_pt_min: "minimum pion pT (GeV)",
        "SignalPion_Pt_max" => pion_pt_max: "maximum pion pT (GeV)",
        "SignalPion_Eta_min" => pion_eta_min: "minimum pion eta",
        "SignalPion_Eta_max" => pion_eta_max: "maximum pion eta",
        "K0s_M_min" => mass_min: "lower edge of the K0s mass window (GeV, cut-based)",
        "K0s_M_max" => mass_max: "upper edge of the K0s mass window (GeV, cut-based)",
        "VertexChi2ovNDoF_max" => vertex_chi2_ndof_max: "maximum secondary-vertex chi2/ndof",
        "TrackChi2ovNDoF_max" => track_chi2_ndof_max: "maximum track chi2/ndof",
        "TransvDecayLength_min" => transv_decay_length_min: "minimum transverse decay length (cm)",
        "PointingAngle_min" => pointing_angle_min: "minimum |cos| of the pointing angle",
        "DecayAngle_max" => decay_angle_max: "maximum |cos| of the decay angle",
        "OpeningAngle_min" => opening_angle_min: "minimum opening angle of the pions (rad)",
        "KinFitPvalue_min" => kinfit_pvalue_min: "minimum fit p-value",
        "MatchingProb_min" => matching_prob_min: "minimum truth-link probability for truth matching",
    });
}

impl FinderConfig for K0sConfig {
    const SECTION: &'static str = "k0s";

    fn registry() -> &'static CutRegistry<Self> {
        &K0S_CUTS
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) -> KinFitResult<()> {
        self.mode = mode;
        Ok(())
    }
}

const KINFIT_STAGES: [&str; 15] = [
    "Sec. Vtx & 2 Dght.",
    "Pion pT",
    "Pion eta",
    "Vtx chi2",
    "Transv. decay length",
    "Trk chi2",
    "MC exists",
    "Fit converged",
    "Pointing angle",
    "Decay angle",
    "Opening angle",
    "KinFit p-value",
    "Lambda veto",
    "Opp. sign",
    "Same sign",
];

const CUT_BASED_STAGES: [&str; 14] = [
    "Sec. Vtx & 2 Dght.",
    "Pion pT",
    "Pion eta",
    "Vtx chi2",
    "Transv. decay length",
    "Trk chi2",
    "MC exists",
    "Pointing angle",
    "Decay angle",
    "Opening angle",
    "Mass window",
    "Lambda veto",
    "Opp. sign",
    "Same sign",
];

/// Reconstruction of $`K^0_S \to \pi^+\pi^-`$ from secondary vertices with exactly two
/// outgoing tracks.
///
/// In [`Mode::KinFit`] both pions are refitted under a $`K^0_S`$ mass constraint and only
/// converged fits are kept. In [`Mode::CutBased`] the unfitted pion momenta are used and the
/// invariant mass must lie in the configured window instead. The decay-angle cut bounds
/// $`|\cos\theta^*|`$ after the fit but only the signed $`\cos\theta^*`$ in cut-based mode.
///
/// Vertices already claimed by a $`\Lambda`$ candidate are vetoed. The veto reads the
/// candidates of the current event, so it only acts when a [`LambdaFinder`](crate::LambdaFinder)
/// ran earlier in the chain. In the default order, which runs this finder first, it never
/// fires.
#[derive(Clone, Debug)]
pub struct K0sFinder {
    config: K0sConfig,
    stats: FinderStats,
}

impl Default for K0sFinder {
    fn default() -> Self {
        Self::new(K0sConfig::default())
    }
}

impl K0sFinder {
    pub fn new(config: K0sConfig) -> Self {
        let stats = Self::fresh_stats(config.mode);
        Self { config, stats }
    }

    pub fn config(&self) -> &K0sConfig {
        &self.config
    }

    fn fresh_stats(mode: Mode) -> FinderStats {
        match mode {
            Mode::KinFit => FinderStats::new(KINFIT_STAGES),
            Mode::CutBased => FinderStats::new(CUT_BASED_STAGES),
        }
    }

    /// The refitted pion four-momenta and the fit quality, or [`None`] if the fit failed.
    fn fit(&mut self, event: &Event, vertex: &Vertex) -> KinFitResult<Option<([Vec4; 2], f64, usize)>> {
        let mut fitter = KinFitter::new("K0s", FitSettings::with_max_f(1e-6));
        let m_pi = Species::Pion.mass();
        for &id in &vertex.daughters {
            fitter.add_particle(FitParticle::from_track(event.track(id)?, m_pi));
        }
        fitter.add_constraint(MassConstraint::new("m(K0s)", &[0, 1], K0S_MASS));
        let result = fitter.fit()?;
        self.stats.n_fits += 1;
        if !result.converged() {
            return Ok(None);
        }
        Ok(Some(([result.p4s[0], result.p4s[1]], result.chi2, result.ndof)))
    }

    fn reconstruct(
        &mut self,
        event: &Event,
        pv: &Vertex,
        vertex: &Vertex,
        candidates: &mut EventCandidates,
    ) -> KinFitResult<()> {
        let w = event.weight;
        if !(vertex.is_secondary() && vertex.n_daughters() == 2) {
            return Ok(());
        }
        self.stats.pass("Sec. Vtx & 2 Dght.", w);
        let t1 = event.track(vertex.daughters[0])?;
        let t2 = event.track(vertex.daughters[1])?;
        let c = &self.config;
        if !(in_window(t1.pt(), c.pion_pt_min, c.pion_pt_max)
            && in_window(t2.pt(), c.pion_pt_min, c.pion_pt_max))
        {
            return Ok(());
        }
        self.stats.pass("Pion pT", w);
        if !(in_window(t1.eta(), c.pion_eta_min, c.pion_eta_max)
            && in_window(t2.eta(), c.pion_eta_min, c.pion_eta_max))
        {
            return Ok(());
        }
        self.stats.pass("Pion eta", w);
        if vertex.chi2_over_ndof() > c.vertex_chi2_ndof_max {
            return Ok(());
        }
        self.stats.pass("Vtx chi2", w);
        if transverse_decay_length(&pv.position, &vertex.position) < c.transv_decay_length_min {
            return Ok(());
        }
        self.stats.pass("Transv. decay length", w);
        if t1.chi2_over_ndof() > c.track_chi2_ndof_max || t2.chi2_over_ndof() > c.track_chi2_ndof_max {
            return Ok(());
        }
        self.stats.pass("Trk chi2", w);
        if event.is_mc()
            && !(t1.has_valid_truth_match(TRUTH_LINK_MIN) && t2.has_valid_truth_match(TRUTH_LINK_MIN))
        {
            return Ok(());
        }
        self.stats.pass("MC exists", w);

        let (p4s, fit) = match self.config.mode {
            Mode::KinFit => match self.fit(event, vertex)? {
                Some((p4s, chi2, ndof)) => {
                    self.stats.pass("Fit converged", w);
                    (p4s, Some((chi2, ndof)))
                }
                None => return Ok(()),
            },
            Mode::CutBased => {
                let m_pi = Species::Pion.mass();
                ([t1.p4(m_pi), t2.p4(m_pi)], None)
            }
        };
        let c = &self.config;
        let parent = p4s[0] + p4s[1];
        if cos_pointing_angle(&parent.vec3(), &pv.position, &vertex.position).abs() < c.pointing_angle_min {
            return Ok(());
        }
        self.stats.pass("Pointing angle", w);
        let cosines = p4s.map(|p| cos_decay_angle(&parent, &p));
        if !passes_decay_angle(cosines, c.decay_angle_max, fit.is_none()) {
            return Ok(());
        }
        self.stats.pass("Decay angle", w);
        if opening_angle(&p4s[0].vec3(), &p4s[1].vec3()) < c.opening_angle_min {
            return Ok(());
        }
        self.stats.pass("Opening angle", w);
        match fit {
            Some((chi2, ndof)) => {
                if kinfit_core::fit::probability(chi2, ndof) < c.kinfit_pvalue_min {
                    return Ok(());
                }
                self.stats.pass("KinFit p-value", w);
            }
            None => {
                if !in_window(parent.m(), c.mass_min, c.mass_max) {
                    return Ok(());
                }
                self.stats.pass("Mass window", w);
            }
        }
        if uses_vertex(&candidates.lambda, vertex.id) {
            return Ok(());
        }
        self.stats.pass("Lambda veto", w);

        let opposite = t1.charge() * t2.charge() < 0;
        let mut legs = [(t1, p4s[0]), (t2, p4s[1])];
        // pi+ first
        if opposite && t1.qovp < 0.0 {
            legs.swap(0, 1);
        }
        let daughters = legs
            .iter()
            .map(|(t, p4)| FittedDaughter::new(t, Species::Pion, *p4))
            .collect();
        let mut candidate =
            DecayCandidate::new(DecayKind::K0s, daughters, pv.id).with_production_vertex(vertex.id);
        if let Some((chi2, ndof)) = fit {
            candidate = candidate.with_fit(chi2, ndof);
        }
        let min_prob = self.config.matching_prob_min;
        store(event, &mut self.stats, candidates, candidate, opposite, min_prob)
    }
}

/// Whether the decay-angle cosines of both pions stay below `max`. The cut-based selection
/// bounds the signed cosine, the fitted selection its magnitude.
fn passes_decay_angle(cosines: [f64; 2], max: f64, signed: bool) -> bool {
    cosines
        .iter()
        .map(|&cos| if signed { cos } else { cos.abs() })
        .all(|cos| cos <= max)
}

impl Finder for K0sFinder {
    impl_finder_config_access!(K0sConfig);

    fn name(&self) -> &str {
        "K0sFinder"
    }

    fn kind(&self) -> DecayKind {
        DecayKind::K0s
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
                count_true_decays(event, DecayKind::K0s, self.config.matching_prob_min);
        }
        for vertex in &event.vertices {
            self.reconstruct(event, pv, vertex, candidates)?;
        }
        crate::find_shared_tracks(&mut candidates.k0s.signal);
        tracing::debug!(
            event = event.number,
            signal = candidates.k0s.signal.len(),
            background = candidates.k0s.background.len(),
            "K0s candidates"
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

impl TryFrom<&IndexMap<String, ConfigValue>> for K0sFinder {
    type Error = KinFitError;

    fn try_from(section: &IndexMap<String, ConfigValue>) -> Result<Self, Self::Error> {
        let mut finder = Self::default();
        finder.configure(section)?;
        Ok(finder)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use kinfit_core::{
        data::{test_event, TrackId, VertexId},
        utils::enums::{TruthMatch, VertexKind},
    };

    use super::*;

    fn run(finder: &mut K0sFinder, event: &Event) -> EventCandidates {
        let mut candidates = EventCandidates::new(event.number);
        finder.analyze_event(event, &mut candidates).unwrap();
        candidates
    }

    #[test]
    fn test_k0s_two_body_fit() {
        let event = test_event();
        let mut finder = K0sFinder::default();
        let candidates = run(&mut finder, &event);
        assert_eq!(candidates.k0s.signal.len(), 1);
        assert!(candidates.k0s.background.is_empty());
        let k0s = &candidates.k0s.signal[0];
        assert_relative_eq!(k0s.m(), K0S_MASS, epsilon = 1e-5);
        assert!(in_window(k0s.m(), 0.480, 0.515));
        assert!(!k0s.shared_tracks);
        assert_eq!(k0s.ndof, 1);
        assert!(k0s.chi2 >= 0.0);
        assert_eq!(k0s.daughters()[0].pdg_code(), 211);
        assert_eq!(k0s.daughters()[1].pdg_code(), -211);
        assert_eq!(k0s.production_vertex, Some(VertexId(1)));
        assert_eq!(k0s.truth, Some(TruthMatch::True));
        let stats = finder.stats();
        assert_eq!(stats.n_fits, 1);
        assert_eq!(stats.abundance_true, 1);
        assert_eq!(stats.n_true, 1);
        assert_eq!(stats.cut_flow.count("Opp. sign"), 1);
        assert_relative_eq!(stats.cut_flow.get("Opp. sign").unwrap().weighted, 0.5);
    }

    #[test]
    fn test_pi_plus_comes_first() {
        let mut event = test_event();
        event.vertices[1].daughters.swap(0, 1);
        let candidates = run(&mut K0sFinder::default(), &event);
        let k0s = &candidates.k0s.signal[0];
        assert_eq!(k0s.daughters()[0].track, TrackId(0));
        assert_eq!(k0s.daughters()[0].charge, 1);
    }

    #[test]
    fn test_same_charge_goes_to_background() {
        let mut event = test_event();
        event.tracks[1].qovp = event.tracks[1].qovp.abs();
        let mut finder = K0sFinder::default();
        let candidates = run(&mut finder, &event);
        assert!(candidates.k0s.signal.is_empty());
        assert_eq!(candidates.k0s.background.len(), 1);
        assert_eq!(candidates.k0s.background[0].truth, None);
        assert_eq!(finder.stats().n_background, 1);
        assert_eq!(finder.stats().cut_flow.count("Same sign"), 1);
    }

    #[test]
    fn test_non_convergent_fit_is_dropped() {
        let mut event = test_event();
        for track in event.tracks.iter_mut() {
            track.covariance = nalgebra::Matrix3::zeros();
        }
        let mut finder = K0sFinder::default();
        let candidates = run(&mut finder, &event);
        assert!(candidates.k0s.is_empty());
        assert_eq!(finder.stats().n_fits, 1);
        assert_eq!(finder.stats().cut_flow.count("Fit converged"), 0);
    }

    #[test]
    fn test_cuts_reject() {
        let mut event = test_event();
        event.vertices[1].position = event.vertices[1].position * 0.01;
        let candidates = run(&mut K0sFinder::default(), &event);
        assert!(candidates.k0s.is_empty());

        let mut event = test_event();
        event.tracks[0].chi2 = 100.0;
        let mut finder = K0sFinder::default();
        assert!(run(&mut finder, &event).k0s.is_empty());
        assert_eq!(finder.stats().cut_flow.count("Transv. decay length"), 1);
        assert_eq!(finder.stats().cut_flow.count("Trk chi2"), 0);

        let mut event = test_event();
        event.vertices[1].kind = VertexKind::Primary;
        event.primary_vertex = Some(VertexId(0));
        assert!(run(&mut K0sFinder::default(), &event).k0s.is_empty());
    }

    #[test]
    fn test_cut_based_mode() {
        let event = test_event();
        let mut config = K0sConfig {
            mode: Mode::CutBased,
            ..Default::default()
        };
        let mut finder = K0sFinder::new(config.clone());
        let candidates = run(&mut finder, &event);
        assert_eq!(candidates.k0s.signal.len(), 1);
        let k0s = &candidates.k0s.signal[0];
        assert_relative_eq!(k0s.m(), event.tracks.iter().map(|t| t.p4(0.13957)).sum::<Vec4>().m());
        assert_eq!(k0s.probability(), None);
        assert_eq!(finder.stats().n_fits, 0);
        assert_eq!(finder.stats().cut_flow.count("Mass window"), 1);

        config.mass_max = 0.498;
        let candidates = run(&mut K0sFinder::new(config), &event);
        assert!(candidates.k0s.is_empty());
    }

    #[test]
    fn test_decay_angle_sign_convention() {
        assert!(passes_decay_angle([-0.97, 0.2], 0.95, true));
        assert!(!passes_decay_angle([-0.97, 0.2], 0.95, false));
        assert!(!passes_decay_angle([0.97, -0.2], 0.95, true));
        assert!(passes_decay_angle([0.5, -0.5], 0.95, false));
    }

    #[test]
    fn test_lambda_vertex_veto() {
        let event = test_event();
        let mut candidates = EventCandidates::new(event.number);
        let daughters = vec![
            FittedDaughter::new(&event.tracks[0], Species::Proton, event.tracks[0].p4(0.938272)),
            FittedDaughter::new(&event.tracks[1], Species::Pion, event.tracks[1].p4(0.13957)),
        ];
        candidates.lambda.push_signal(
            DecayCandidate::new(DecayKind::Lambda, daughters, VertexId(0))
                .with_production_vertex(VertexId(1)),
        );
        let mut finder = K0sFinder::default();
        finder.analyze_event(&event, &mut candidates).unwrap();
        assert!(candidates.k0s.is_empty());
        assert_eq!(finder.stats().cut_flow.count("KinFit p-value"), 1);
        assert_eq!(finder.stats().cut_flow.count("Lambda veto"), 0);
    }

    #[test]
    fn test_missing_primary_vertex_is_fatal() {
        let mut event = test_event();
        event.primary_vertex = None;
        let mut candidates = EventCandidates::new(event.number);
        let err = K0sFinder::default()
            .analyze_event(&event, &mut candidates)
            .unwrap_err();
        assert!(matches!(err, KinFitError::MissingPrimaryVertex { .. }));
    }

    #[test]
    fn test_idempotence() {
        let event = test_event();
        let first = run(&mut K0sFinder::default(), &event);
        let second = run(&mut K0sFinder::default(), &event);
        assert_eq!(first, second);
    }

    #[test]
    fn test_configure() {
        let table: kinfit_core::io::ConfigTable = r#"
            [k0s]
            mode = "cut-based"
            SignalPion_Pt_min = 1.0
            K0s_M_max = 0.52
        "#
        .parse()
        .unwrap();
        let section = table.section("k0s").unwrap();
        let finder = K0sFinder::try_from(section).unwrap();
        assert_eq!(Finder::mode(&finder), Mode::CutBased);
        assert_eq!(finder.config().pion_pt_min, 1.0);
        assert_eq!(finder.config().mass_max, 0.52);
        assert_eq!(finder.stats().cut_flow.count("Mass window"), 0);
        assert!(finder.stats().cut_flow.get("Mass window").is_some());

        let mut bad = IndexMap::new();
        bad.insert("fSignalPion_Pt_min".to_string(), ConfigValue::Number(1.0));
        let err = K0sFinder::try_from(&bad).unwrap_err();
        assert!(matches!(err, KinFitError::UnknownCut { .. }));
        let mut bad = IndexMap::new();
        bad.insert("enable_cut_based".to_string(), ConfigValue::Flag(true));
        assert!(K0sFinder::try_from(&bad).is_err());
        let mut bad = IndexMap::new();
        bad.insert("mode".to_string(), ConfigValue::Text("guess".to_string()));
        assert!(matches!(
            K0sFinder::try_from(&bad).unwrap_err(),
            KinFitError::ParseError { .. }
        ));
    }

    #[test]
    fn test_cut_values() {
        let finder = K0sFinder::default();
        let values = finder.cut_values();
        assert_eq!(values.len(), 14);
        assert_eq!(values[0].0, "SignalPion_Pt_min");
        assert_eq!(values[0].2, 0.5);
        assert_eq!(finder.section(), "k0s");
    }
}
