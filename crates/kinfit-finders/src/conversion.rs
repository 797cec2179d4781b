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
        variables::{cos_decay_angle, cos_pointing_angle, transverse_decay_length},
        vectors::Vec4,
    },
    KinFitError, KinFitResult,
};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::{
    impl_finder_config_access, store, truth::count_true_decays, Branch, Finder, FinderConfig,
    FinderStats, TRUTH_LINK_MIN,
};

/// The mass given to the electron pair when boosting into its rest frame (GeV). A massless
/// photon has no rest frame, so the decay angle is measured in the frame of a $`K^0_S`$-like
/// parent carrying the pair momentum.
pub const REST_FRAME_MASS: f64 = 0.497;

/// Selection of [`ConversionFinder`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub mode: Mode,
    pub electron_pt_min: f64,
    pub electron_pt_max: f64,
    pub electron_eta_min: f64,
    pub electron_eta_max: f64,
    /// Minimum transverse distance of the vertex from the beam line (cm).
    pub r_vertex_min: f64,
    /// cm
    pub transv_decay_length_min: f64,
    pub pointing_angle_min: f64,
    pub decay_angle_min: f64,
    pub mass_max: f64,
    /// The pair mass the fit constrains to (GeV).
    pub fit_mass: f64,
    pub kinfit_pvalue_min: f64,
    pub matching_prob_min: f64,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            mode: Mode::KinFit,
            electron_pt_min: 0.0,
            electron_pt_max: 1.0e10,
            electron_eta_min: -2.5,
            electron_eta_max: 2.5,
            r_vertex_min: 2.0,
            transv_decay_length_min: 2.0,
            pointing_angle_min: 0.99,
            decay_angle_min: 0.5,
            mass_max: 0.05,
            fit_mass: 0.005,
            kinfit_pvalue_min: 0.05,
            matching_prob_min: 0.5,
        }
    }
}

lazy_static! {
    static ref CONVERSION_CUTS: CutRegistry<ConversionConfig> = cut_registry!(ConversionConfig, "ConversionFinder", {
        "SignalElectron_Pt_min" => electron_pt_min: "minimum electron pT (GeV)",
        "SignalElectron_Pt_max" => electron_pt_max: "maximum electron pT (GeV)",
        "SignalElectron_Eta_min" => electron_eta_min: "minimum electron eta",
        "SignalElectron_Eta_max" => electron_eta_max: "maximum electron eta",
        "R_Vtx_min" => r_vertex_min: "minimum transverse vertex radius (cm)",
        "TransvDecayLength_min" => transv_decay_length_min: "minimum transverse decay length (cm)",
        "PointingAngle_min" => pointing_angle_min: "minimum cos of the pointing angle",
        "DecayAngle_min" => decay_angle_min: "minimum |cos| of the decay angle in the pseudo rest frame",
        "Conv_M_max" => mass_max: "maximum electron-pair mass (GeV, cut-based)",
        "KinFit_M" => fit_mass: "electron-pair mass used in the constraint (GeV)",
        "KinFitPvalue_min" => kinfit_pvalue_min: "minimum fit p-value",
        "MatchingProb_min" => matching_prob_min: "minimum truth-link probability for truth matching",
    });
}

impl FinderConfig for ConversionConfig {
    const SECTION: &'static str = "conversion";

    fn registry() -> &'static CutRegistry<Self> {
        &CONVERSION_CUTS
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) -> KinFitResult<()> {
        self.mode = mode;
        Ok(())
    }
}

const KINFIT_STAGES: [&str; 12] = [
    "Sec. Vtx & 2 Dght.",
    "R_Vtx",
    "Decay length",
    "Electron pT",
    "Electron eta",
    "MC exists",
    "Fit converged",
    "Pointing angle",
    "Decay angle",
    "KinFit p-value",
    "Opp. sign",
    "Same sign",
];

const CUT_BASED_STAGES: [&str; 11] = [
    "Sec. Vtx & 2 Dght.",
    "R_Vtx",
    "Decay length",
    "Electron pT",
    "Electron eta",
    "MC exists",
    "Pointing angle",
    "Decay angle",
    "Mass",
    "Opp. sign",
    "Same sign",
];

/// Reconstruction of photon conversions $`\gamma \to e^+e^-`$ from secondary vertices with
/// exactly two outgoing tracks, well away from the beam line.
///
/// In [`Mode::KinFit`] both legs are refitted as electrons under a mass constraint to
/// [`ConversionConfig::fit_mass`]. In [`Mode::CutBased`] the measured momenta are used and the
/// pair mass must stay below [`ConversionConfig::mass_max`]. Conversion legs are nearly
/// collinear, so both must point forward in the frame of [`REST_FRAME_MASS`].
#[derive(Clone, Debug)]
pub struct ConversionFinder {
    config: ConversionConfig,
    stats: FinderStats,
}

impl Default for ConversionFinder {
    fn default() -> Self {
        Self::new(ConversionConfig::default())
    }
}

impl ConversionFinder {
    pub fn new(config: ConversionConfig) -> Self {
        let stats = Self::fresh_stats(config.mode);
        Self { config, stats }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    fn fresh_stats(mode: Mode) -> FinderStats {
        match mode {
            Mode::KinFit => FinderStats::new(KINFIT_STAGES),
            Mode::CutBased => FinderStats::new(CUT_BASED_STAGES),
        }
    }

    fn fit(&mut self, event: &Event, vertex: &Vertex) -> KinFitResult<Option<([Vec4; 2], f64, usize)>> {
        let mut fitter = KinFitter::new("Conversion", FitSettings::with_max_f(1e-6));
        let m_e = Species::Electron.mass();
        for &id in &vertex.daughters {
            fitter.add_particle(FitParticle::from_track(event.track(id)?, m_e));
        }
        fitter.add_constraint(MassConstraint::new("m(ee)", &[0, 1], self.config.fit_mass));
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
        let c = &self.config;
        if vertex.position.pt() < c.r_vertex_min {
            return Ok(());
        }
        self.stats.pass("R_Vtx", w);
        if transverse_decay_length(&pv.position, &vertex.position) < c.transv_decay_length_min {
            return Ok(());
        }
        self.stats.pass("Decay length", w);
        let t1 = event.track(vertex.daughters[0])?;
        let t2 = event.track(vertex.daughters[1])?;
        if !(in_window(t1.pt(), c.electron_pt_min, c.electron_pt_max)
            && in_window(t2.pt(), c.electron_pt_min, c.electron_pt_max))
        {
            return Ok(());
        }
        self.stats.pass("Electron pT", w);
        if !(in_window(t1.eta(), c.electron_eta_min, c.electron_eta_max)
            && in_window(t2.eta(), c.electron_eta_min, c.electron_eta_max))
        {
            return Ok(());
        }
        self.stats.pass("Electron eta", w);
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
                let m_e = Species::Electron.mass();
                ([t1.p4(m_e), t2.p4(m_e)], None)
            }
        };
        let c = &self.config;
        let pair = p4s[0] + p4s[1];
        if cos_pointing_angle(&pair.vec3(), &pv.position, &vertex.position) < c.pointing_angle_min {
            return Ok(());
        }
        self.stats.pass("Pointing angle", w);
        let frame = pair.vec3().with_mass(REST_FRAME_MASS);
        if p4s
            .iter()
            .any(|p| cos_decay_angle(&frame, p).abs() < c.decay_angle_min)
        {
            return Ok(());
        }
        self.stats.pass("Decay angle", w);
        match fit {
            Some((chi2, ndof)) => {
                if kinfit_core::fit::probability(chi2, ndof) < c.kinfit_pvalue_min {
                    return Ok(());
                }
                self.stats.pass("KinFit p-value", w);
            }
            None => {
                if pair.m() > c.mass_max {
                    return Ok(());
                }
                self.stats.pass("Mass", w);
            }
        }

        let opposite = t1.charge() * t2.charge() < 0;
        let mut legs = [(t1, p4s[0]), (t2, p4s[1])];
        // e+ first
        if opposite && t1.qovp < 0.0 {
            legs.swap(0, 1);
        }
        let daughters = legs
            .iter()
            .map(|(t, p4)| FittedDaughter::new(t, Species::Electron, *p4))
            .collect();
        let mut candidate = DecayCandidate::new(DecayKind::Conversion, daughters, pv.id)
            .with_production_vertex(vertex.id);
        if let Some((chi2, ndof)) = fit {
            candidate = candidate.with_fit(chi2, ndof);
        }
        let min_prob = self.config.matching_prob_min;
        store(event, &mut self.stats, candidates, candidate, opposite, min_prob)
    }
}

impl Finder for ConversionFinder {
    impl_finder_config_access!(ConversionConfig);

    fn name(&self) -> &str {
        "ConversionFinder"
    }

    fn kind(&self) -> DecayKind {
        DecayKind::Conversion
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
                count_true_decays(event, DecayKind::Conversion, self.config.matching_prob_min);
        }
        for vertex in &event.vertices {
            self.reconstruct(event, pv, vertex, candidates)?;
        }
        crate::find_shared_tracks(&mut candidates.conversion.signal);
        tracing::debug!(
            event = event.number,
            signal = candidates.conversion.signal.len(),
            background = candidates.conversion.background.len(),
            "conversion candidates"
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

impl TryFrom<&IndexMap<String, ConfigValue>> for ConversionFinder {
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
        data::{test_event, EventBuilder, TrackId, VertexId},
        utils::{
            enums::{TruthMatch, VertexKind},
            variables::two_body_decay,
            vectors::Vec3,
        },
    };

    use super::*;

    /// A simulated conversion 10 cm from the beam line, stored as positron, electron.
    fn conversion_event() -> Event {
        let m_e = Species::Electron.mass();
        let photon = Vec3::new(2.4, 1.8, 1.0).with_mass(ConversionConfig::default().fit_mass);
        let (positron, electron) = two_body_decay(&photon, m_e, m_e, &Vec3::new(0.0, 0.0, 1.0));
        let mut builder = EventBuilder::new(2, 77).simulated();
        builder.add_primary_vertex(Vec3::default());
        let ep = builder.add_track(positron.vec3(), 1);
        let em = builder.add_track(electron.vec3(), -1);
        builder.add_vertex(photon.vec3() * (10.0 / photon.pt()), &[ep, em], VertexKind::Secondary);
        let gamma = builder.add_mc_particle(22, photon, None);
        let mc_ep = builder.add_mc_particle(-11, positron, Some(gamma));
        let mc_em = builder.add_mc_particle(11, electron, Some(gamma));
        builder.link_truth(ep, mc_ep, 0.9);
        builder.link_truth(em, mc_em, 0.9);
        builder.build().unwrap()
    }

    fn run(finder: &mut ConversionFinder, event: &Event) -> EventCandidates {
        let mut candidates = EventCandidates::new(event.number);
        finder.analyze_event(event, &mut candidates).unwrap();
        candidates
    }

    #[test]
    fn test_conversion_fit() {
        let event = conversion_event();
        let mut finder = ConversionFinder::default();
        let candidates = run(&mut finder, &event);
        assert_eq!(candidates.conversion.signal.len(), 1);
        assert!(candidates.conversion.background.is_empty());
        let gamma = &candidates.conversion.signal[0];
        assert_relative_eq!(gamma.m(), 0.005, epsilon = 1e-5);
        assert_eq!(gamma.ndof, 1);
        assert_eq!(gamma.charge(), 0);
        assert_eq!(gamma.daughters()[0].pdg_code(), -11);
        assert_eq!(gamma.daughters()[1].pdg_code(), 11);
        assert_eq!(gamma.production_vertex, Some(VertexId(1)));
        assert_eq!(gamma.truth, Some(TruthMatch::True));
        let stats = finder.stats();
        assert_eq!(stats.n_fits, 1);
        assert_eq!(stats.abundance_true, 1);
        assert_eq!(stats.n_true, 1);
        assert_eq!(stats.cut_flow.count("Decay angle"), 1);
    }

    #[test]
    fn test_positron_comes_first() {
        let mut event = conversion_event();
        event.vertices[1].daughters.swap(0, 1);
        let candidates = run(&mut ConversionFinder::default(), &event);
        let gamma = &candidates.conversion.signal[0];
        assert_eq!(gamma.daughters()[0].track, TrackId(0));
        assert_eq!(gamma.daughters()[0].charge, 1);
    }

    #[test]
    fn test_cut_based_mode() {
        let event = conversion_event();
        let mut config = ConversionConfig {
            mode: Mode::CutBased,
            ..Default::default()
        };
        let mut finder = ConversionFinder::new(config.clone());
        let candidates = run(&mut finder, &event);
        assert_eq!(candidates.conversion.signal.len(), 1);
        assert_eq!(candidates.conversion.signal[0].probability(), None);
        assert_eq!(finder.stats().n_fits, 0);
        assert_eq!(finder.stats().cut_flow.count("Mass"), 1);

        config.mass_max = 0.001;
        assert!(run(&mut ConversionFinder::new(config), &event).conversion.is_empty());
    }

    #[test]
    fn test_same_charge_goes_to_background() {
        let mut event = conversion_event();
        event.tracks[1].qovp = event.tracks[1].qovp.abs();
        let mut finder = ConversionFinder::default();
        let candidates = run(&mut finder, &event);
        assert!(candidates.conversion.signal.is_empty());
        assert_eq!(candidates.conversion.background.len(), 1);
        assert_eq!(finder.stats().cut_flow.count("Same sign"), 1);
    }

    #[test]
    fn test_vertex_radius_cut() {
        let mut event = conversion_event();
        event.vertices[1].position = event.vertices[1].position * 0.1;
        let mut finder = ConversionFinder::default();
        assert!(run(&mut finder, &event).conversion.is_empty());
        assert_eq!(finder.stats().cut_flow.count("Sec. Vtx & 2 Dght."), 1);
        assert_eq!(finder.stats().cut_flow.count("R_Vtx"), 0);
    }

    #[test]
    fn test_k0s_decay_is_not_a_conversion() {
        let event = test_event();
        let mut finder = ConversionFinder::new(ConversionConfig {
            mode: Mode::CutBased,
            ..Default::default()
        });
        assert!(run(&mut finder, &event).conversion.is_empty());
        assert_eq!(finder.stats().cut_flow.count("Pointing angle"), 1);
        assert_eq!(finder.stats().cut_flow.count("Decay angle"), 0);
        assert!(run(&mut ConversionFinder::default(), &event).conversion.is_empty());
    }

    #[test]
    fn test_configure() {
        let table: kinfit_core::io::ConfigTable = r#"
            [conversion]
            mode = "cut-based"
            R_Vtx_min = 5.0
            Conv_M_max = 0.02
        "#
        .parse()
        .unwrap();
        let finder = ConversionFinder::try_from(table.section("conversion").unwrap()).unwrap();
        assert_eq!(Finder::mode(&finder), Mode::CutBased);
        assert_eq!(finder.config().r_vertex_min, 5.0);
        assert_eq!(finder.config().mass_max, 0.02);
        assert!(finder.stats().cut_flow.get("Mass").is_some());
        assert_eq!(finder.section(), "conversion");
        assert_eq!(finder.cut_values().len(), 12);
    }
}
