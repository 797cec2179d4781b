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
        variables::{invariant_mass, opening_angle},
        vectors::Vec4,
    },
    KinFitError, KinFitResult,
};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::{
    d0::D0_MASS,
    impl_finder_config_access,
    truth::{count_true_decays, match_candidate},
    Branch, Finder, FinderConfig, FinderStats, TRUTH_LINK_MIN,
};

/// The $`D^{*\pm}`$ mass used in the constraint (GeV).
pub const DSTAR_MASS: f64 = 2.01027;

/// Selection of [`DstarFinder`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DstarConfig {
    pub mode: Mode,
    pub pt_min: f64,
    pub pt_max: f64,
    pub eta_min: f64,
    pub eta_max: f64,
    pub mass_min: f64,
    pub mass_max: f64,
    pub opening_angle_max: f64,
    pub soft_pion_pt_min: f64,
    pub soft_pion_d0_min: f64,
    pub soft_pion_d0_max: f64,
    pub track_chi2_ndof_max: f64,
    pub kinfit_pvalue_min: f64,
    pub matching_prob_min: f64,
}

impl Default for DstarConfig {
    fn default() -> Self {
        Self {
            mode: Mode::KinFit,
            pt_min: 0.5,
            pt_max: 1.0e10,
            eta_min: -2.5,
            eta_max: 2.5,
            mass_min: 1.9,
            mass_max: 2.1,
            opening_angle_max: 0.5,
            soft_pion_pt_min: 0.1,
            soft_pion_d0_min: -1.0,
            soft_pion_d0_max: 1.0,
            track_chi2_ndof_max: 5.0,
            kinfit_pvalue_min: 0.05,
            matching_prob_min: 0.5,
        }
    }
}

lazy_static! {
    static ref DSTAR_CUTS: CutRegistry<DstarConfig> = cut_registry!(DstarConfig, "DstarFinder", {
        "Signal_Pt_min" => pt_min: "minimum D* pT (GeV)",
        "Signal_Pt_max" => pt_max: "maximum D* pT (GeV)",
        "Signal_Eta_min" => eta_min: "minimum D* eta",
        "Signal_Eta_max" => eta_max: "maximum D* eta",
        "Dstar_M_min" => mass_min: "lower edge of the K pi pi mass window (GeV)",
        "Dstar_M_max" => mass_max: "upper edge of the K pi pi mass window (GeV)",
        "OAngle_max" => opening_angle_max: "maximum angle between the D0 and the soft pion (rad)",
        "SoftPion_Pt_min" => soft_pion_pt_min: "minimum soft pion pT (GeV)",
        "D0_Pi_min" => soft_pion_d0_min: "minimum soft pion transverse impact parameter (cm)",
        "D0_Pi_max" => soft_pion_d0_max: "maximum soft pion transverse impact parameter (cm)",
        "TrackChi2ovNDoF_max" => track_chi2_ndof_max: "maximum soft pion track chi2/ndof",
        "KinFitPvalue_min" => kinfit_pvalue_min: "minimum fit p-value",
        "MatchingProb_min" => matching_prob_min: "minimum truth-link probability for truth matching",
    });
}

impl FinderConfig for DstarConfig {
    const SECTION: &'static str = "dstar";

    fn registry() -> &'static CutRegistry<Self> {
        &DSTAR_CUTS
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    /// Only [`Mode::KinFit`] exists for this finder.
    fn set_mode(&mut self, mode: Mode) -> KinFitResult<()> {
        match mode {
            Mode::KinFit => {
                self.mode = mode;
                Ok(())
            }
            Mode::CutBased => Err(invalid_mode(mode)),
        }
    }
}

fn invalid_mode(mode: Mode) -> KinFitError {
    KinFitError::InvalidMode {
        finder: "DstarFinder".to_string(),
        mode: mode.to_string(),
    }
}

const STAGES: [&str; 12] = [
    "Soft pion d0",
    "Primary vertex",
    "Trk chi2",
    "MC exists",
    "Pions' charge",
    "Mass window",
    "Fit ok",
    "D* eta",
    "Opening angle",
    "D* pT",
    "Soft pion pT",
    "KinFit p-value",
];

/// The legs of a $`D^0`$ signal candidate a $`D^*`$ is grown from.
struct Seed {
    index: usize,
    kaon: FittedDaughter,
    pion: FittedDaughter,
}

/// Reconstruction of $`D^{*\pm} \to D^0\pi^\pm_s`$ from the $`D^0`$ signal candidates of the
/// same event.
///
/// Each $`D^0`$ without shared tracks is combined with every track not used by any
/// $`D^0`$ candidate. The kaon, pion and soft pion are refitted together under both the
/// $`D^0`$ and the $`D^*`$ mass constraint, starting from the $`D^0`$'s refitted legs.
/// Only the kinematic-fit mode exists.
#[derive(Clone, Debug)]
pub struct DstarFinder {
    config: DstarConfig,
    stats: FinderStats,
}

impl Default for DstarFinder {
    fn default() -> Self {
        Self::new(DstarConfig::default())
    }
}

impl DstarFinder {
    pub fn new(config: DstarConfig) -> Self {
        Self {
            config,
            stats: FinderStats::new(STAGES),
        }
    }

    pub fn config(&self) -> &DstarConfig {
        &self.config
    }

    fn fit(&mut self, event: &Event, seed: &Seed, soft: &Track) -> KinFitResult<FitResult> {
        let mut fitter = KinFitter::new("D*", FitSettings::with_max_f(1e-4));
        let kaon = event.track(seed.kaon.track)?;
        let pion = event.track(seed.pion.track)?;
        let k = fitter.add_particle(FitParticle::new(
            &seed.kaon.p4.vec3(),
            Species::Kaon.mass(),
            kaon.covariance,
        ));
        let pi = fitter.add_particle(FitParticle::new(
            &seed.pion.p4.vec3(),
            Species::Pion.mass(),
            pion.covariance,
        ));
        let s = fitter.add_particle(FitParticle::from_track(soft, Species::Pion.mass()));
        fitter.add_constraint(MassConstraint::new("m(D0)", &[k, pi], D0_MASS));
        fitter.add_constraint(MassConstraint::new("m(D*)", &[k, pi, s], DSTAR_MASS));
        let result = fitter.fit()?;
        self.stats.n_fits += 1;
        Ok(result)
    }

    fn preselect(&mut self, event: &Event, pv: &Vertex, seed: &Seed, soft: &Track) -> KinFitResult<bool> {
        let w = event.weight;
        let c = &self.config;
        if !in_window(soft.d0, c.soft_pion_d0_min, c.soft_pion_d0_max) {
            return Ok(false);
        }
        self.stats.pass("Soft pion d0", w);
        if soft.vertex != Some(pv.id) {
            return Ok(false);
        }
        self.stats.pass("Primary vertex", w);
        if soft.chi2_over_ndof() > c.track_chi2_ndof_max {
            return Ok(false);
        }
        self.stats.pass("Trk chi2", w);
        if event.is_mc() && !soft.has_valid_truth_match(TRUTH_LINK_MIN) {
            return Ok(false);
        }
        self.stats.pass("MC exists", w);
        if soft.charge() != seed.pion.charge {
            return Ok(false);
        }
        self.stats.pass("Pions' charge", w);
        let kaon = event.track(seed.kaon.track)?;
        let pion = event.track(seed.pion.track)?;
        let m = invariant_mass(&[
            (kaon.p3, Species::Kaon.mass()),
            (pion.p3, Species::Pion.mass()),
            (soft.p3, Species::Pion.mass()),
        ]);
        if !in_window(m, c.mass_min, c.mass_max) {
            return Ok(false);
        }
        self.stats.pass("Mass window", w);
        Ok(true)
    }

    fn reconstruct(
        &mut self,
        event: &Event,
        pv: &Vertex,
        seed: &Seed,
        soft: &Track,
        candidates: &mut EventCandidates,
    ) -> KinFitResult<()> {
        let w = event.weight;
        if !self.preselect(event, pv, seed, soft)? {
            return Ok(());
        }
        let fit = self.fit(event, seed, soft)?;
        if !fit.converged() {
            return Ok(());
        }
        self.stats.pass("Fit ok", w);
        let c = &self.config;
        let dstar = fit.p4s.iter().sum::<Vec4>();
        if !in_window(dstar.eta(), c.eta_min, c.eta_max) {
            return Ok(());
        }
        self.stats.pass("D* eta", w);
        let d0 = fit.p4s[0] + fit.p4s[1];
        if opening_angle(&d0.vec3(), &fit.p4s[2].vec3()) > c.opening_angle_max {
            return Ok(());
        }
        self.stats.pass("Opening angle", w);
        if !in_window(dstar.pt(), c.pt_min, c.pt_max) {
            return Ok(());
        }
        self.stats.pass("D* pT", w);
        if fit.p4s[2].pt() < c.soft_pion_pt_min {
            return Ok(());
        }
        self.stats.pass("Soft pion pT", w);
        if fit.probability() < c.kinfit_pvalue_min {
            return Ok(());
        }
        self.stats.pass("KinFit p-value", w);
        let kaon = event.track(seed.kaon.track)?;
        let pion = event.track(seed.pion.track)?;
        let mut candidate = DecayCandidate::new(
            DecayKind::Dstar,
            vec![
                FittedDaughter::new(kaon, Species::Kaon, fit.p4s[0]),
                FittedDaughter::new(pion, Species::Pion, fit.p4s[1]),
                FittedDaughter::new(soft, Species::Pion, fit.p4s[2]),
            ],
            pv.id,
        )
        .with_fit(fit.chi2, fit.ndof)
        .with_seed(seed.index);
        candidate.truth = match_candidate(event, &candidate, self.config.matching_prob_min)?;
        if let Some(verdict) = candidate.truth {
            self.stats.record_truth(verdict);
        }
        candidates.dstar.push_signal(candidate);
        self.stats.n_signal += 1;
        Ok(())
    }
}

impl Finder for DstarFinder {
    impl_finder_config_access!(DstarConfig);

    fn name(&self) -> &str {
        "DstarFinder"
    }

    fn kind(&self) -> DecayKind {
        DecayKind::Dstar
    }

    fn set_branch_status(&self) -> Vec<Branch> {
        vec![
            Branch::EventHeader,
            Branch::PrimaryVertex,
            Branch::Tracks,
            Branch::McParticles,
        ]
    }

    fn analyze_event(&mut self, event: &Event, candidates: &mut EventCandidates) -> KinFitResult<()> {
        if self.config.mode != Mode::KinFit {
            return Err(invalid_mode(self.config.mode));
        }
        let pv = event.require_primary_vertex(self.name())?;
        self.stats.n_events += 1;
        if event.is_mc() {
            self.stats.abundance_true +=
                count_true_decays(event, DecayKind::Dstar, self.config.matching_prob_min);
        }
        let seeds: Vec<Seed> = candidates
            .d0
            .signal
            .iter()
            .enumerate()
            .filter(|(_, d0)| !d0.shared_tracks)
            .filter_map(|(index, d0)| {
                Some(Seed {
                    index,
                    kaon: d0.leg(Species::Kaon)?.clone(),
                    pion: d0.leg(Species::Pion)?.clone(),
                })
            })
            .collect();
        let free: Vec<&Track> = event
            .tracks
            .iter()
            .filter(|t| !candidates.d0.uses_track(t.id))
            .collect();
        for seed in &seeds {
            for soft in &free {
                self.reconstruct(event, pv, seed, soft, candidates)?;
            }
        }
        crate::find_shared_tracks(&mut candidates.dstar.signal);
        tracing::debug!(
            event = event.number,
            signal = candidates.dstar.signal.len(),
            "D* candidates"
        );
        Ok(())
    }

    fn configure(&mut self, section: &IndexMap<String, ConfigValue>) -> KinFitResult<()> {
        self.config.apply(section)
    }
}

impl TryFrom<&IndexMap<String, ConfigValue>> for DstarFinder {
    type Error = KinFitError;

    fn try_from(section: &IndexMap<String, ConfigValue>) -> Result<Self, Self::Error> {
        let mut finder = Self::default();
        finder.configure(section)?;
        Ok(finder)
    }
}
