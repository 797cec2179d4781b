use std::fmt::Display;

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

pub use crate::utils::enums::VertexKind;
use crate::{
    utils::{
        variables::two_body_decay,
        vectors::{Vec3, Vec4},
    },
    KinFitError, KinFitResult,
};

macro_rules! impl_id {
    ($name:ident, $prefix:literal) => {
        #[derive(
            Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub usize);

        impl $name {
            /// The position of the referenced object in its event collection.
            pub fn index(&self) -> usize {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}#{}", $prefix, self.0)
            }
        }
    };
}

impl_id!(TrackId, "trk");
impl_id!(VertexId, "vtx");
impl_id!(McParticleId, "mc");

/// A weighted link from a reconstructed track to the generated particle which most likely
/// produced it.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TruthLink {
    pub particle: McParticleId,
    /// The match-quality probability in $`[0, 1]`$.
    pub probability: f64,
}

fn default_covariance() -> Matrix3<f64> {
    Track::diagonal_covariance(0.01, 0.001, 0.001)
}

/// A measured charged-particle trajectory.
///
/// Tracks are created once per event from reconstruction input and are never modified by the
/// finders. Candidates refer to them through their [`TrackId`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    /// The momentum at the point of closest approach (GeV).
    pub p3: Vec3,
    /// The signed curvature proxy $`q/p`$.
    pub qovp: f64,
    pub chi2: f64,
    pub ndof: u32,
    /// The transverse impact parameter (cm).
    pub d0: f64,
    /// The longitudinal impact parameter (cm).
    pub z0: f64,
    pub d0_err: f64,
    pub z0_err: f64,
    /// The covariance of the $`(p_T, \eta, \phi)`$ measurement.
    #[serde(default = "default_covariance")]
    pub covariance: Matrix3<f64>,
    /// The vertex this track was fitted to, if any.
    #[serde(default)]
    pub vertex: Option<VertexId>,
    /// The generator-level match (simulation only).
    #[serde(default)]
    pub truth: Option<TruthLink>,
}

impl Track {
    /// A diagonal $`(p_T, \eta, \phi)`$ covariance from the three resolutions.
    pub fn diagonal_covariance(sigma_pt: f64, sigma_eta: f64, sigma_phi: f64) -> Matrix3<f64> {
        Matrix3::from_diagonal(&nalgebra::Vector3::new(
            sigma_pt.powi(2),
            sigma_eta.powi(2),
            sigma_phi.powi(2),
        ))
    }

    /// The electric charge in units of $`e`$ (the sign of `qovp`).
    pub fn charge(&self) -> i32 {
        if self.qovp > 0.0 {
            1
        } else if self.qovp < 0.0 {
            -1
        } else {
            0
        }
    }

    pub fn pt(&self) -> f64 {
        self.p3.pt()
    }

    pub fn eta(&self) -> f64 {
        self.p3.eta()
    }

    pub fn phi(&self) -> f64 {
        self.p3.phi()
    }

    /// The track-fit quality. Tracks without degrees of freedom never pass a quality ceiling.
    pub fn chi2_over_ndof(&self) -> f64 {
        if self.ndof == 0 {
            f64::INFINITY
        } else {
            self.chi2 / self.ndof as f64
        }
    }

    /// `true` if the track has a generator link whose probability is strictly above `min_prob`.
    pub fn has_valid_truth_match(&self, min_prob: f64) -> bool {
        self.truth.is_some_and(|link| link.probability > min_prob)
    }

    /// The four-momentum under a mass hypothesis.
    pub fn p4(&self, mass: f64) -> Vec4 {
        self.p3.with_mass(mass)
    }
}

/// A reconstructed vertex. It owns only the association to its daughter tracks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub id: VertexId,
    /// The vertex position (cm).
    pub position: Vec3,
    pub chi2: f64,
    pub ndof: u32,
    pub daughters: Vec<TrackId>,
    #[serde(default)]
    pub kind: VertexKind,
}

impl Vertex {
    pub fn chi2_over_ndof(&self) -> f64 {
        if self.ndof == 0 {
            f64::INFINITY
        } else {
            self.chi2 / self.ndof as f64
        }
    }

    pub fn n_daughters(&self) -> usize {
        self.daughters.len()
    }

    pub fn is_secondary(&self) -> bool {
        self.kind == VertexKind::Secondary
    }
}

/// A generator-level particle with its ancestry links.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct McParticle {
    pub id: McParticleId,
    /// The signed PDG code.
    pub pdg: i32,
    pub p4: Vec4,
    #[serde(default)]
    pub mother: Option<McParticleId>,
    #[serde(default)]
    pub daughters: Vec<McParticleId>,
}

impl McParticle {
    /// `true` if the absolute PDG code equals `code`.
    pub fn is(&self, code: i32) -> bool {
        self.pdg.abs() == code
    }
}

fn default_weight() -> f64 {
    1.0
}

/// All reconstructed (and, for simulation, generated) objects of one collision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub run: u32,
    pub number: u64,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub primary_vertex: Option<VertexId>,
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub vertices: Vec<Vertex>,
    /// Present if and only if the event is simulated.
    #[serde(default)]
    pub mc_particles: Option<Vec<McParticle>>,
}

impl Event {
    /// `true` if generator-level information is available.
    pub fn is_mc(&self) -> bool {
        self.mc_particles.is_some()
    }

    pub fn track(&self, id: TrackId) -> KinFitResult<&Track> {
        self.tracks.get(id.0).ok_or_else(|| KinFitError::InvalidEvent {
            reason: format!("event {} has no track {}", self.number, id),
        })
    }

    pub fn vertex(&self, id: VertexId) -> KinFitResult<&Vertex> {
        self.vertices.get(id.0).ok_or_else(|| KinFitError::InvalidEvent {
            reason: format!("event {} has no vertex {}", self.number, id),
        })
    }

    pub fn mc_particle(&self, id: McParticleId) -> Option<&McParticle> {
        self.mc_particles.as_ref().and_then(|mc| mc.get(id.0))
    }

    pub fn primary_vertex(&self) -> Option<&Vertex> {
        self.primary_vertex.and_then(|id| self.vertices.get(id.0))
    }

    /// The primary vertex, or [`KinFitError::MissingPrimaryVertex`] on behalf of `finder`.
    pub fn require_primary_vertex(&self, finder: &str) -> KinFitResult<&Vertex> {
        self.primary_vertex()
            .ok_or_else(|| KinFitError::MissingPrimaryVertex {
                finder: finder.to_string(),
                event: self.number,
            })
    }

    pub fn secondary_vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.iter().filter(|v| v.is_secondary())
    }

    /// The generated particle behind `track`, provided the link probability exceeds
    /// `min_prob`.
    pub fn truth_particle(&self, track: &Track, min_prob: f64) -> Option<&McParticle> {
        if !track.has_valid_truth_match(min_prob) {
            return None;
        }
        track
            .truth
            .and_then(|link| self.mc_particle(link.particle))
    }

    pub fn mother_of(&self, particle: &McParticle) -> Option<&McParticle> {
        particle.mother.and_then(|id| self.mc_particle(id))
    }

    /// The reconstructed track with the most probable link to the generated particle `id`.
    pub fn associated_track(&self, id: McParticleId) -> Option<&Track> {
        self.tracks
            .iter()
            .filter_map(|t| t.truth.filter(|link| link.particle == id).map(|link| (t, link)))
            .max_by(|(_, a), (_, b)| a.probability.total_cmp(&b.probability))
            .map(|(t, _)| t)
    }

    /// Check that every identifier equals the position of its object and that every cross
    /// reference resolves.
    pub fn validate(&self) -> KinFitResult<()> {
        let invalid = |reason: String| KinFitError::InvalidEvent {
            reason: format!("event {}: {}", self.number, reason),
        };
        let n_mc = self.mc_particles.as_ref().map_or(0, Vec::len);
        for (i, track) in self.tracks.iter().enumerate() {
            if track.id.0 != i {
                return Err(invalid(format!("{} stored at position {}", track.id, i)));
            }
            if let Some(vtx) = track.vertex {
                if vtx.0 >= self.vertices.len() {
                    return Err(invalid(format!("{} refers to missing {}", track.id, vtx)));
                }
            }
            if let Some(link) = track.truth {
                if link.particle.0 >= n_mc {
                    return Err(invalid(format!(
                        "{} refers to missing {}",
                        track.id, link.particle
                    )));
                }
            }
        }
        for (i, vertex) in self.vertices.iter().enumerate() {
            if vertex.id.0 != i {
                return Err(invalid(format!("{} stored at position {}", vertex.id, i)));
            }
            if let Some(trk) = vertex.daughters.iter().find(|t| t.0 >= self.tracks.len()) {
                return Err(invalid(format!("{} refers to missing {}", vertex.id, trk)));
            }
        }
        if let Some(pv) = self.primary_vertex {
            match self.vertices.get(pv.0) {
                Some(v) if v.kind == VertexKind::Primary => {}
                Some(_) => return Err(invalid(format!("{} is not a primary vertex", pv))),
                None => return Err(invalid(format!("missing primary vertex {}", pv))),
            }
        }
        if let Some(mc) = &self.mc_particles {
            for (i, particle) in mc.iter().enumerate() {
                if particle.id.0 != i {
                    return Err(invalid(format!("{} stored at position {}", particle.id, i)));
                }
                let dangling = particle
                    .mother
                    .iter()
                    .chain(particle.daughters.iter())
                    .find(|id| id.0 >= n_mc);
                if let Some(id) = dangling {
                    return Err(invalid(format!("{} refers to missing {}", particle.id, id)));
                }
                if let Some(d) = particle.daughters.iter().find(|d| mc[d.0].mother != Some(particle.id)) {
                    return Err(invalid(format!(
                        "{} lists {} as a daughter, but not as its mother",
                        particle.id, d
                    )));
                }
            }
            // Every ancestry chain must reach a particle without a mother within `n_mc` steps.
            for particle in mc {
                let mut current = particle.mother;
                let mut steps = 0;
                while let Some(id) = current {
                    if steps == n_mc {
                        return Err(invalid(format!("{} has a cyclic ancestry", particle.id)));
                    }
                    current = mc[id.0].mother;
                    steps += 1;
                }
            }
        }
        Ok(())
    }
}

/// Incremental construction of a consistent [`Event`], assigning identifiers in insertion
/// order.
#[derive(Clone, Debug)]
pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    pub fn new(run: u32, number: u64) -> Self {
        Self {
            event: Event {
                run,
                number,
                weight: 1.0,
                primary_vertex: None,
                tracks: Vec::new(),
                vertices: Vec::new(),
                mc_particles: None,
            },
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.event.weight = weight;
        self
    }

    /// Mark the event as simulated even before any generated particle is added.
    pub fn simulated(mut self) -> Self {
        self.event.mc_particles.get_or_insert_with(Vec::new);
        self
    }

    /// Add a well-measured track with momentum `p3` and charge `charge`, unit-quality fit
    /// and a 1% $`p_T`$ resolution.
    pub fn add_track(&mut self, p3: Vec3, charge: i32) -> TrackId {
        let id = TrackId(self.event.tracks.len());
        let p = p3.mag();
        self.event.tracks.push(Track {
            id,
            p3,
            qovp: if p > 0.0 { charge as f64 / p } else { 0.0 },
            chi2: 5.0,
            ndof: 5,
            d0: 0.0,
            z0: 0.0,
            d0_err: 0.01,
            z0_err: 0.01,
            covariance: Track::diagonal_covariance(0.01 * p3.pt(), 0.001, 0.001),
            vertex: None,
            truth: None,
        });
        id
    }

    pub fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.event.tracks.get_mut(id.0)
    }

    /// Add the primary vertex. Calling this twice replaces the event's primary vertex.
    pub fn add_primary_vertex(&mut self, position: Vec3) -> VertexId {
        let id = self.add_vertex(position, &[], VertexKind::Primary);
        self.event.primary_vertex = Some(id);
        id
    }

    /// Add a vertex and attach `daughters` to it.
    pub fn add_vertex(&mut self, position: Vec3, daughters: &[TrackId], kind: VertexKind) -> VertexId {
        let id = VertexId(self.event.vertices.len());
        for daughter in daughters {
            if let Some(track) = self.event.tracks.get_mut(daughter.0) {
                track.vertex = Some(id);
            }
        }
        self.event.vertices.push(Vertex {
            id,
            position,
            chi2: 1.0,
            ndof: 1,
            daughters: daughters.to_vec(),
            kind,
        });
        id
    }

    pub fn vertex_mut(&mut self, id: VertexId) -> Option<&mut Vertex> {
        self.event.vertices.get_mut(id.0)
    }

    /// Add a generated particle, registering it as a daughter of `mother`.
    pub fn add_mc_particle(&mut self, pdg: i32, p4: Vec4, mother: Option<McParticleId>) -> McParticleId {
        let particles = self.event.mc_particles.get_or_insert_with(Vec::new);
        let id = McParticleId(particles.len());
        if let Some(m) = mother.and_then(|m| particles.get_mut(m.0)) {
            m.daughters.push(id);
        }
        particles.push(McParticle {
            id,
            pdg,
            p4,
            mother,
            daughters: Vec::new(),
        });
        id
    }

    pub fn link_truth(&mut self, track: TrackId, particle: McParticleId, probability: f64) {
        if let Some(t) = self.event.tracks.get_mut(track.0) {
            t.truth = Some(TruthLink {
                particle,
                probability,
            });
        }
    }

    /// Finish the event, checking its internal consistency.
    pub fn build(self) -> KinFitResult<Event> {
        self.event.validate()?;
        Ok(self.event)
    }
}

/// Half of the lab-frame opening angle (in $`\phi`$) of the two pions in [`test_event`].
pub const TEST_HALF_OPENING: f64 = 0.1035;

/// An event that can be used to test the finders. It contains a primary vertex at the origin
/// and a simulated $`K^0_S \to \pi^+\pi^-`$ decay whose two pions ($`p_T = 2`$ GeV,
/// $`\eta = 0.5`$) meet at a secondary vertex 5 cm from the primary vertex in the transverse
/// plane, along the direction of the pion pair.
pub fn test_event() -> Event {
    let pt = 2.0;
    let eta = 0.5;
    let p1 = Vec3::from_pt_eta_phi(pt, eta, TEST_HALF_OPENING);
    let p2 = Vec3::from_pt_eta_phi(pt, eta, -TEST_HALF_OPENING);
    let sum = p1 + p2;
    let sv = sum * (5.0 / sum.pt());
    let mut builder = EventBuilder::new(1, 42).with_weight(0.5);
    builder.add_primary_vertex(Vec3::default());
    let pip = builder.add_track(p1, 1);
    let pim = builder.add_track(p2, -1);
    builder.add_vertex(sv, &[pip, pim], VertexKind::Secondary);
    let k0s = builder.add_mc_particle(310, p1.with_mass(0.13957) + p2.with_mass(0.13957), None);
    let mc_pip = builder.add_mc_particle(211, p1.with_mass(0.13957), Some(k0s));
    let mc_pim = builder.add_mc_particle(-211, p2.with_mass(0.13957), Some(k0s));
    builder.link_truth(pip, mc_pip, 0.95);
    builder.link_truth(pim, mc_pim, 0.9);
    builder.event
}

/// A simulated $`D^{*+} \to D^0\pi^+_s`$, $`D^0 \to K^-\pi^+`$ decay with all three tracks
/// attached to the primary vertex at the origin. Tracks are stored as kaon, pion, soft pion.
pub fn test_dstar_event() -> Event {
    let dstar = Vec3::new(5.2, 1.6, 0.85).with_mass(2.01027);
    let (d0, soft) = two_body_decay(&dstar, 1.86484, 0.13957, &Vec3::new(1.0, 0.4, 0.3));
    let (kaon, pion) = two_body_decay(&d0, 0.493667, 0.13957, &Vec3::new(-1.0, 1.0, 0.0));
    let mut builder = EventBuilder::new(1, 43).simulated();
    let pv = builder.add_primary_vertex(Vec3::default());
    let k = builder.add_track(kaon.vec3(), -1);
    let pi = builder.add_track(pion.vec3(), 1);
    let pis = builder.add_track(soft.vec3(), 1);
    for id in [k, pi, pis] {
        if let Some(track) = builder.track_mut(id) {
            track.vertex = Some(pv);
        }
    }
    if let Some(vertex) = builder.vertex_mut(pv) {
        vertex.daughters = vec![k, pi, pis];
    }
    let mc_dstar = builder.add_mc_particle(413, dstar, None);
    let mc_d0 = builder.add_mc_particle(421, d0, Some(mc_dstar));
    let mc_k = builder.add_mc_particle(-321, kaon, Some(mc_d0));
    let mc_pi = builder.add_mc_particle(211, pion, Some(mc_d0));
    let mc_soft = builder.add_mc_particle(211, soft, Some(mc_dstar));
    builder.link_truth(k, mc_k, 0.9);
    builder.link_truth(pi, mc_pi, 0.9);
    builder.link_truth(pis, mc_soft, 0.9);
    builder.event
}
