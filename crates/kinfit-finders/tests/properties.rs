use std::collections::HashSet;

use approx::assert_relative_eq;
use kinfit_core::{
    candidate::{CandidateLists, EventCandidates},
    data::{EventBuilder, TrackId, VertexKind},
    observer::NullObserver,
    utils::{
        enums::DecayKind,
        variables::two_body_decay,
        vectors::Vec3,
    },
    Event,
};
use kinfit_finders::Analysis;
use proptest::prelude::*;

const M_PI: f64 = 0.13957;
const M_K0S: f64 = 0.497611;

#[derive(Clone, Debug)]
struct RandomTrack {
    pt: f64,
    eta: f64,
    phi: f64,
    positive: bool,
}

fn random_track() -> impl Strategy<Value = RandomTrack> {
    (0.3f64..6.0, -2.0f64..2.0, -3.1f64..3.1, any::<bool>()).prop_map(|(pt, eta, phi, positive)| {
        RandomTrack {
            pt,
            eta,
            phi,
            positive,
        }
    })
}

/// Random prompt tracks, consecutive pairs of which also form displaced vertices, plus one
/// genuine $`K^0_S \to \pi^+\pi^-`$ decay.
fn build_event(
    tracks: &[RandomTrack],
    k0s: (f64, f64, f64),
    direction: (f64, f64, f64),
) -> Event {
    let mut builder = EventBuilder::new(1, 7);
    let pv = builder.add_primary_vertex(Vec3::default());
    let ids: Vec<TrackId> = tracks
        .iter()
        .map(|t| {
            builder.add_track(
                Vec3::from_pt_eta_phi(t.pt, t.eta, t.phi),
                if t.positive { 1 } else { -1 },
            )
        })
        .collect();
    for pair in ids.chunks_exact(2) {
        let sum = tracks[pair[0].index()].pt + tracks[pair[1].index()].pt;
        let position = Vec3::from_pt_eta_phi(0.5 * sum, 0.0, tracks[pair[0].index()].phi);
        builder.add_vertex(position, pair, VertexKind::Secondary);
    }
    for &id in &ids {
        if let Some(track) = builder.track_mut(id) {
            track.vertex.get_or_insert(pv);
        }
    }
    let parent = Vec3::from_pt_eta_phi(k0s.0, k0s.1, k0s.2).with_mass(M_K0S);
    let (plus, minus) = two_body_decay(
        &parent,
        M_PI,
        M_PI,
        &Vec3::new(direction.0, direction.1, direction.2),
    );
    let pip = builder.add_track(plus.vec3(), 1);
    let pim = builder.add_track(minus.vec3(), -1);
    let flight = parent.vec3() * (4.0 / parent.pt());
    builder.add_vertex(flight, &[pip, pim], VertexKind::Secondary);
    builder.build().unwrap()
}

fn pair_key(candidate: &kinfit_core::DecayCandidate) -> Vec<TrackId> {
    let mut tracks: Vec<TrackId> = candidate.tracks().collect();
    tracks.sort();
    tracks
}

fn check_lists(kind: DecayKind, lists: &CandidateLists) {
    let mut seen = HashSet::new();
    for (i, candidate) in lists.signal.iter().enumerate() {
        assert_eq!(candidate.id, i);
        assert_eq!(candidate.kind, kind);
        if kind != DecayKind::Dstar {
            assert_eq!(candidate.charge(), 0);
        }
        assert!(seen.insert(pair_key(candidate)), "{kind} candidate built twice");
        let shares = lists
            .signal
            .iter()
            .any(|other| other.id != candidate.id && other.shares_track_with(candidate));
        assert_eq!(candidate.shared_tracks, shares);
    }
    for (i, candidate) in lists.background.iter().enumerate() {
        assert_eq!(candidate.id, i);
        assert_eq!(candidate.charge().abs(), 2);
        assert!(seen.insert(pair_key(candidate)), "{kind} candidate built twice");
    }
    for candidate in lists.signal.iter().chain(lists.background.iter()) {
        let sum: kinfit_core::Vec4 = candidate.daughters().iter().map(|d| d.p4).sum();
        assert_relative_eq!(candidate.p4().e, sum.e, epsilon = 1e-12);
        assert_relative_eq!(candidate.m(), sum.m(), epsilon = 1e-9);
        assert!(candidate.chi2 >= 0.0);
        if candidate.ndof == 0 {
            assert_eq!(candidate.chi2, 0.0);
        }
    }
}

fn check_event(candidates: &EventCandidates) {
    for kind in DecayKind::all() {
        check_lists(kind, candidates.get(kind));
    }
    for dstar in &candidates.dstar.signal {
        let seed = dstar.seed.expect("D* candidates carry their D0 seed");
        let d0 = &candidates.d0.signal[seed];
        assert!(!d0.shared_tracks);
        for track in d0.tracks() {
            assert!(dstar.uses_track(track));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn candidate_lists_are_consistent(
        tracks in prop::collection::vec(random_track(), 0..7),
        k0s in (0.8f64..6.0, -1.5f64..1.5, -3.1f64..3.1),
        direction in (-1.0f64..1.0, -1.0f64..1.0, 0.1f64..1.0),
    ) {
        let event = build_event(&tracks, k0s, direction);
        let mut analysis = Analysis::default();
        let output = analysis.process(&[event.clone()], &mut NullObserver).unwrap();
        check_event(&output[0]);

        let mut again = Analysis::default();
        let repeat = again.process(&[event], &mut NullObserver).unwrap();
        prop_assert_eq!(&repeat, &output);

        let summaries = analysis.terminate(&mut NullObserver);
        for summary in &summaries {
            let lists = output[0].get(summary.kind);
            prop_assert_eq!(summary.n_signal as usize, lists.signal.len());
            prop_assert_eq!(summary.n_background as usize, lists.background.len());
            prop_assert!(summary.n_fits >= summary.n_signal + summary.n_background
                || summary.mode == kinfit_core::Mode::CutBased);
        }
    }
}
