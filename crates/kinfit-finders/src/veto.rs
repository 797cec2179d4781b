use kinfit_core::{
    candidate::CandidateLists,
    cuts::in_window,
    data::{Track, VertexId},
    utils::{enums::Species, variables::invariant_mass},
};

/// `true` if the pair is compatible with a photon conversion: the invariant mass under the
/// electron hypothesis for both legs is below `mass_max`.
pub fn is_conversion(t1: &Track, t2: &Track, mass_max: f64) -> bool {
    let m_e = Species::Electron.mass();
    invariant_mass(&[(t1.p3, m_e), (t2.p3, m_e)]) < mass_max
}

/// `true` if the $`\pi\pi`$ invariant mass of the pair falls in the open window `(lo, hi)`.
pub fn in_k0s_window(t1: &Track, t2: &Track, lo: f64, hi: f64) -> bool {
    let m_pi = Species::Pion.mass();
    let m = invariant_mass(&[(t1.p3, m_pi), (t2.p3, m_pi)]);
    m > lo && m < hi
}

/// `true` if either $`p\pi`$ assignment of the pair falls in the open window `(lo, hi)`.
pub fn in_lambda_window(t1: &Track, t2: &Track, lo: f64, hi: f64) -> bool {
    let (m_p, m_pi) = (Species::Proton.mass(), Species::Pion.mass());
    [
        invariant_mass(&[(t1.p3, m_p), (t2.p3, m_pi)]),
        invariant_mass(&[(t1.p3, m_pi), (t2.p3, m_p)]),
    ]
    .into_iter()
    .any(|m| m > lo && m < hi)
}

/// `true` if any signal candidate in `lists` uses either track.
pub fn uses_either(lists: &CandidateLists, t1: &Track, t2: &Track) -> bool {
    lists
        .signal
        .iter()
        .any(|c| c.uses_track(t1.id) || c.uses_track(t2.id))
}

/// `true` if any signal candidate in `lists` was built at `vertex`.
pub fn uses_vertex(lists: &CandidateLists, vertex: VertexId) -> bool {
    lists
        .signal
        .iter()
        .any(|c| c.production_vertex == Some(vertex))
}

/// `true` if the pair lies in the $`K\pi`$ mass window `[lo, hi]` when the lower-$`p_T`$ track
/// is taken as the kaon.
pub fn in_d0_window(t1: &Track, t2: &Track, lo: f64, hi: f64) -> bool {
    let (kaon, pion) = if t1.pt() > t2.pt() { (t2, t1) } else { (t1, t2) };
    let m = invariant_mass(&[(kaon.p3, Species::Kaon.mass()), (pion.p3, Species::Pion.mass())]);
    in_window(m, lo, hi)
}

#[cfg(test)]
mod tests {
    use kinfit_core::{
        candidate::{DecayCandidate, FittedDaughter},
        data::{test_event, EventBuilder},
        utils::{
            enums::{DecayKind, Species},
            vectors::Vec3,
        },
    };

    use super::*;

    #[test]
    fn test_conversion() {
        let mut builder = EventBuilder::new(1, 1);
        let e1 = builder.add_track(Vec3::from_pt_eta_phi(1.0, 0.2, 0.3), 1);
        let e2 = builder.add_track(Vec3::from_pt_eta_phi(1.2, 0.2, 0.305), -1);
        let event = builder.build().unwrap();
        let (a, b) = (&event.tracks[e1.index()], &event.tracks[e2.index()]);
        assert!(is_conversion(a, b, 0.05));
        let k0s = test_event();
        assert!(!is_conversion(&k0s.tracks[0], &k0s.tracks[1], 0.05));
    }

    #[test]
    fn test_mass_windows() {
        let event = test_event();
        let (a, b) = (&event.tracks[0], &event.tracks[1]);
        assert!(in_k0s_window(a, b, 0.48, 0.515));
        assert!(!in_k0s_window(a, b, 0.492, 0.498));
        assert!(!in_lambda_window(a, b, 1.11, 1.12));
        assert!(!in_d0_window(a, b, 1.7, 2.0));
    }

    #[test]
    fn test_candidate_lookups() {
        let event = test_event();
        let daughters = event
            .tracks
            .iter()
            .map(|t| FittedDaughter::new(t, Species::Pion, t.p4(0.13957)))
            .collect();
        let sv = event.secondary_vertices().next().unwrap().id;
        let candidate =
            DecayCandidate::new(DecayKind::K0s, daughters, VertexId(0)).with_production_vertex(sv);
        let mut lists = CandidateLists::default();
        assert!(!uses_either(&lists, &event.tracks[0], &event.tracks[1]));
        lists.push_signal(candidate);
        assert!(uses_either(&lists, &event.tracks[0], &event.tracks[0]));
        assert!(uses_vertex(&lists, sv));
        assert!(!uses_vertex(&lists, VertexId(0)));
    }
}
