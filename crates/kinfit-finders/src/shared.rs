use kinfit_core::candidate::DecayCandidate;

/// Flag every pair of candidates which have at least one leg track in common.
///
/// Flags are only ever raised, so running this twice on the same list changes nothing.
/// Consumers must skip flagged candidates to avoid counting one track in several candidates.
pub fn find_shared_tracks(candidates: &mut [DecayCandidate]) {
    let n = candidates.len();
    for i in 0..n {
        for j in (i + 1)..n {
            if candidates[i].shares_track_with(&candidates[j]) {
                candidates[i].shared_tracks = true;
                candidates[j].shared_tracks = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use kinfit_core::{
        candidate::FittedDaughter,
        data::{EventBuilder, TrackId, VertexId},
        utils::{
            enums::{DecayKind, Species},
            vectors::Vec3,
        },
    };

    use super::*;

    #[test]
    fn test_shared_track_conflict() {
        let mut builder = EventBuilder::new(1, 1);
        let ids: Vec<TrackId> = (0..5)
            .map(|i| builder.add_track(Vec3::new(1.0 + i as f64, 0.5, 0.2), if i % 2 == 0 { 1 } else { -1 }))
            .collect();
        let event = builder.build().unwrap();
        let pair = |a: usize, b: usize| {
            DecayCandidate::new(
                DecayKind::K0s,
                vec![
                    FittedDaughter::new(&event.tracks[ids[a].index()], Species::Pion, event.tracks[a].p4(0.13957)),
                    FittedDaughter::new(&event.tracks[ids[b].index()], Species::Pion, event.tracks[b].p4(0.13957)),
                ],
                VertexId(0),
            )
        };
        // (A, B), (B, C) and (D, E)
        let mut candidates = vec![pair(0, 1), pair(1, 2), pair(3, 4)];
        find_shared_tracks(&mut candidates);
        assert!(candidates[0].shared_tracks);
        assert!(candidates[1].shared_tracks);
        assert!(!candidates[2].shared_tracks);
        let once = candidates.clone();
        find_shared_tracks(&mut candidates);
        assert_eq!(candidates, once);
        for (i, a) in candidates.iter().enumerate() {
            for b in candidates.iter().skip(i + 1) {
                if !a.shared_tracks && !b.shared_tracks {
                    assert!(!a.shares_track_with(b));
                }
            }
        }
    }

    #[test]
    fn test_empty_and_single() {
        let mut none: Vec<DecayCandidate> = Vec::new();
        find_shared_tracks(&mut none);
        assert!(none.is_empty());
    }
}
