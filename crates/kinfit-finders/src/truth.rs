use kinfit_core::{
    candidate::DecayCandidate,
    data::{Event, McParticle, Track},
    utils::enums::{DecayKind, Species, TruthMatch},
    KinFitResult,
};

/// Compare two reconstructed legs with the generated record.
///
/// The verdict is [`TruthMatch::Indeterminate`] unless both tracks have a truth link with a
/// probability above `min_prob`. Otherwise the candidate is [`TruthMatch::True`] only if each
/// leg's particle has the expected type and both legs descend from the same mother of type
/// `parent`. A leg without a generated mother counts as [`TruthMatch::False`].
pub fn match_two_body(
    event: &Event,
    first: (&Track, Species),
    second: (&Track, Species),
    parent: DecayKind,
    min_prob: f64,
) -> TruthMatch {
    let (Some(p1), Some(p2)) = (
        event.truth_particle(first.0, min_prob),
        event.truth_particle(second.0, min_prob),
    ) else {
        return TruthMatch::Indeterminate;
    };
    if two_body_mother(event, (p1, first.1), (p2, second.1), parent).is_some() {
        TruthMatch::True
    } else {
        TruthMatch::False
    }
}

fn two_body_mother<'a>(
    event: &'a Event,
    first: (&McParticle, Species),
    second: (&McParticle, Species),
    parent: DecayKind,
) -> Option<&'a McParticle> {
    if !(first.0.is(first.1.pdg_code()) && second.0.is(second.1.pdg_code())) {
        return None;
    }
    let m1 = event.mother_of(first.0)?;
    let m2 = event.mother_of(second.0)?;
    (m1.id == m2.id && m1.is(parent.pdg_code())).then_some(m1)
}

/// Truth-match a $`D^*`$ built as (kaon, pion, soft pion): the $`K\pi`$ pair must be a true
/// $`D^0`$ whose mother is also the mother of a true soft pion, and that mother must be a
/// $`D^{*\pm}`$.
pub fn match_dstar(event: &Event, kaon: &Track, pion: &Track, soft: &Track, min_prob: f64) -> TruthMatch {
    let (Some(pk), Some(ppi), Some(ps)) = (
        event.truth_particle(kaon, min_prob),
        event.truth_particle(pion, min_prob),
        event.truth_particle(soft, min_prob),
    ) else {
        return TruthMatch::Indeterminate;
    };
    let Some(d0) = two_body_mother(event, (pk, Species::Kaon), (ppi, Species::Pion), DecayKind::D0)
    else {
        return TruthMatch::False;
    };
    let grandmother = event.mother_of(d0);
    let soft_mother = event.mother_of(ps);
    match (grandmother, soft_mother) {
        (Some(g), Some(s)) if ps.is(211) && g.id == s.id && g.is(DecayKind::Dstar.pdg_code()) => {
            TruthMatch::True
        }
        _ => TruthMatch::False,
    }
}

/// The truth verdict of a finished candidate, or [`None`] for recorded data.
pub fn match_candidate(
    event: &Event,
    candidate: &DecayCandidate,
    min_prob: f64,
) -> KinFitResult<Option<TruthMatch>> {
    if !event.is_mc() {
        return Ok(None);
    }
    let legs = candidate.daughters();
    let verdict = match (candidate.kind, legs) {
        (DecayKind::Dstar, [k, pi, soft]) => match_dstar(
            event,
            event.track(k.track)?,
            event.track(pi.track)?,
            event.track(soft.track)?,
            min_prob,
        ),
        (kind, [a, b]) => match_two_body(
            event,
            (event.track(a.track)?, a.species),
            (event.track(b.track)?, b.species),
            kind,
            min_prob,
        ),
        _ => TruthMatch::False,
    };
    Ok(Some(verdict))
}

/// The final-state legs `kind` decays into, as (PDG code, required count) pairs.
fn final_state(kind: DecayKind) -> &'static [(i32, usize)] {
    match kind {
        DecayKind::K0s => &[(211, 2)],
        DecayKind::Lambda => &[(2212, 1), (211, 1)],
        DecayKind::D0 => &[(321, 1), (211, 1)],
        DecayKind::Dstar => &[(321, 1), (211, 2)],
        DecayKind::Conversion => &[(11, 2)],
    }
}

/// Collect the charged final-state descendants of `particle`, descending through a
/// $`D^0`$ for $`D^*`$ decays.
fn charged_legs<'a>(event: &'a Event, particle: &'a McParticle, out: &mut Vec<&'a McParticle>) {
    for &id in &particle.daughters {
        if let Some(daughter) = event.mc_particle(id) {
            if daughter.is(DecayKind::D0.pdg_code()) {
                charged_legs(event, daughter, out);
            } else {
                out.push(daughter);
            }
        }
    }
}

/// The number of generated `kind` decays in the event whose final-state legs all have the
/// expected types and were all reconstructed with a truth link above `min_prob`.
pub fn count_true_decays(event: &Event, kind: DecayKind, min_prob: f64) -> u64 {
    let Some(particles) = &event.mc_particles else {
        return 0;
    };
    let expected = final_state(kind);
    let n_expected: usize = expected.iter().map(|(_, n)| n).sum();
    particles
        .iter()
        .filter(|p| p.is(kind.pdg_code()))
        .filter(|p| {
            let mut legs = Vec::new();
            charged_legs(event, p, &mut legs);
            legs.len() == n_expected
                && expected
                    .iter()
                    .all(|&(code, n)| legs.iter().filter(|l| l.is(code)).count() == n)
                && legs.iter().all(|l| {
                    event
                        .associated_track(l.id)
                        .is_some_and(|t| t.has_valid_truth_match(min_prob))
                })
        })
        .count() as u64
}
