//! Displacement and angular observables shared by the decay finders.
use crate::{utils::vectors::{Vec3, Vec4}, SPEED_OF_LIGHT};

/// The displacement of the secondary vertex from the primary vertex projected onto the
/// transverse plane.
pub fn transverse_decay_length(pv: &Vec3, sv: &Vec3) -> f64 {
    (sv - pv).pt()
}

/// The full three-dimensional displacement of the secondary vertex from the primary vertex.
pub fn decay_length(pv: &Vec3, sv: &Vec3) -> f64 {
    (sv - pv).mag()
}

/// The cosine of the pointing angle, i.e. the angle between the candidate momentum `p` and the
/// flight direction from `pv` to `sv`.
pub fn cos_pointing_angle(p: &Vec3, pv: &Vec3, sv: &Vec3) -> f64 {
    p.angle(&(sv - pv)).cos()
}

/// The cosine of the decay angle $`\theta^*`$: the angle between the parent's lab-frame flight
/// direction and the daughter's momentum in the parent rest frame.
pub fn cos_decay_angle(parent: &Vec4, daughter: &Vec4) -> f64 {
    let daughter_rest = daughter.boost(&-parent.beta());
    parent.vec3().angle(&daughter_rest.vec3()).cos()
}

/// The lab-frame angle between two legs.
pub fn opening_angle(a: &Vec3, b: &Vec3) -> f64 {
    a.angle(b)
}

/// The invariant mass of a set of `(momentum, mass hypothesis)` legs.
pub fn invariant_mass(legs: &[(Vec3, f64)]) -> f64 {
    legs.iter()
        .map(|(p3, mass)| p3.with_mass(*mass))
        .sum::<Vec4>()
        .m()
}

/// The proper decay time in picoseconds, $`\tau = L m / (|\vec{p}| c)`$, with the decay length
/// $`L`$ in centimetres.
pub fn proper_lifetime(p4: &Vec4, pv: &Vec3, sv: &Vec3) -> f64 {
    let p = p4.p();
    if p == 0.0 {
        return 0.0;
    }
    decay_length(pv, sv) * p4.m() / (p * SPEED_OF_LIGHT)
}

/// The momentum of either daughter in the rest frame of a parent of mass `m0` decaying into
/// masses `m1` and `m2`, or zero below threshold.
pub fn breakup_momentum(m0: f64, m1: f64, m2: f64) -> f64 {
    let a = m0.powi(2) - (m1 + m2).powi(2);
    let b = m0.powi(2) - (m1 - m2).powi(2);
    if a <= 0.0 || m0 <= 0.0 {
        return 0.0;
    }
    f64::sqrt(a * b) / (2.0 * m0)
}

/// Decay `parent` into two daughters of masses `m1` and `m2`, with the first daughter emitted
/// along `direction` in the parent rest frame. Returns the lab-frame daughter four-momenta.
pub fn two_body_decay(parent: &Vec4, m1: f64, m2: f64, direction: &Vec3) -> (Vec4, Vec4) {
    let q = breakup_momentum(parent.m(), m1, m2);
    let axis = direction.unit();
    let d1 = (axis * q).with_mass(m1);
    let d2 = (axis * -q).with_mass(m2);
    let beta = parent.beta();
    (d1.boost(&beta), d2.boost(&beta))
}
