use kinfit_core::{
    candidate::{DecayCandidate, FittedDaughter},
    data::{EventBuilder, VertexId},
    fit::{FitParticle, FitSettings, KinFitter, MassConstraint},
    utils::{
        enums::{DecayKind, Species},
        variables::two_body_decay,
        vectors::{Vec3, Vec4},
    },
};
use nalgebra::{Matrix3, Vector3};
use proptest::prelude::*;

const M_PI: f64 = 0.13957;
const M_K: f64 = 0.493667;
const M_D0: f64 = 1.86484;

fn covariance(pt: f64) -> Matrix3<f64> {
    Matrix3::from_diagonal(&Vector3::new((0.01 * pt).powi(2), 1e-6, 1e-6))
}

fn smeared(p4: &Vec4, scale: f64, dphi: f64) -> Vec3 {
    Vec3::from_pt_eta_phi(p4.pt() * scale, p4.eta(), p4.phi() + dphi)
}

fn d0_fit(
    pt: f64,
    eta: f64,
    phi: f64,
    direction: (f64, f64, f64),
    smear: (f64, f64),
    dphi: f64,
) -> (KinFitter, [Vec3; 2]) {
    let parent = Vec3::from_pt_eta_phi(pt, eta, phi).with_mass(M_D0);
    let (kaon, pion) = two_body_decay(
        &parent,
        M_K,
        M_PI,
        &Vec3::new(direction.0, direction.1, direction.2),
    );
    let legs = [smeared(&kaon, smear.0, dphi), smeared(&pion, smear.1, -dphi)];
    let mut fitter = KinFitter::new("D0", FitSettings::with_max_f(1e-4));
    let k = fitter.add_particle(FitParticle::new(&legs[0], M_K, covariance(kaon.pt())));
    let p = fitter.add_particle(FitParticle::new(&legs[1], M_PI, covariance(pion.pt())));
    fitter.add_constraint(MassConstraint::new("m(D0)", &[k, p], M_D0));
    (fitter, legs)
}

proptest! {
    #[test]
    fn chi2_is_never_negative(
        pt in 0.5f64..20.0,
        eta in -2.5f64..2.5,
        phi in -3.1f64..3.1,
        dx in -1.0f64..1.0,
        dy in -1.0f64..1.0,
        dz in 0.1f64..1.0,
        s1 in 0.97f64..1.03,
        s2 in 0.97f64..1.03,
        dphi in -0.002f64..0.002,
    ) {
        let (fitter, _) = d0_fit(pt, eta, phi, (dx, dy, dz), (s1, s2), dphi);
        let result = fitter.fit().unwrap();
        prop_assert!(result.chi2 >= 0.0);
        prop_assert_eq!(result.ndof, 1);
        let p = result.probability();
        prop_assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn converged_fits_satisfy_the_constraint(
        pt in 1.0f64..10.0,
        eta in -2.0f64..2.0,
        phi in -3.1f64..3.1,
        dx in -1.0f64..1.0,
        dy in -1.0f64..1.0,
        dz in 0.1f64..1.0,
        s1 in 0.99f64..1.01,
        s2 in 0.99f64..1.01,
    ) {
        let (fitter, _) = d0_fit(pt, eta, phi, (dx, dy, dz), (s1, s2), 0.0);
        let result = fitter.fit().unwrap();
        if result.converged() {
            let m = (result.p4s[0] + result.p4s[1]).m();
            prop_assert!((m - M_D0).abs() < 1e-4);
            prop_assert!(result.constraint_residual < 1e-4);
        }
    }

    #[test]
    fn candidates_conserve_momentum(
        pt in 0.5f64..10.0,
        eta in -2.5f64..2.5,
        phi in -3.1f64..3.1,
        dx in -1.0f64..1.0,
        dy in -1.0f64..1.0,
        dz in 0.1f64..1.0,
        s1 in 0.98f64..1.02,
        s2 in 0.98f64..1.02,
    ) {
        let (fitter, legs) = d0_fit(pt, eta, phi, (dx, dy, dz), (s1, s2), 0.0);
        let result = fitter.fit().unwrap();
        let mut builder = EventBuilder::new(1, 1);
        let pv = builder.add_primary_vertex(Vec3::default());
        let k = builder.add_track(legs[0], -1);
        let p = builder.add_track(legs[1], 1);
        let event = builder.build().unwrap();
        let candidate = DecayCandidate::new(
            DecayKind::D0,
            vec![
                FittedDaughter::new(event.track(k).unwrap(), Species::Kaon, result.p4s[0]),
                FittedDaughter::new(event.track(p).unwrap(), Species::Pion, result.p4s[1]),
            ],
            pv,
        )
        .with_fit(result.chi2, result.ndof);
        let total = result.p4s[0] + result.p4s[1];
        let p4 = candidate.p4();
        for (a, b) in [(p4.px, total.px), (p4.py, total.py), (p4.pz, total.pz), (p4.e, total.e)] {
            prop_assert!((a - b).abs() <= 1e-12 * (1.0 + b.abs()));
        }
        prop_assert_eq!(candidate.primary_vertex, VertexId(0));
    }
}
