use std::fmt::Debug;

use dyn_clone::DynClone;
use nalgebra::{DMatrix, DVector, Matrix3, Matrix4x3, RowVector3, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::{
    data::Track,
    utils::{enums::FitStatus, vectors::{Vec3, Vec4}},
    KinFitError, KinFitResult,
};

/// Chi-square values in $`[-\epsilon, 0)`$ are rounding noise of an exact zero and are reported
/// as zero. Anything below is fatal.
const CHI2_ROUNDING: f64 = 1e-9;

/// A particle entering a kinematic fit, parameterized by its measured
/// $`y = (p_T, \eta, \phi)`$ with a fixed mass hypothesis:
/// ```math
/// p_x = p_T\cos\phi,\quad p_y = p_T\sin\phi,\quad p_z = p_T\sinh\eta,\quad E = \sqrt{p_T^2\cosh^2\eta + m^2}
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct FitParticle {
    measured: Vector3<f64>,
    mass: f64,
    covariance: Matrix3<f64>,
}

impl FitParticle {
    /// Construct a [`FitParticle`] from a momentum, a mass hypothesis, and the covariance of the
    /// $`(p_T, \eta, \phi)`$ measurement.
    pub fn new(p3: &Vec3, mass: f64, covariance: Matrix3<f64>) -> Self {
        Self {
            measured: Vector3::new(p3.pt(), p3.eta(), p3.phi()),
            mass,
            covariance,
        }
    }

    /// A fit particle measured by `track` under the given mass hypothesis.
    pub fn from_track(track: &Track, mass: f64) -> Self {
        Self::new(&track.p3, mass, track.covariance)
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    /// The four-momentum at the measured parameters.
    pub fn measured_p4(&self) -> Vec4 {
        Self::p4_at(&self.measured, self.mass)
    }

    fn p4_at(y: &Vector3<f64>, mass: f64) -> Vec4 {
        Vec3::from_pt_eta_phi(y[0], y[1], y[2]).with_mass(mass)
    }

    /// $`\partial(p_x, p_y, p_z, E)/\partial(p_T, \eta, \phi)`$ at `y`.
    fn jacobian_at(y: &Vector3<f64>, mass: f64) -> Matrix4x3<f64> {
        let (pt, eta, phi) = (y[0], y[1], y[2]);
        let (sin_phi, cos_phi) = phi.sin_cos();
        let (sinh_eta, cosh_eta) = (eta.sinh(), eta.cosh());
        let e = f64::sqrt((pt * cosh_eta).powi(2) + mass.powi(2));
        #[rustfmt::skip]
        let jacobian = Matrix4x3::new(
            cos_phi,                   0.0,                                  -pt * sin_phi,
            sin_phi,                   0.0,                                  pt * cos_phi,
            sinh_eta,                  pt * cosh_eta,                        0.0,
            pt * cosh_eta.powi(2) / e, pt.powi(2) * cosh_eta * sinh_eta / e, 0.0,
        );
        jacobian
    }
}

/// A scalar equality $`f(p_1, \ldots, p_n) = 0`$ on the four-momenta of the fitted particles.
pub trait Constraint: DynClone + Debug + Send + Sync {
    /// A short label used in log messages.
    fn name(&self) -> &str;
    /// The constraint residual $`f`$.
    fn value(&self, p4s: &[Vec4]) -> f64;
    /// $`\partial f / \partial p_i`$ for every particle, in $`(p_x, p_y, p_z, E)`$ order.
    /// Particles the constraint does not involve get a zero gradient.
    fn gradient(&self, p4s: &[Vec4]) -> Vec<Vector4<f64>>;
}

dyn_clone::clone_trait_object!(Constraint);

/// Fixes the invariant mass of a subset of the fitted particles:
/// ```math
/// f = \sqrt{\left(\sum_i p_i\right)^2} - M_0
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct MassConstraint {
    name: String,
    particles: Vec<usize>,
    mass: f64,
}

impl MassConstraint {
    /// Constrain the invariant mass of the particles at indices `particles` (as returned by
    /// [`KinFitter::add_particle`]) to `mass`.
    pub fn new(name: &str, particles: &[usize], mass: f64) -> Box<Self> {
        Self {
            name: name.to_string(),
            particles: particles.to_vec(),
            mass,
        }
        .into()
    }

    fn total(&self, p4s: &[Vec4]) -> Vec4 {
        self.particles.iter().filter_map(|&i| p4s.get(i)).sum()
    }
}

impl Constraint for MassConstraint {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self, p4s: &[Vec4]) -> f64 {
        self.total(p4s).m() - self.mass
    }

    fn gradient(&self, p4s: &[Vec4]) -> Vec<Vector4<f64>> {
        let total = self.total(p4s);
        let m = total.m();
        let mut gradient = vec![Vector4::zeros(); p4s.len()];
        if m <= 0.0 {
            return gradient;
        }
        let dm = Vector4::new(-total.px, -total.py, -total.pz, total.e) / m;
        for &i in &self.particles {
            if let Some(g) = gradient.get_mut(i) {
                *g = dm;
            }
        }
        gradient
    }
}

/// Iteration control for [`KinFitter`].
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitSettings {
    /// The hard cap on Gauss-Newton iterations.
    pub max_iterations: usize,
    /// Convergence requires the chi-square to change by less than this between iterations.
    pub max_delta_s: f64,
    /// Convergence requires $`\sum_c |f_c|`$ below this.
    pub max_f: f64,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_delta_s: 5e-5,
            max_f: 1e-4,
        }
    }
}

impl FitSettings {
    pub fn with_max_f(max_f: f64) -> Self {
        Self {
            max_f,
            ..Default::default()
        }
    }
}

/// The outcome of [`KinFitter::fit`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub status: FitStatus,
    /// $`S = \Delta y^T V^{-1} \Delta y`$ at the last accepted step.
    pub chi2: f64,
    /// The number of constraints.
    pub ndof: usize,
    pub iterations: usize,
    /// $`\sum_c |f_c|`$ at the last accepted step.
    pub constraint_residual: f64,
    /// The refitted four-momenta, in the order the particles were added.
    pub p4s: Vec<Vec4>,
}

impl FitResult {
    pub fn converged(&self) -> bool {
        self.status.is_converged()
    }

    pub fn chi2_over_ndof(&self) -> f64 {
        if self.ndof == 0 {
            return f64::INFINITY;
        }
        self.chi2 / self.ndof as f64
    }

    /// The chi-square survival probability $`1 - F_{\chi^2}(S; n)`$ (the fit p-value).
    pub fn probability(&self) -> f64 {
        probability(self.chi2, self.ndof)
    }
}

/// The chi-square survival probability of `chi2` at `ndof` degrees of freedom, or zero if the
/// distribution is undefined.
pub fn probability(chi2: f64, ndof: usize) -> f64 {
    match ChiSquared::new(ndof as f64) {
        Ok(dist) => dist.sf(chi2),
        Err(_) => 0.0,
    }
}

/// A constrained least-squares fitter using Lagrange multipliers.
///
/// Every iteration linearizes the constraints $`f`$ around the current estimate $`y_k`$ with
/// $`B = \partial f / \partial y`$ and solves
/// ```math
/// r = f(y_k) + B (y_0 - y_k),\quad \lambda = (B V B^T)^{-1} r,\quad y_{k+1} = y_0 - V B^T \lambda
/// ```
/// where $`y_0`$ are the measured parameters and $`V`$ their (block diagonal) covariance. The
/// fit converges once $`|S_{k+1} - S_k|`$ falls below `max_delta_s` and $`\sum |f|`$ below
/// `max_f`.
#[derive(Clone, Debug)]
pub struct KinFitter {
    name: String,
    particles: Vec<FitParticle>,
    constraints: Vec<Box<dyn Constraint>>,
    settings: FitSettings,
}

impl KinFitter {
    pub fn new(name: &str, settings: FitSettings) -> Self {
        Self {
            name: name.to_string(),
            particles: Vec::new(),
            constraints: Vec::new(),
            settings,
        }
    }

    /// Add a particle and return its index for use in constraints.
    pub fn add_particle(&mut self, particle: FitParticle) -> usize {
        self.particles.push(particle);
        self.particles.len() - 1
    }

    pub fn add_constraint(&mut self, constraint: Box<dyn Constraint>) {
        self.constraints.push(constraint);
    }

    pub fn ndof(&self) -> usize {
        self.constraints.len()
    }

    fn p4s_at(&self, y: &DVector<f64>) -> Vec<Vec4> {
        self.particles
            .iter()
            .enumerate()
            .map(|(i, p)| FitParticle::p4_at(&y.fixed_rows::<3>(3 * i).into_owned(), p.mass))
            .collect()
    }

    fn residual(&self, p4s: &[Vec4]) -> f64 {
        self.constraints.iter().map(|c| c.value(p4s).abs()).sum()
    }

    fn result(&self, status: FitStatus, chi2: f64, iterations: usize, y: &DVector<f64>) -> FitResult {
        let p4s = self.p4s_at(y);
        FitResult {
            status,
            chi2,
            ndof: self.ndof(),
            iterations,
            constraint_residual: self.residual(&p4s),
            p4s,
        }
    }

    /// Run the fit.
    ///
    /// Non-convergence and numerical breakdown (singular matrices, non-finite parameters) are
    /// reported through [`FitResult::status`]. A negative chi-square means the covariance is not
    /// positive definite and is returned as [`KinFitError::NegativeChi2`].
    pub fn fit(&self) -> KinFitResult<FitResult> {
        let n = 3 * self.particles.len();
        let k = self.constraints.len();
        let mut y0 = DVector::zeros(n);
        let mut v = DMatrix::zeros(n, n);
        let mut v_inv = DMatrix::zeros(n, n);
        for (i, particle) in self.particles.iter().enumerate() {
            y0.fixed_rows_mut::<3>(3 * i).copy_from(&particle.measured);
            v.fixed_view_mut::<3, 3>(3 * i, 3 * i)
                .copy_from(&particle.covariance);
            match particle.covariance.try_inverse() {
                Some(inv) => v_inv.fixed_view_mut::<3, 3>(3 * i, 3 * i).copy_from(&inv),
                None => {
                    tracing::trace!(fit = %self.name, particle = i, "singular covariance");
                    return Ok(self.result(FitStatus::Aborted, 0.0, 0, &y0));
                }
            }
        }
        let mut y = y0.clone();
        let mut s_prev = 0.0;
        for iteration in 1..=self.settings.max_iterations {
            let p4s = self.p4s_at(&y);
            let jacobians: Vec<Matrix4x3<f64>> = self
                .particles
                .iter()
                .enumerate()
                .map(|(i, p)| FitParticle::jacobian_at(&y.fixed_rows::<3>(3 * i).into_owned(), p.mass))
                .collect();
            let mut b = DMatrix::zeros(k, n);
            let mut f = DVector::zeros(k);
            for (c, constraint) in self.constraints.iter().enumerate() {
                f[c] = constraint.value(&p4s);
                let gradient = constraint.gradient(&p4s);
                // gradient blocks beyond the fitted particles are ignored
                for (i, (grad, jacobian)) in gradient.iter().zip(&jacobians).enumerate() {
                    let row: RowVector3<f64> = grad.transpose() * jacobian;
                    b.fixed_view_mut::<1, 3>(c, 3 * i).copy_from(&row);
                }
            }
            let r = &f + &b * (&y0 - &y);
            let c_matrix = &b * &v * b.transpose();
            let Some(c_inv) = c_matrix.try_inverse() else {
                tracing::trace!(fit = %self.name, iteration, "singular constraint matrix");
                return Ok(self.result(FitStatus::Aborted, s_prev, iteration, &y));
            };
            let lambda = c_inv * r;
            let y_next = &y0 - &v * b.transpose() * lambda;
            if y_next.iter().any(|x| !x.is_finite()) {
                tracing::trace!(fit = %self.name, iteration, "non-finite parameters");
                return Ok(self.result(FitStatus::Aborted, s_prev, iteration, &y));
            }
            let delta = &y_next - &y0;
            let mut s = (delta.transpose() * &v_inv * &delta)[(0, 0)];
            if s < 0.0 {
                if s < -CHI2_ROUNDING {
                    return Err(KinFitError::NegativeChi2 {
                        fit: self.name.clone(),
                        chi2: s,
                    });
                }
                s = 0.0;
            }
            y = y_next;
            let residual = self.residual(&self.p4s_at(&y));
            tracing::trace!(fit = %self.name, iteration, chi2 = s, residual, "fit step");
            if (s - s_prev).abs() < self.settings.max_delta_s && residual < self.settings.max_f {
                return Ok(self.result(FitStatus::Converged, s, iteration, &y));
            }
            s_prev = s;
        }
        Ok(self.result(
            FitStatus::NotConverged,
            s_prev,
            self.settings.max_iterations,
            &y,
        ))
    }
}
