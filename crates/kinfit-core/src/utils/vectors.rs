use std::iter::Sum;

use auto_ops::{impl_op_ex, impl_op_ex_commutative};
use nalgebra::{Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// A Cartesian three-vector, typically a momentum in GeV or a position in cm.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    /// The $`x`$-component
    pub x: f64,
    /// The $`y`$-component
    pub y: f64,
    /// The $`z`$-component
    pub z: f64,
}

impl Vec3 {
    /// Create a new [`Vec3`] from its Cartesian components.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Create a momentum vector from collider coordinates: transverse momentum $`p_T`$,
    /// pseudorapidity $`\eta`$, and azimuth $`\phi`$.
    pub fn from_pt_eta_phi(pt: f64, eta: f64, phi: f64) -> Self {
        Self::new(pt * phi.cos(), pt * phi.sin(), pt * eta.sinh())
    }

    /// Attach a mass hypothesis, giving the on-shell [`Vec4`].
    pub fn with_mass(&self, mass: f64) -> Vec4 {
        let e = f64::sqrt(mass.powi(2) + self.mag2());
        Vec4::new(self.x, self.y, self.z, e)
    }

    /// Attach an energy, giving a [`Vec4`] which need not be on shell.
    pub fn with_energy(&self, energy: f64) -> Vec4 {
        Vec4::new(self.x, self.y, self.z, energy)
    }

    pub fn dot(&self, other: &Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn mag2(&self) -> f64 {
        self.dot(self)
    }

    pub fn mag(&self) -> f64 {
        self.mag2().sqrt()
    }

    /// The magnitude of the component transverse to the $`z`$-axis.
    pub fn pt(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// The pseudorapidity $`\eta = \sinh^{-1}(p_z / p_T)`$. Vectors along the beam axis give
    /// $`\pm\infty`$ and the null vector gives zero.
    pub fn eta(&self) -> f64 {
        let pt = self.pt();
        if pt == 0.0 && self.z == 0.0 {
            return 0.0;
        }
        (self.z / pt).asinh()
    }

    pub fn phi(&self) -> f64 {
        self.y.atan2(self.x)
    }

    pub fn costheta(&self) -> f64 {
        let mag = self.mag();
        if mag == 0.0 {
            1.0
        } else {
            self.z / mag
        }
    }

    pub fn theta(&self) -> f64 {
        self.costheta().acos()
    }

    /// The unit vector in the same direction. The null vector is returned unchanged.
    pub fn unit(&self) -> Self {
        let mag = self.mag();
        if mag == 0.0 {
            *self
        } else {
            *self / mag
        }
    }

    /// The angle between two vectors in $`[0, \pi]`$, or zero if either is null.
    pub fn angle(&self, other: &Self) -> f64 {
        let norm = self.mag() * other.mag();
        if norm == 0.0 {
            return 0.0;
        }
        (self.dot(other) / norm).clamp(-1.0, 1.0).acos()
    }
}

impl_op_ex!(+ |a: &Vec3, b: &Vec3| -> Vec3 { Vec3::new(a.x + b.x, a.y + b.y, a.z + b.z) });
impl_op_ex!(-|a: &Vec3, b: &Vec3| -> Vec3 { Vec3::new(a.x - b.x, a.y - b.y, a.z - b.z) });
impl_op_ex!(-|a: &Vec3| -> Vec3 { Vec3::new(-a.x, -a.y, -a.z) });
impl_op_ex!(+= |a: &mut Vec3, b: &Vec3| { a.x += b.x; a.y += b.y; a.z += b.z; });
impl_op_ex_commutative!(*|a: &Vec3, b: &f64| -> Vec3 { Vec3::new(a.x * b, a.y * b, a.z * b) });
impl_op_ex!(/ |a: &Vec3, b: &f64| -> Vec3 { Vec3::new(a.x / b, a.y / b, a.z / b) });

impl From<Vec3> for Vector3<f64> {
    fn from(value: Vec3) -> Self {
        Vector3::new(value.x, value.y, value.z)
    }
}
impl From<Vector3<f64>> for Vec3 {
    fn from(value: Vector3<f64>) -> Self {
        Vec3::new(value[0], value[1], value[2])
    }
}
impl From<[f64; 3]> for Vec3 {
    fn from(value: [f64; 3]) -> Self {
        Vec3::new(value[0], value[1], value[2])
    }
}

impl Sum for Vec3 {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Vec3::default(), |acc, v| acc + v)
    }
}
impl<'a> Sum<&'a Vec3> for Vec3 {
    fn sum<I: Iterator<Item = &'a Vec3>>(iter: I) -> Self {
        iter.fold(Vec3::default(), |acc, v| acc + v)
    }
}

/// A four-momentum $`(p_x, p_y, p_z, E)`$ with metric signature $`(-, -, -, +)`$.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec4 {
    pub px: f64,
    pub py: f64,
    pub pz: f64,
    pub e: f64,
}

impl Vec4 {
    pub const fn new(px: f64, py: f64, pz: f64, e: f64) -> Self {
        Self { px, py, pz, e }
    }

    /// The spatial (momentum) part of the four-vector.
    pub fn vec3(&self) -> Vec3 {
        Vec3::new(self.px, self.py, self.pz)
    }

    pub fn p(&self) -> f64 {
        self.vec3().mag()
    }

    pub fn pt(&self) -> f64 {
        self.vec3().pt()
    }

    pub fn eta(&self) -> f64 {
        self.vec3().eta()
    }

    pub fn phi(&self) -> f64 {
        self.vec3().phi()
    }

    /// The squared invariant mass $`E^2 - \vec{p}^2`$.
    pub fn m2(&self) -> f64 {
        self.e.powi(2) - self.vec3().mag2()
    }

    /// The invariant mass, or zero for space-like vectors.
    pub fn m(&self) -> f64 {
        self.m2().max(0.0).sqrt()
    }

    /// The velocity $`\vec{\beta} = \vec{p}/E`$.
    pub fn beta(&self) -> Vec3 {
        self.vec3() / self.e
    }

    pub fn gamma(&self) -> f64 {
        let b = self.beta();
        1.0 / f64::sqrt(1.0 - b.mag2())
    }

    /// Boost this four-vector by the velocity `beta`:
    /// ```math
    /// \vec{p}' = \vec{p} + \vec{\beta}\left(\frac{(\gamma - 1)(\vec{p}\cdot\vec{\beta})}{\beta^2} + \gamma E\right),
    /// \quad E' = \gamma (E + \vec{\beta}\cdot\vec{p})
    /// ```
    /// Use `-p.beta()` to move into the rest frame of `p`. A null boost returns the vector
    /// unchanged.
    pub fn boost(&self, beta: &Vec3) -> Self {
        let b2 = beta.mag2();
        if b2 == 0.0 {
            return *self;
        }
        let gamma = 1.0 / f64::sqrt(1.0 - b2);
        let p3 = self.vec3();
        let bp = beta.dot(&p3);
        let p3_boosted = p3 + beta * ((gamma - 1.0) * bp / b2 + gamma * self.e);
        p3_boosted.with_energy(gamma * (self.e + bp))
    }
}

impl_op_ex!(+ |a: &Vec4, b: &Vec4| -> Vec4 { Vec4::new(a.px + b.px, a.py + b.py, a.pz + b.pz, a.e + b.e) });
impl_op_ex!(-|a: &Vec4, b: &Vec4| -> Vec4 { Vec4::new(a.px - b.px, a.py - b.py, a.pz - b.pz, a.e - b.e) });
impl_op_ex!(-|a: &Vec4| -> Vec4 { Vec4::new(-a.px, -a.py, -a.pz, -a.e) });
impl_op_ex!(+= |a: &mut Vec4, b: &Vec4| { a.px += b.px; a.py += b.py; a.pz += b.pz; a.e += b.e; });
impl_op_ex_commutative!(*|a: &Vec4, b: &f64| -> Vec4 { Vec4::new(a.px * b, a.py * b, a.pz * b, a.e * b) });

impl From<Vec4> for Vector4<f64> {
    fn from(value: Vec4) -> Self {
        Vector4::new(value.px, value.py, value.pz, value.e)
    }
}
impl From<Vector4<f64>> for Vec4 {
    fn from(value: Vector4<f64>) -> Self {
        Vec4::new(value[0], value[1], value[2], value[3])
    }
}

impl Sum for Vec4 {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Vec4::default(), |acc, v| acc + v)
    }
}
impl<'a> Sum<&'a Vec4> for Vec4 {
    fn sum<I: Iterator<Item = &'a Vec4>>(iter: I) -> Self {
        iter.fold(Vec4::default(), |acc, v| acc + v)
    }
}
