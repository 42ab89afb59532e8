#![warn(missing_docs)]

//! Math types for the rtserver ray-query server.
//!
//! Thin wrappers around nalgebra providing the geometry types shared by the
//! record database, the ray clipper and the session pipeline: points,
//! vectors, paired forward/inverse transforms, axis-aligned boxes and
//! tolerance constants.

use nalgebra::{Matrix3, Matrix4, Unit, Vector3, Vector4};

mod bbox;

pub use bbox::Aabb3;

/// A point in 3D space.
pub type Point3 = nalgebra::Point3<f64>;

/// A vector in 3D space.
pub type Vec3 = Vector3<f64>;

/// A unit (normalized) direction vector in 3D space.
pub type Dir3 = Unit<Vector3<f64>>;

/// Square root of the smallest positive double worth distinguishing from zero.
///
/// Direction components with magnitude below this are treated as parallel
/// to an axis.
pub const SQRT_SMALL: f64 = 1.0e-39;

/// A forward matrix together with its exact inverse.
///
/// Only constructible through [`Transform`] so the pairing cannot drift.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixPair {
    forward: Matrix4<f64>,
    inverse: Matrix4<f64>,
}

impl MatrixPair {
    /// The forward (model to world) matrix.
    pub fn forward(&self) -> &Matrix4<f64> {
        &self.forward
    }

    /// The inverse (world to model) matrix.
    pub fn inverse(&self) -> &Matrix4<f64> {
        &self.inverse
    }
}

/// A rigid or affine 4x4 transformation.
///
/// `Identity` stands in for the absent matrix; `Matrix` always carries the
/// inverse of its forward matrix.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Transform {
    /// No transformation.
    #[default]
    Identity,
    /// A forward matrix and its inverse.
    Matrix(MatrixPair),
}

impl Transform {
    /// Identity transform.
    pub fn identity() -> Self {
        Self::Identity
    }

    /// Build a transform from a forward matrix, computing its inverse.
    ///
    /// Returns `None` for a singular matrix.
    pub fn from_matrix(forward: Matrix4<f64>) -> Option<Self> {
        let inverse = forward.try_inverse()?;
        Some(Self::Matrix(MatrixPair { forward, inverse }))
    }

    fn from_pair(forward: Matrix4<f64>, inverse: Matrix4<f64>) -> Self {
        Self::Matrix(MatrixPair { forward, inverse })
    }

    /// Translation by `(dx, dy, dz)`.
    pub fn translation(dx: f64, dy: f64, dz: f64) -> Self {
        let mut m = Matrix4::identity();
        m[(0, 3)] = dx;
        m[(1, 3)] = dy;
        m[(2, 3)] = dz;
        let mut inv = Matrix4::identity();
        inv[(0, 3)] = -dx;
        inv[(1, 3)] = -dy;
        inv[(2, 3)] = -dz;
        Self::from_pair(m, inv)
    }

    /// Translation by a vector.
    pub fn translation_vec(v: &Vec3) -> Self {
        Self::translation(v.x, v.y, v.z)
    }

    /// Rotation about the X axis by `angle` radians.
    pub fn rotation_x(angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        let mut m = Matrix4::identity();
        m[(1, 1)] = c;
        m[(1, 2)] = -s;
        m[(2, 1)] = s;
        m[(2, 2)] = c;
        Self::rotation(m)
    }

    /// Rotation about the Y axis by `angle` radians.
    pub fn rotation_y(angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        let mut m = Matrix4::identity();
        m[(0, 0)] = c;
        m[(0, 2)] = s;
        m[(2, 0)] = -s;
        m[(2, 2)] = c;
        Self::rotation(m)
    }

    /// Rotation about the Z axis by `angle` radians.
    pub fn rotation_z(angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        let mut m = Matrix4::identity();
        m[(0, 0)] = c;
        m[(0, 1)] = -s;
        m[(1, 0)] = s;
        m[(1, 1)] = c;
        Self::rotation(m)
    }

    // Pure rotations are orthonormal: the inverse is the transpose.
    fn rotation(m: Matrix4<f64>) -> Self {
        Self::from_pair(m, m.transpose())
    }

    /// Compose: `self` then `other` (self * other).
    ///
    /// Applying the result to a point applies `other` first, then `self`.
    pub fn then(&self, other: &Transform) -> Self {
        match (self, other) {
            (Self::Identity, t) | (t, Self::Identity) => t.clone(),
            (Self::Matrix(a), Self::Matrix(b)) => {
                Self::from_pair(a.forward * b.forward, b.inverse * a.inverse)
            }
        }
    }

    /// The inverse transform.
    pub fn inverse(&self) -> Self {
        match self {
            Self::Identity => Self::Identity,
            Self::Matrix(p) => Self::from_pair(p.inverse, p.forward),
        }
    }

    /// Whether this is the identity variant.
    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Forward matrix (identity matrix for [`Transform::Identity`]).
    pub fn forward_matrix(&self) -> Matrix4<f64> {
        match self {
            Self::Identity => Matrix4::identity(),
            Self::Matrix(p) => p.forward,
        }
    }

    /// Inverse matrix (identity matrix for [`Transform::Identity`]).
    pub fn inverse_matrix(&self) -> Matrix4<f64> {
        match self {
            Self::Identity => Matrix4::identity(),
            Self::Matrix(p) => p.inverse,
        }
    }

    /// Transform a point by the forward matrix.
    pub fn apply_point(&self, p: &Point3) -> Point3 {
        match self {
            Self::Identity => *p,
            Self::Matrix(pair) => mul_point(&pair.forward, p),
        }
    }

    /// Transform a direction vector by the forward matrix (ignores translation).
    pub fn apply_vec(&self, v: &Vec3) -> Vec3 {
        match self {
            Self::Identity => *v,
            Self::Matrix(pair) => mul_vec(&pair.forward, v),
        }
    }

    /// Transform a point by the inverse matrix.
    pub fn inverse_point(&self, p: &Point3) -> Point3 {
        match self {
            Self::Identity => *p,
            Self::Matrix(pair) => mul_point(&pair.inverse, p),
        }
    }

    /// Transform a direction vector by the inverse matrix.
    pub fn inverse_vec(&self, v: &Vec3) -> Vec3 {
        match self {
            Self::Identity => *v,
            Self::Matrix(pair) => mul_vec(&pair.inverse, v),
        }
    }

    /// Transform a normal vector (inverse transpose of the upper-left 3x3).
    pub fn apply_normal(&self, n: &Vec3) -> Vec3 {
        match self {
            Self::Identity => *n,
            Self::Matrix(pair) => {
                let inv: Matrix3<f64> = pair.inverse.fixed_view::<3, 3>(0, 0).into_owned();
                inv.transpose() * n
            }
        }
    }
}

fn mul_point(m: &Matrix4<f64>, p: &Point3) -> Point3 {
    let v = m * Vector4::new(p.x, p.y, p.z, 1.0);
    Point3::new(v.x, v.y, v.z)
}

fn mul_vec(m: &Matrix4<f64>, v: &Vec3) -> Vec3 {
    let r = m * Vector4::new(v.x, v.y, v.z, 0.0);
    Vec3::new(r.x, r.y, r.z)
}

/// Tolerance constants for geometric comparisons.
#[derive(Debug, Clone, Copy)]
pub struct Tolerance {
    /// Linear distance tolerance in mm.
    pub linear: f64,
    /// Angular tolerance in radians.
    pub angular: f64,
}

impl Tolerance {
    /// Default tolerances (5e-4 mm linear, 1e-9 rad angular).
    pub const DEFAULT: Self = Self {
        linear: 5e-4,
        angular: 1e-9,
    };

    /// Check if two points are coincident within tolerance.
    pub fn points_equal(&self, a: &Point3, b: &Point3) -> bool {
        (a - b).norm() < self.linear
    }

    /// Check if a scalar distance is effectively zero.
    pub fn is_zero(&self, d: f64) -> bool {
        d.abs() < self.linear
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::DEFAULT
    }
}
