//! Ray representations.

use rtserver_math::{Aabb3, Point3, Transform, Vec3};
use serde::{Deserialize, Serialize};

/// A ray as submitted by clients: a start point and a direction.
///
/// The direction is expected to be unit length; distances reported for the
/// ray are measured in multiples of it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct XRay {
    /// Start point.
    pub point: Point3,
    /// Direction of travel.
    pub direction: Vec3,
}

impl XRay {
    /// Create a ray, normalizing the direction.
    pub fn new(point: Point3, direction: Vec3) -> Self {
        Self {
            point,
            direction: direction.normalize(),
        }
    }

    /// Point at distance `t` along the ray.
    #[inline]
    pub fn at(&self, t: f64) -> Point3 {
        self.point + t * self.direction
    }

    /// Move the ray from world space into the model space of `xform`.
    pub fn to_model_space(&self, xform: &Transform) -> Self {
        if xform.is_identity() {
            return *self;
        }
        Self {
            point: xform.inverse_point(&self.point),
            direction: xform.inverse_vec(&self.direction),
        }
    }
}

/// A ray prepared for traversal, with reciprocal direction cached for slab
/// tests.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    /// Origin point of the ray.
    pub origin: Point3,
    /// Direction of the ray.
    pub direction: Vec3,
    inv_direction: Vec3,
    sign: [usize; 3],
}

impl Ray {
    /// Build a traversal ray from a client ray.
    pub fn new(origin: Point3, direction: Vec3) -> Self {
        let inv = Vec3::new(1.0 / direction.x, 1.0 / direction.y, 1.0 / direction.z);
        let sign = [
            usize::from(inv.x < 0.0),
            usize::from(inv.y < 0.0),
            usize::from(inv.z < 0.0),
        ];
        Self {
            origin,
            direction,
            inv_direction: inv,
            sign,
        }
    }

    /// Evaluate the ray at parameter `t`.
    #[inline]
    pub fn at(&self, t: f64) -> Point3 {
        self.origin + t * self.direction
    }

    /// Slab test against a box over the whole line.
    ///
    /// Returns the entry and exit parameters, which may be negative when the
    /// box lies partly or wholly behind the origin.
    #[inline]
    pub fn slab(&self, aabb: &Aabb3) -> Option<(f64, f64)> {
        let bounds = [aabb.min, aabb.max];

        let mut t_min = (bounds[self.sign[0]].x - self.origin.x) * self.inv_direction.x;
        let mut t_max = (bounds[1 - self.sign[0]].x - self.origin.x) * self.inv_direction.x;

        let ty1 = (bounds[self.sign[1]].y - self.origin.y) * self.inv_direction.y;
        let ty2 = (bounds[1 - self.sign[1]].y - self.origin.y) * self.inv_direction.y;
        t_min = t_min.max(ty1);
        t_max = t_max.min(ty2);

        let tz1 = (bounds[self.sign[2]].z - self.origin.z) * self.inv_direction.z;
        let tz2 = (bounds[1 - self.sign[2]].z - self.origin.z) * self.inv_direction.z;
        t_min = t_min.max(tz1);
        t_max = t_max.min(tz2);

        (t_max >= t_min).then_some((t_min, t_max))
    }

    /// Slab test restricted to the forward half of the ray.
    #[inline]
    pub fn intersect_aabb(&self, aabb: &Aabb3) -> Option<(f64, f64)> {
        match self.slab(aabb) {
            Some((t_min, t_max)) if t_max >= 0.0 => Some((t_min.max(0.0), t_max)),
            _ => None,
        }
    }
}

impl From<&XRay> for Ray {
    fn from(x: &XRay) -> Self {
        Ray::new(x.point, x.direction)
    }
}
