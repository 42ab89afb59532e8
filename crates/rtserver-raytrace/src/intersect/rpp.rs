//! Ray-box intersection with face normals.

use rtserver_math::{Aabb3, Vec3};

use super::Segment;
use crate::Ray;

/// Intersect a ray with an axis-aligned box.
pub fn intersect_rpp(ray: &Ray, aabb: &Aabb3) -> Option<Segment> {
    let mut t_in = f64::NEG_INFINITY;
    let mut t_out = f64::INFINITY;
    let mut axis_in = 0;
    let mut axis_out = 0;

    for axis in 0..3 {
        let d = ray.direction[axis];
        let o = ray.origin[axis];
        if d.abs() < 1e-300 {
            if o < aabb.min[axis] || o > aabb.max[axis] {
                return None;
            }
            continue;
        }
        let (t0, t1) = {
            let a = (aabb.min[axis] - o) / d;
            let b = (aabb.max[axis] - o) / d;
            if a <= b { (a, b) } else { (b, a) }
        };
        if t0 > t_in {
            t_in = t0;
            axis_in = axis;
        }
        if t1 < t_out {
            t_out = t1;
            axis_out = axis;
        }
        if t_in > t_out {
            return None;
        }
    }

    let mut n_in = Vec3::zeros();
    n_in[axis_in] = -ray.direction[axis_in].signum();
    let mut n_out = Vec3::zeros();
    n_out[axis_out] = ray.direction[axis_out].signum();

    Some(Segment { t_in, t_out, n_in, n_out })
}
