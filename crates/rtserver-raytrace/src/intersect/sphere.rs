//! Ray-sphere intersection (quadratic equation).

use rtserver_math::Point3;

use super::Segment;
use crate::Ray;

/// Intersect a ray with a sphere.
///
/// A tangent ray yields no segment.
pub fn intersect_sphere(ray: &Ray, center: &Point3, radius: f64) -> Option<Segment> {
    let oc = ray.origin - center;
    let d = &ray.direction;

    // |oc + t*d|^2 = r^2
    let a = d.dot(d);
    let b = 2.0 * oc.dot(d);
    let c = oc.dot(&oc) - radius * radius;

    let discriminant = b * b - 4.0 * a * c;
    if discriminant <= 0.0 || a == 0.0 {
        return None;
    }

    let sqrt_disc = discriminant.sqrt();
    let t_in = (-b - sqrt_disc) / (2.0 * a);
    let t_out = (-b + sqrt_disc) / (2.0 * a);

    Some(Segment {
        t_in,
        t_out,
        n_in: (ray.at(t_in) - center) / radius,
        n_out: (ray.at(t_out) - center) / radius,
    })
}
