//! Ray-solid intersection for the built-in primitives.
//!
//! Each intersector returns the spans along the ray where the ray is inside
//! the solid, sorted by entry parameter. Spans cover the whole line; callers
//! discard what lies behind the origin.

mod rpp;
mod sphere;
mod triangle;

pub use rpp::intersect_rpp;
pub use sphere::intersect_sphere;
pub use triangle::{intersect_mesh, intersect_triangle, TriangleHit};

use rtserver_math::Vec3;

/// One interval of the ray inside a solid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    /// Entry parameter.
    pub t_in: f64,
    /// Exit parameter.
    pub t_out: f64,
    /// Outward surface normal at entry.
    pub n_in: Vec3,
    /// Outward surface normal at exit.
    pub n_out: Vec3,
}

impl Segment {
    /// Length of the interval.
    pub fn len(&self) -> f64 {
        self.t_out - self.t_in
    }

    /// Whether the interval has no extent.
    pub fn is_empty(&self) -> bool {
        self.t_out <= self.t_in
    }
}
