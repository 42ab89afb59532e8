//! Ray-triangle intersection (Möller–Trumbore) and closed-mesh spans.

use rtserver_math::{Point3, Vec3};

use super::Segment;
use crate::Ray;

const EPSILON: f64 = 1e-12;

/// A hit against one facet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    /// Parameter along the ray.
    pub t: f64,
    /// Unit geometric normal, following the vertex winding.
    pub normal: Vec3,
}

/// Intersect a ray with one triangle over the whole line.
pub fn intersect_triangle(ray: &Ray, tri: &[Point3; 3]) -> Option<TriangleHit> {
    let e1 = tri[1] - tri[0];
    let e2 = tri[2] - tri[0];
    let p = ray.direction.cross(&e2);
    let det = e1.dot(&p);
    if det.abs() < EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = ray.origin - tri[0];
    let u = s.dot(&p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(&e1);
    let v = ray.direction.dot(&q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(&q) * inv_det;
    let normal = e1.cross(&e2).try_normalize(0.0)?;
    Some(TriangleHit { t, normal })
}

/// Intersect a ray with a closed triangle mesh.
///
/// Facet hits are sorted along the ray and paired in order, each pair being
/// one pass through the interior. A trailing unpaired hit is dropped.
pub fn intersect_mesh(ray: &Ray, triangles: &[[Point3; 3]]) -> Vec<Segment> {
    let mut hits: Vec<TriangleHit> = triangles
        .iter()
        .filter_map(|tri| intersect_triangle(ray, tri))
        .collect();
    hits.sort_by(|a, b| a.t.total_cmp(&b.t));
    // Shared edges report the same crossing twice.
    hits.dedup_by(|b, a| (b.t - a.t).abs() < 1e-9);

    let d = ray.direction;
    hits.chunks_exact(2)
        .map(|pair| {
            let outward = |n: Vec3, entering: bool| {
                let facing = n.dot(&d) < 0.0;
                if facing == entering { n } else { -n }
            };
            Segment {
                t_in: pair[0].t,
                t_out: pair[1].t,
                n_in: outward(pair[0].normal, true),
                n_out: outward(pair[1].normal, false),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tetrahedron() -> Vec<[Point3; 3]> {
        let p = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(4.0, 0.0, 0.0),
            Point3::new(0.0, 4.0, 0.0),
            Point3::new(0.0, 0.0, 4.0),
        ];
        vec![
            [p[0], p[2], p[1]],
            [p[0], p[1], p[3]],
            [p[0], p[3], p[2]],
            [p[1], p[2], p[3]],
        ]
    }

    #[test]
    fn test_triangle_hit() {
        let tri = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let ray = Ray::new(Point3::new(0.2, 0.2, 5.0), Vec3::new(0.0, 0.0, -1.0));
        let hit = intersect_triangle(&ray, &tri).unwrap();
        assert_relative_eq!(hit.t, 5.0, epsilon = 1e-12);
        assert_relative_eq!(hit.normal, Vec3::new(0.0, 0.0, 1.0), epsilon = 1e-12);
    }

    #[test]
    fn test_triangle_miss() {
        let tri = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let ray = Ray::new(Point3::new(0.9, 0.9, 5.0), Vec3::new(0.0, 0.0, -1.0));
        assert!(intersect_triangle(&ray, &tri).is_none());
    }

    #[test]
    fn test_mesh_span() {
        let ray = Ray::new(Point3::new(0.5, 0.5, -3.0), Vec3::new(0.0, 0.0, 1.0));
        let segs = intersect_mesh(&ray, &tetrahedron());
        assert_eq!(segs.len(), 1);
        assert_relative_eq!(segs[0].t_in, 3.0, epsilon = 1e-9);
        assert_relative_eq!(segs[0].t_out, 6.0, epsilon = 1e-9);
        assert!(segs[0].n_in.z < 0.0);
        assert!(segs[0].n_out.dot(&ray.direction) > 0.0);
    }
}
