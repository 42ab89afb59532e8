//! Ray–volume clipping.
//!
//! Reduces the segment `a → b` to its overlap with an axis-aligned box, or
//! reports a miss. Used as a cheap reject before any engine call. The
//! function is total: NaN and infinite inputs are not sanitized and simply
//! propagate through the comparisons.

use rtserver_math::{Aabb3, Point3, SQRT_SMALL};

/// Clip the segment `a → b` against `bounds` in place.
///
/// Returns `false` on a miss, leaving `a` and `b` untouched. On a hit the
/// endpoints are replaced by the clipped segment, or left alone when the
/// whole segment already lies inside.
pub fn clip_in_place(a: &mut Point3, b: &mut Point3, bounds: &Aabb3) -> bool {
    let dir = *b - *a;
    let mut mindist = -f64::MAX;
    let mut maxdist = f64::MAX;

    for i in 0..3 {
        let d = dir[i];
        let pt = a[i];
        if d < -SQRT_SMALL {
            let sv = (bounds.min[i] - pt) / d;
            if sv < 0.0 {
                return false;
            }
            let st = (bounds.max[i] - pt) / d;
            maxdist = maxdist.min(sv);
            mindist = mindist.max(st);
        } else if d > SQRT_SMALL {
            let sv = (bounds.max[i] - pt) / d;
            if sv < 0.0 {
                return false;
            }
            let st = (bounds.min[i] - pt) / d;
            maxdist = maxdist.min(sv);
            mindist = mindist.max(st);
        } else if pt < bounds.min[i] || pt > bounds.max[i] {
            return false;
        }
    }

    if mindist >= maxdist || mindist > 1.0 || maxdist < 0.0 {
        return false;
    }
    if mindist <= 0.0 && maxdist >= 1.0 {
        return true;
    }

    let mindist = mindist.max(0.0);
    let maxdist = maxdist.min(1.0);
    // `b` first: both endpoints derive from the original `a`.
    *b = *a + maxdist * dir;
    *a += mindist * dir;
    true
}

/// Clip a segment, returning the clipped endpoints on a hit.
pub fn clip_segment(a: Point3, b: Point3, bounds: &Aabb3) -> Option<(Point3, Point3)> {
    let (mut a, mut b) = (a, b);
    clip_in_place(&mut a, &mut b, bounds).then_some((a, b))
}
