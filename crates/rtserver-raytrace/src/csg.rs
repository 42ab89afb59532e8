//! Boolean weaving of sorted segment lists.
//!
//! Inputs and outputs are sorted by entry parameter and pairwise disjoint.

use crate::intersect::Segment;

/// Merge two lists, coalescing overlaps.
pub fn union(a: &[Segment], b: &[Segment]) -> Vec<Segment> {
    let mut all: Vec<Segment> = a.iter().chain(b).copied().collect();
    all.sort_by(|x, y| x.t_in.total_cmp(&y.t_in));

    let mut out: Vec<Segment> = Vec::with_capacity(all.len());
    for seg in all {
        match out.last_mut() {
            Some(last) if seg.t_in <= last.t_out => {
                if seg.t_out > last.t_out {
                    last.t_out = seg.t_out;
                    last.n_out = seg.n_out;
                }
            }
            _ => out.push(seg),
        }
    }
    out
}

/// Keep only the parts covered by both lists.
pub fn intersect(a: &[Segment], b: &[Segment]) -> Vec<Segment> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let (x, y) = (&a[i], &b[j]);
        let (t_in, n_in) = if x.t_in >= y.t_in { (x.t_in, x.n_in) } else { (y.t_in, y.n_in) };
        let (t_out, n_out) = if x.t_out <= y.t_out { (x.t_out, x.n_out) } else { (y.t_out, y.n_out) };
        if t_in < t_out {
            out.push(Segment { t_in, t_out, n_in, n_out });
        }
        if x.t_out <= y.t_out {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

/// Remove from `a` every part covered by `b`.
///
/// Faces cut by a subtracted solid take that solid's normal reversed.
pub fn subtract(a: &[Segment], b: &[Segment]) -> Vec<Segment> {
    let mut out = Vec::new();
    for seg in a {
        let mut cur = *seg;
        let mut alive = true;
        for cut in b {
            if cut.t_out <= cur.t_in {
                continue;
            }
            if cut.t_in >= cur.t_out {
                break;
            }
            if cut.t_in > cur.t_in {
                out.push(Segment {
                    t_in: cur.t_in,
                    t_out: cut.t_in,
                    n_in: cur.n_in,
                    n_out: -cut.n_in,
                });
            }
            if cut.t_out >= cur.t_out {
                alive = false;
                break;
            }
            cur.t_in = cut.t_out;
            cur.n_in = -cut.n_out;
        }
        if alive && !cur.is_empty() {
            out.push(cur);
        }
    }
    out
}
