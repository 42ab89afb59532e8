//! Bounding Volume Hierarchy over indexed boxes.
//!
//! Uses Surface Area Heuristic (SAH) for construction. Leaves hold item
//! indices; callers own the items.

use rtserver_math::{Aabb3, Point3};

use crate::Ray;

const LEAF_SIZE: usize = 4;
const NUM_BUCKETS: usize = 12;

type Item = (usize, Aabb3, Point3);

/// A BVH node - either a leaf containing items or an internal node with children.
#[derive(Debug, Clone)]
pub enum BvhNode {
    /// Leaf node.
    Leaf {
        /// Bounds of this node.
        aabb: Aabb3,
        /// Item indices contained in this leaf.
        items: Vec<usize>,
    },
    /// Internal node with two children.
    Internal {
        /// Bounds of this node.
        aabb: Aabb3,
        /// Left child node.
        left: Box<BvhNode>,
        /// Right child node.
        right: Box<BvhNode>,
    },
}

impl BvhNode {
    /// Bounds of the node.
    pub fn aabb(&self) -> &Aabb3 {
        match self {
            BvhNode::Leaf { aabb, .. } | BvhNode::Internal { aabb, .. } => aabb,
        }
    }
}

/// Bounding Volume Hierarchy for culling items along a ray.
#[derive(Debug, Clone, Default)]
pub struct Bvh {
    root: Option<BvhNode>,
}

impl Bvh {
    /// Build from `(index, bounds)` pairs. Empty boxes are skipped.
    pub fn build(items: impl IntoIterator<Item = (usize, Aabb3)>) -> Self {
        let mut data: Vec<Item> = items
            .into_iter()
            .filter(|(_, aabb)| !aabb.is_empty())
            .map(|(idx, aabb)| (idx, aabb, aabb.center()))
            .collect();

        let root = if data.is_empty() {
            None
        } else {
            Some(build_node(&mut data))
        };
        Self { root }
    }

    /// Root node, if any items were given.
    pub fn root(&self) -> Option<&BvhNode> {
        self.root.as_ref()
    }

    /// Bounds of everything in the tree.
    pub fn bounds(&self) -> Aabb3 {
        self.root.as_ref().map(|r| *r.aabb()).unwrap_or_default()
    }

    /// Collect the items whose boxes the ray's line passes through.
    ///
    /// `out` is cleared first; it is a caller buffer so it can be reused
    /// across rays.
    pub fn candidates(&self, ray: &Ray, out: &mut Vec<usize>) {
        out.clear();
        if let Some(root) = &self.root {
            collect(ray, root, out);
        }
    }
}

fn collect(ray: &Ray, node: &BvhNode, out: &mut Vec<usize>) {
    match node {
        BvhNode::Leaf { aabb, items } => {
            if ray.slab(aabb).is_some() {
                out.extend_from_slice(items);
            }
        }
        BvhNode::Internal { aabb, left, right } => {
            if ray.slab(aabb).is_some() {
                collect(ray, left, out);
                collect(ray, right, out);
            }
        }
    }
}

fn build_node(data: &mut [Item]) -> BvhNode {
    let mut bounds = Aabb3::empty();
    for (_, aabb, _) in data.iter() {
        bounds.include_box(aabb);
    }

    if data.len() <= LEAF_SIZE {
        return BvhNode::Leaf {
            aabb: bounds,
            items: data.iter().map(|(id, _, _)| *id).collect(),
        };
    }

    let (axis, pos) = find_best_split(data, &bounds);
    let mut mid = partition(data, axis, pos);
    if mid == 0 || mid == data.len() {
        mid = data.len() / 2;
    }

    let (left, right) = data.split_at_mut(mid);
    BvhNode::Internal {
        aabb: bounds,
        left: Box::new(build_node(left)),
        right: Box::new(build_node(right)),
    }
}

fn find_best_split(data: &[Item], bounds: &Aabb3) -> (usize, f64) {
    let extent = bounds.extent();
    let total_area = bounds.surface_area();

    let mut best_cost = f64::INFINITY;
    let mut best_axis = 0;
    let mut best_pos = bounds.center()[0];

    for axis in 0..3 {
        let axis_extent = extent[axis];
        if axis_extent < 1e-10 {
            continue;
        }
        let axis_min = bounds.min[axis];

        let mut counts = [0usize; NUM_BUCKETS];
        let mut boxes = [Aabb3::empty(); NUM_BUCKETS];
        for (_, aabb, centroid) in data {
            let b = ((centroid[axis] - axis_min) / axis_extent * NUM_BUCKETS as f64) as usize;
            let b = b.min(NUM_BUCKETS - 1);
            counts[b] += 1;
            boxes[b].include_box(aabb);
        }

        for split in 1..NUM_BUCKETS {
            let (mut left_count, mut right_count) = (0, 0);
            let (mut left_box, mut right_box) = (Aabb3::empty(), Aabb3::empty());
            for i in 0..NUM_BUCKETS {
                if counts[i] == 0 {
                    continue;
                }
                if i < split {
                    left_count += counts[i];
                    left_box.include_box(&boxes[i]);
                } else {
                    right_count += counts[i];
                    right_box.include_box(&boxes[i]);
                }
            }
            if left_count == 0 || right_count == 0 {
                continue;
            }

            // traversal + P(left) * N_left + P(right) * N_right
            let cost = 0.125
                + left_box.surface_area() / total_area * left_count as f64
                + right_box.surface_area() / total_area * right_count as f64;
            if cost < best_cost {
                best_cost = cost;
                best_axis = axis;
                best_pos = axis_min + (split as f64 / NUM_BUCKETS as f64) * axis_extent;
            }
        }
    }

    (best_axis, best_pos)
}

fn partition(data: &mut [Item], axis: usize, pos: f64) -> usize {
    let mut left = 0;
    let mut right = data.len();
    while left < right {
        if data[left].2[axis] < pos {
            left += 1;
        } else {
            right -= 1;
            data.swap(left, right);
        }
    }
    left
}
