//! Built-in engine for box, sphere and polysolid geometry.
//!
//! Regions are boolean trees over leaf solids. Member operators follow the
//! usual precedence: a union starts a new group and subtract/intersect
//! members apply left to right to the group they follow; the groups are then
//! unioned. A hierarchy over region bounds culls regions per ray, and each
//! leaf is intersected at most once per ray through the scratch cache.

use std::collections::{HashMap, HashSet};

use rtserver_db::{Combination, Database, DirectoryEntry, EntryKind, MemberOp, Primitive, Triangle};
use rtserver_math::{Aabb3, Point3, Vec3};
use tracing::{debug, info};

use crate::bvh::Bvh;
use crate::csg;
use crate::engine::{IntersectionEngine, Partition, PreparedGeometry, RegionInfo};
use crate::error::{EngineError, Result};
use crate::intersect::{intersect_mesh, intersect_rpp, intersect_sphere, Segment};
use crate::{Ray, XRay};

#[derive(Debug, Clone)]
enum Shape {
    Rpp(Aabb3),
    Sphere { center: Point3, radius: f64 },
    Mesh(Vec<Triangle>),
}

#[derive(Debug, Clone)]
struct Leaf {
    shape: Shape,
    bounds: Aabb3,
}

impl Leaf {
    fn from_primitive(prim: Primitive) -> Self {
        match prim {
            Primitive::Rpp { min, max } => {
                let mut bounds = Aabb3::empty();
                bounds.include_point(&min);
                bounds.include_point(&max);
                Self { shape: Shape::Rpp(bounds), bounds }
            }
            Primitive::Sphere { center, radius } => {
                let r = Vec3::repeat(radius.abs());
                Self {
                    shape: Shape::Sphere { center, radius: radius.abs() },
                    bounds: Aabb3::new(center - r, center + r),
                }
            }
        }
    }

    fn from_triangles(triangles: Vec<Triangle>) -> Self {
        let mut bounds = Aabb3::empty();
        for p in triangles.iter().flatten() {
            bounds.include_point(p);
        }
        Self { shape: Shape::Mesh(triangles), bounds }
    }

    fn intersect(&self, ray: &Ray) -> Vec<Segment> {
        if ray.slab(&self.bounds).is_none() {
            return Vec::new();
        }
        match &self.shape {
            Shape::Rpp(aabb) => intersect_rpp(ray, aabb).into_iter().collect(),
            Shape::Sphere { center, radius } => {
                intersect_sphere(ray, center, *radius).into_iter().collect()
            }
            Shape::Mesh(triangles) => intersect_mesh(ray, triangles),
        }
    }
}

#[derive(Debug, Clone)]
enum CsgNode {
    Leaf(usize),
    Tree(Vec<UnionGroup>),
}

#[derive(Debug, Clone)]
struct UnionGroup {
    base: CsgNode,
    ops: Vec<(MemberOp, CsgNode)>,
}

/// Acceleration data of the primitive engine.
#[derive(Debug, Clone)]
pub struct PrimitiveAccel {
    leaves: Vec<Leaf>,
    trees: Vec<CsgNode>,
    bvh: Bvh,
}

impl PrimitiveAccel {
    /// Number of distinct leaf solids.
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    fn leaf_bounds(&self, node: &CsgNode) -> Aabb3 {
        match node {
            CsgNode::Leaf(i) => self.leaves[*i].bounds,
            CsgNode::Tree(groups) => {
                let mut b = Aabb3::empty();
                for g in groups {
                    b.include_box(&self.leaf_bounds(&g.base));
                }
                b
            }
        }
    }

    fn eval(&self, node: &CsgNode, ray: &Ray, scratch: &mut PrimitiveScratch) -> Vec<Segment> {
        match node {
            CsgNode::Leaf(i) => scratch.leaf_segments(*i, || self.leaves[*i].intersect(ray)),
            CsgNode::Tree(groups) => {
                let mut acc = Vec::new();
                for group in groups {
                    let mut segs = self.eval(&group.base, ray, scratch);
                    for (op, child) in &group.ops {
                        if segs.is_empty() {
                            break;
                        }
                        let other = self.eval(child, ray, scratch);
                        segs = match op {
                            MemberOp::Subtract => csg::subtract(&segs, &other),
                            MemberOp::Intersect => csg::intersect(&segs, &other),
                            MemberOp::Union => csg::union(&segs, &other),
                        };
                    }
                    acc = csg::union(&acc, &segs);
                }
                acc
            }
        }
    }
}

/// Per-worker state of the primitive engine.
#[derive(Debug, Default)]
pub struct PrimitiveScratch {
    leaf_segs: Vec<Option<Vec<Segment>>>,
    touched: Vec<usize>,
    candidates: Vec<usize>,
}

impl PrimitiveScratch {
    fn reset(&mut self, leaves: usize) {
        for i in self.touched.drain(..) {
            if let Some(slot) = self.leaf_segs.get_mut(i) {
                *slot = None;
            }
        }
        if self.leaf_segs.len() < leaves {
            self.leaf_segs.resize(leaves, None);
        }
    }

    fn leaf_segments(&mut self, idx: usize, compute: impl FnOnce() -> Vec<Segment>) -> Vec<Segment> {
        if let Some(Some(segs)) = self.leaf_segs.get(idx) {
            return segs.clone();
        }
        let segs = compute();
        if let Some(slot) = self.leaf_segs.get_mut(idx) {
            *slot = Some(segs.clone());
            self.touched.push(idx);
        }
        segs
    }
}

/// Engine over the database's own primitive solids.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimitiveEngine;

impl PrimitiveEngine {
    /// Create the engine.
    pub fn new() -> Self {
        Self
    }
}

impl IntersectionEngine for PrimitiveEngine {
    type Accel = PrimitiveAccel;
    type Scratch = PrimitiveScratch;

    fn prepare(&self, db: &Database, tops: &[String]) -> Result<PreparedGeometry<PrimitiveAccel>> {
        let mut builder = TreeBuilder::new(db);
        for top in tops {
            builder.visit_top(top)?;
        }
        if builder.regions.is_empty() {
            return Err(EngineError::NoRegions(tops.to_vec()));
        }

        let mut accel = PrimitiveAccel {
            leaves: builder.leaves,
            trees: builder.trees,
            bvh: Bvh::default(),
        };
        let region_bounds: Vec<Aabb3> = accel.trees.iter().map(|t| accel.leaf_bounds(t)).collect();
        accel.bvh = Bvh::build(region_bounds.into_iter().enumerate());
        let bounds = accel.bvh.bounds();

        info!(
            tops = ?tops,
            regions = builder.regions.len(),
            leaves = accel.leaves.len(),
            "prepared geometry"
        );
        Ok(PreparedGeometry {
            accel,
            regions: builder.regions,
            bounds,
        })
    }

    fn new_scratch(&self) -> PrimitiveScratch {
        PrimitiveScratch::default()
    }

    fn shoot(
        &self,
        prepared: &PreparedGeometry<PrimitiveAccel>,
        xray: &XRay,
        scratch: &mut PrimitiveScratch,
    ) -> Result<Vec<Partition>> {
        let d = xray.direction;
        if !d.iter().all(|c| c.is_finite()) || d.norm_squared() == 0.0 {
            return Err(EngineError::DegenerateRay(format!("direction {d:?}")));
        }
        let ray = Ray::from(xray);
        if ray.intersect_aabb(&prepared.bounds).is_none() {
            return Ok(Vec::new());
        }

        let accel = &prepared.accel;
        scratch.reset(accel.leaves.len());
        let mut candidates = std::mem::take(&mut scratch.candidates);
        accel.bvh.candidates(&ray, &mut candidates);

        let mut parts = Vec::new();
        for &region in &candidates {
            for seg in accel.eval(&accel.trees[region], &ray, scratch) {
                if seg.t_out < 0.0 {
                    continue;
                }
                parts.push(Partition {
                    region,
                    enter_dist: seg.t_in.max(0.0),
                    exit_dist: seg.t_out,
                    enter_normal: seg.n_in,
                    exit_normal: seg.n_out,
                });
            }
        }
        scratch.candidates = candidates;

        parts.sort_by(|a, b| a.enter_dist.total_cmp(&b.enter_dist));
        Ok(parts)
    }
}

struct TreeBuilder<'a> {
    db: &'a Database,
    leaves: Vec<Leaf>,
    leaf_index: HashMap<String, usize>,
    regions: Vec<RegionInfo>,
    trees: Vec<CsgNode>,
    seen_regions: HashSet<String>,
    stack: Vec<String>,
}

impl<'a> TreeBuilder<'a> {
    fn new(db: &'a Database) -> Self {
        Self {
            db,
            leaves: Vec::new(),
            leaf_index: HashMap::new(),
            regions: Vec::new(),
            trees: Vec::new(),
            seen_regions: HashSet::new(),
            stack: Vec::new(),
        }
    }

    fn entry(&self, name: &str) -> Result<&'a DirectoryEntry> {
        self.db
            .lookup(name)
            .ok_or_else(|| EngineError::UnknownObject(name.to_string()))
    }

    fn push(&mut self, name: &str) -> Result<()> {
        if self.stack.iter().any(|n| n == name) {
            return Err(EngineError::CyclicTree(name.to_string()));
        }
        self.stack.push(name.to_string());
        Ok(())
    }

    /// Walk a tree top down to its regions.
    fn visit_top(&mut self, name: &str) -> Result<()> {
        let entry = self.entry(name)?;
        match entry.kind {
            EntryKind::Region => self.add_region(entry),
            EntryKind::Combination => {
                self.push(name)?;
                let comb = self.db.combination(entry)?;
                for member in &comb.members {
                    if member.op != MemberOp::Union {
                        debug!(group = name, member = %member.name, "non-union member above region level ignored");
                        continue;
                    }
                    self.visit_top(&member.name)?;
                }
                self.stack.pop();
                Ok(())
            }
            EntryKind::Solid | EntryKind::PolysolidHead => {
                if !self.seen_regions.insert(entry.name.clone()) {
                    return Ok(());
                }
                debug!(solid = name, "solid outside any region gets an implicit region");
                let leaf = self.leaf(entry)?;
                self.regions.push(RegionInfo {
                    name: entry.name.clone(),
                    region_id: 0,
                    aircode: 0,
                    component: None,
                });
                self.trees.push(CsgNode::Leaf(leaf));
                Ok(())
            }
            kind => Err(EngineError::NotGeometry {
                name: name.to_string(),
                kind: kind.as_str(),
            }),
        }
    }

    fn add_region(&mut self, entry: &DirectoryEntry) -> Result<()> {
        if !self.seen_regions.insert(entry.name.clone()) {
            debug!(region = %entry.name, "region reached twice, shot once");
            return Ok(());
        }
        self.push(&entry.name)?;
        let comb = self.db.combination(entry)?;
        let tree = self.tree(&comb)?;
        self.stack.pop();

        self.regions.push(RegionInfo {
            name: entry.name.clone(),
            region_id: comb.header.region_id,
            aircode: comb.header.aircode,
            component: comb.header.component,
        });
        self.trees.push(tree);
        Ok(())
    }

    fn tree(&mut self, comb: &Combination) -> Result<CsgNode> {
        let mut groups: Vec<UnionGroup> = Vec::new();
        for member in &comb.members {
            let child = self.node(&member.name)?;
            match (member.op, groups.last_mut()) {
                (MemberOp::Union, _) | (_, None) => groups.push(UnionGroup {
                    base: child,
                    ops: Vec::new(),
                }),
                (op, Some(group)) => group.ops.push((op, child)),
            }
        }
        Ok(CsgNode::Tree(groups))
    }

    fn node(&mut self, name: &str) -> Result<CsgNode> {
        let entry = self.entry(name)?;
        match entry.kind {
            EntryKind::Solid | EntryKind::PolysolidHead => Ok(CsgNode::Leaf(self.leaf(entry)?)),
            EntryKind::Region | EntryKind::Combination => {
                self.push(name)?;
                let comb = self.db.combination(entry)?;
                let node = self.tree(&comb)?;
                self.stack.pop();
                Ok(node)
            }
            kind => Err(EngineError::NotGeometry {
                name: name.to_string(),
                kind: kind.as_str(),
            }),
        }
    }

    fn leaf(&mut self, entry: &DirectoryEntry) -> Result<usize> {
        if let Some(&idx) = self.leaf_index.get(&entry.name) {
            return Ok(idx);
        }
        let leaf = match entry.kind {
            EntryKind::PolysolidHead => Leaf::from_triangles(self.db.polysolid(entry)?),
            _ => Leaf::from_primitive(self.db.solid(entry)?),
        };
        let idx = self.leaves.len();
        self.leaves.push(leaf);
        self.leaf_index.insert(entry.name.clone(), idx);
        Ok(idx)
    }
}
