//! The intersection-engine contract.
//!
//! An engine turns a set of tree tops into a prepared, read-only context and
//! then answers "where does this ray pass through which region" against it.
//! Shooting is reentrant given one private scratch value per concurrent
//! caller; preparing is not, and callers serialize it.

use rtserver_db::Database;
use rtserver_math::{Aabb3, Vec3};

use crate::error::Result;
use crate::XRay;

/// A region reachable from the prepared tree tops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    /// Full object name.
    pub name: String,
    /// Region identifier.
    pub region_id: i32,
    /// Air code; non-zero marks an air region.
    pub aircode: i32,
    /// Component name attribute, if any.
    pub component: Option<String>,
}

impl RegionInfo {
    /// Whether the region is air.
    pub fn is_air(&self) -> bool {
        self.aircode > 0
    }
}

/// Geometry prepared for shooting, shared read-only by every caller.
#[derive(Debug)]
pub struct PreparedGeometry<A> {
    /// Engine-specific acceleration data.
    pub accel: A,
    /// Regions, indexed by [`Partition::region`].
    pub regions: Vec<RegionInfo>,
    /// Model-space bounds of all regions.
    pub bounds: Aabb3,
}

/// One pass of a ray through a region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Partition {
    /// Index into [`PreparedGeometry::regions`].
    pub region: usize,
    /// Distance to entry, never negative.
    pub enter_dist: f64,
    /// Distance to exit.
    pub exit_dist: f64,
    /// Outward surface normal at entry.
    pub enter_normal: Vec3,
    /// Outward surface normal at exit.
    pub exit_normal: Vec3,
}

impl Partition {
    /// Thickness traversed.
    pub fn line_of_sight(&self) -> f64 {
        (self.exit_dist - self.enter_dist).max(0.0)
    }
}

/// Builds prepared geometry and fires rays through it.
pub trait IntersectionEngine: Send + Sync + 'static {
    /// Acceleration data built by [`IntersectionEngine::prepare`].
    type Accel: Send + Sync + 'static;
    /// Per-worker mutable state used while shooting.
    type Scratch: Send + 'static;

    /// Build the context for the given tree tops.
    fn prepare(&self, db: &Database, tops: &[String]) -> Result<PreparedGeometry<Self::Accel>>;

    /// Create a fresh scratch value.
    fn new_scratch(&self) -> Self::Scratch;

    /// Fire one model-space ray.
    ///
    /// Partitions come back sorted by entry distance; parts of the ray behind
    /// its start point are not reported.
    fn shoot(
        &self,
        prepared: &PreparedGeometry<Self::Accel>,
        ray: &XRay,
        scratch: &mut Self::Scratch,
    ) -> Result<Vec<Partition>>;
}
