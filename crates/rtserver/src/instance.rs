//! Positioned copies of prepared geometry.

use std::sync::Arc;

use rtserver_math::{Aabb3, Transform};
use rtserver_raytrace::PreparedGeometry;

/// A prepared geometry context placed in the world by a transform.
///
/// The prepared context is shared; only the transform differs between
/// sessions and articulations.
#[derive(Debug)]
pub struct Instance<A> {
    /// Instance name (assembly name, or the joined object list).
    pub name: String,
    /// Database objects the context was prepared from.
    pub tree_tops: Vec<String>,
    /// Shared prepared context.
    pub prepared: Arc<PreparedGeometry<A>>,
    /// Model-to-world transform.
    pub transform: Transform,
    bounds: Aabb3,
}

impl<A> Instance<A> {
    /// Place a prepared context.
    pub fn new(
        name: impl Into<String>,
        tree_tops: Vec<String>,
        prepared: Arc<PreparedGeometry<A>>,
        transform: Transform,
    ) -> Self {
        let bounds = prepared.bounds.transformed(&transform);
        Self {
            name: name.into(),
            tree_tops,
            prepared,
            transform,
            bounds,
        }
    }

    /// World-space bounds.
    pub fn bounds(&self) -> &Aabb3 {
        &self.bounds
    }
}

impl<A> Clone for Instance<A> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tree_tops: self.tree_tops.clone(),
            prepared: Arc::clone(&self.prepared),
            transform: self.transform.clone(),
            bounds: self.bounds,
        }
    }
}
