//! Client sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rtserver_math::Aabb3;

use crate::instance::Instance;
use crate::model::Model;

/// Server-assigned session identifier; increases monotonically.
pub type SessionId = u64;

/// A client's private view of the loaded model.
///
/// Each session owns its instance array, so rearticulating one session never
/// moves geometry seen by another. Dispatch holds the read side of the lock
/// for a whole job; rearticulation and close take the write side.
pub(crate) struct Session<A> {
    pub(crate) id: SessionId,
    pub(crate) instances: RwLock<Vec<Instance<A>>>,
    pub(crate) model: Arc<Model<A>>,
    closed: AtomicBool,
}

impl<A: Send + Sync + 'static> Session<A> {
    pub(crate) fn new(id: SessionId, model: Arc<Model<A>>) -> Self {
        Self {
            id,
            instances: RwLock::new(model.default_instances().to_vec()),
            model,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// World-space bounds over every instance.
    pub(crate) fn extents(&self) -> Aabb3 {
        let mut bounds = Aabb3::empty();
        for inst in self.instances.read().iter() {
            bounds.include_box(inst.bounds());
        }
        bounds
    }
}
