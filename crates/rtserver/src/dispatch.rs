//! Per-ray dispatch: clip, shoot, weave.

use std::sync::atomic::{AtomicU8, Ordering};

use rtserver_raytrace::{clip_in_place, IntersectionEngine, XRay};
use tracing::{debug, warn};

use crate::components::ComponentTable;
use crate::error::FailureReason;
use crate::instance::Instance;
use crate::job::{RayHit, RayResult, RegionRef};
use crate::scratch::ScratchPool;
use crate::stats::Stats;

const NOT_CANCELLED: u8 = 0;
const CANCELLED: u8 = 1;
const SESSION_CLOSED: u8 = 2;

/// Cooperative cancel flag shared by a job and whoever may abort it.
#[derive(Debug, Default)]
pub(crate) struct CancelToken(AtomicU8);

impl CancelToken {
    /// Set the reason. The first reason set wins; returns whether this call set it.
    pub(crate) fn cancel(&self, reason: FailureReason) -> bool {
        let code = match reason {
            FailureReason::SessionClosed => SESSION_CLOSED,
            _ => CANCELLED,
        };
        self.0
            .compare_exchange(NOT_CANCELLED, code, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn reason(&self) -> Option<FailureReason> {
        match self.0.load(Ordering::Acquire) {
            NOT_CANCELLED => None,
            SESSION_CLOSED => Some(FailureReason::SessionClosed),
            _ => Some(FailureReason::Cancelled),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire) != NOT_CANCELLED
    }
}

/// Shared inputs for firing the rays of one job.
pub(crate) struct RayContext<'a, E: IntersectionEngine> {
    pub(crate) engine: &'a E,
    pub(crate) instances: &'a [Instance<E::Accel>],
    pub(crate) scratch: &'a ScratchPool<E::Scratch>,
    pub(crate) components: &'a ComponentTable,
    pub(crate) stats: &'a Stats,
    pub(crate) max_hits: Option<usize>,
}

impl<E: IntersectionEngine> RayContext<'_, E> {
    /// Fire one world-space ray through every instance and merge the hits.
    pub(crate) fn fire(&self, ray: &XRay) -> RayResult {
        let mut hits = Vec::new();
        for (idx, inst) in self.instances.iter().enumerate() {
            if let Err(err) = self.fire_instance(idx, inst, ray, &mut hits) {
                warn!(instance = %inst.name, ?ray, %err, "engine failed; ray reported as a miss");
                return RayResult {
                    ray: *ray,
                    hits: Vec::new(),
                };
            }
        }

        // Stable, so equal distances keep instance order.
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        if let Some(max) = self.max_hits {
            hits.truncate(max);
        }
        RayResult { ray: *ray, hits }
    }

    fn fire_instance(
        &self,
        idx: usize,
        inst: &Instance<E::Accel>,
        ray: &XRay,
        hits: &mut Vec<RayHit>,
    ) -> rtserver_raytrace::Result<()> {
        let prepared = &inst.prepared;
        if prepared.bounds.is_empty() {
            return Ok(());
        }
        let local = ray.to_model_space(&inst.transform);

        // Directions need not be unit length; `at` counts in direction lengths.
        let center = prepared.bounds.center();
        let reach = (center - local.point).norm() + prepared.bounds.radius() + 1.0;
        let span = reach / local.direction.norm();
        // Degenerate directions skip the clip; the engine rejects them.
        if span.is_finite() {
            let mut a = local.point;
            let mut b = local.at(span);
            if !clip_in_place(&mut a, &mut b, &prepared.bounds) {
                self.stats.ray_clipped();
                return Ok(());
            }
        }

        self.stats.ray_fired();
        let parts = {
            let mut scratch = self.scratch.acquire();
            self.engine.shoot(prepared, &local, &mut scratch)?
        };
        debug!(instance = %inst.name, partitions = parts.len(), "shot");

        for part in parts {
            let Some(region) = prepared.regions.get(part.region) else {
                continue;
            };
            if region.is_air() && !self.components.use_air() {
                continue;
            }
            hits.push(RayHit {
                region: RegionRef {
                    instance: idx,
                    region: part.region,
                },
                region_id: region.region_id,
                component_id: self.components.lookup(region),
                distance: part.enter_dist,
                line_of_sight: part.line_of_sight(),
                enter_normal: inst.transform.apply_normal(&part.enter_normal),
                exit_normal: inst.transform.apply_normal(&part.exit_normal),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_cancel_reason_wins() {
        let token = CancelToken::default();
        assert_eq!(token.reason(), None);
        assert!(token.cancel(FailureReason::SessionClosed));
        assert!(!token.cancel(FailureReason::Cancelled));
        assert_eq!(token.reason(), Some(FailureReason::SessionClosed));
        assert!(token.is_cancelled());
    }
}
