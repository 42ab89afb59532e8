//! Jobs, hits and results.

use rtserver_math::Vec3;
use rtserver_raytrace::XRay;
use serde::{Deserialize, Serialize};

use crate::error::FailureReason;
use crate::session::SessionId;

/// Server-assigned job identifier; increases monotonically.
pub type JobId = u64;

/// A batch of rays to fire against one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Target session.
    pub session_id: SessionId,
    /// Rays, in the order results are wanted.
    pub rays: Vec<XRay>,
    /// Priority queue; 0 is served first.
    pub queue: usize,
    /// Keep at most this many hits per ray.
    pub max_hits: Option<usize>,
}

impl JobRequest {
    /// A request on queue 0 with no hit limit.
    pub fn new(session_id: SessionId, rays: Vec<XRay>) -> Self {
        Self {
            session_id,
            rays,
            queue: 0,
            max_hits: None,
        }
    }

    /// Use a different priority queue.
    pub fn with_queue(mut self, queue: usize) -> Self {
        self.queue = queue;
        self
    }

    /// Limit hits per ray; `Some(1)` keeps only the first.
    pub fn with_max_hits(mut self, max_hits: usize) -> Self {
        self.max_hits = Some(max_hits);
        self
    }
}

/// Which region of which instance was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionRef {
    /// Index into the session's instances.
    pub instance: usize,
    /// Index into that instance's prepared regions.
    pub region: usize,
}

/// One pass of a ray through a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RayHit {
    /// Region hit.
    pub region: RegionRef,
    /// Region ident from the database.
    pub region_id: i32,
    /// Component index; 0 when the region has none.
    pub component_id: usize,
    /// Distance from the ray start to entry.
    pub distance: f64,
    /// Thickness traversed.
    pub line_of_sight: f64,
    /// World-space outward normal at entry.
    pub enter_normal: Vec3,
    /// World-space outward normal at exit.
    pub exit_normal: Vec3,
}

/// Hits of one ray, sorted by distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RayResult {
    /// Copy of the ray as submitted.
    pub ray: XRay,
    /// Hits, nearest first.
    pub hits: Vec<RayHit>,
}

/// The outcome of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Job id.
    pub job_id: JobId,
    /// Session the job ran against.
    pub session_id: SessionId,
    /// Whether any ray hit anything.
    pub got_some_hits: bool,
    /// One entry per submitted ray, in submission order.
    pub per_ray_results: Vec<RayResult>,
}

/// What `poll` and friends report about a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Queued or being dispatched.
    Pending,
    /// All rays processed.
    Completed(JobResult),
    /// Aborted; no partial results are kept.
    Failed(FailureReason),
}

impl JobStatus {
    /// Whether the job has finished, either way.
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }

    /// The result, if completed.
    pub fn into_result(self) -> Option<JobResult> {
        match self {
            JobStatus::Completed(r) => Some(r),
            _ => None,
        }
    }
}
