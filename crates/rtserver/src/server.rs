//! The ray server.
//!
//! A [`Server`] owns the loaded model, the open sessions, a set of FIFO
//! priority queues and the board of finished results. Every submit spawns
//! one task on the worker pool; the task takes the oldest job from the
//! highest-priority non-empty queue, so jobs never overtake others in the
//! same queue. Rays of a job fan out across the pool and are gathered back
//! in submission order.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use rtserver_db::Database;
use rtserver_math::Aabb3;
use rtserver_raytrace::{IntersectionEngine, XRay};
use tracing::{debug, info};

use crate::articulation::ArticulationParams;
use crate::config::ServerConfig;
use crate::dispatch::{CancelToken, RayContext};
use crate::error::{FailureReason, Result, ServerError};
use crate::items::{self, ItemNode};
use crate::job::{JobId, JobRequest, JobResult, JobStatus, RayResult, RegionRef};
use crate::model::{LoadRequest, Model};
use crate::scratch::ScratchPool;
use crate::session::{Session, SessionId};
use crate::stats::{Stats, StatsSnapshot};

struct QueuedJob {
    id: JobId,
    request: JobRequest,
    cancel: Arc<CancelToken>,
}

struct BoardEntry {
    session_id: SessionId,
    queue: usize,
    cancel: Arc<CancelToken>,
    status: JobStatus,
    finished_at: Option<Instant>,
}

impl BoardEntry {
    fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

type Entries = HashMap<JobId, BoardEntry>;

/// Jobs from submission until the client retrieves the outcome.
#[derive(Default)]
struct ResultBoard {
    entries: Mutex<Entries>,
    finished: Condvar,
}

impl ResultBoard {
    fn finish(&self, id: JobId, status: JobStatus) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&id) {
            entry.status = status;
            entry.finished_at = Some(Instant::now());
        }
        drop(entries);
        self.finished.notify_all();
    }

    fn cancel_where(&self, reason: FailureReason, pred: impl Fn(&BoardEntry) -> bool) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| !e.is_finished() && pred(e))
            .filter(|e| e.cancel.cancel(reason))
            .count()
    }

    fn wait_until(&self, id: JobId, deadline: Option<Instant>) -> Result<JobStatus> {
        let mut entries = self.entries.lock();
        loop {
            let status = take_finished(&mut entries, id)?;
            if status.is_finished() {
                return Ok(status);
            }
            match deadline {
                Some(deadline) => {
                    if self.finished.wait_until(&mut entries, deadline).timed_out() {
                        return take_finished(&mut entries, id);
                    }
                }
                None => self.finished.wait(&mut entries),
            }
        }
    }
}

/// Remove and return a finished entry; `Pending` leaves it in place.
fn take_finished(entries: &mut Entries, id: JobId) -> Result<JobStatus> {
    let finished = entries
        .get(&id)
        .ok_or(ServerError::UnknownJob(id))?
        .is_finished();
    if !finished {
        return Ok(JobStatus::Pending);
    }
    Ok(entries.remove(&id).map_or(JobStatus::Pending, |e| e.status))
}

struct Shared<E: IntersectionEngine> {
    engine: E,
    config: ServerConfig,
    scratch: ScratchPool<E::Scratch>,
    model: RwLock<Option<Arc<Model<E::Accel>>>>,
    sessions: RwLock<HashMap<SessionId, Arc<Session<E::Accel>>>>,
    queues: Vec<Mutex<VecDeque<QueuedJob>>>,
    board: ResultBoard,
    next_session: AtomicU64,
    next_job: AtomicU64,
    stats: Stats,
    shut_down: AtomicBool,
}

impl<E: IntersectionEngine> Shared<E> {
    fn model(&self) -> Result<Arc<Model<E::Accel>>> {
        self.model.read().clone().ok_or(ServerError::NoModel)
    }

    fn session(&self, id: SessionId) -> Result<Arc<Session<E::Accel>>> {
        self.sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or(ServerError::UnknownSession(id))
    }

    fn run_next(&self) {
        let Some(job) = self.queues.iter().find_map(|q| q.lock().pop_front()) else {
            return;
        };
        let status = self.dispatch(&job);
        match &status {
            JobStatus::Completed(r) => {
                debug!(job = job.id, hits = r.got_some_hits, "job completed");
                self.stats.job_finished(true);
            }
            JobStatus::Failed(reason) => {
                debug!(job = job.id, %reason, "job failed");
                self.stats.job_finished(false);
            }
            JobStatus::Pending => {}
        }
        self.board.finish(job.id, status);
    }

    fn dispatch(&self, job: &QueuedJob) -> JobStatus {
        if let Some(reason) = job.cancel.reason() {
            return JobStatus::Failed(reason);
        }
        let session_id = job.request.session_id;
        let Ok(session) = self.session(session_id) else {
            return JobStatus::Failed(FailureReason::UnknownSession);
        };

        let results = {
            // Recursive: a worker blocked in `par_iter` may steal another job
            // of this session while a writer is queued.
            let instances = session.instances.read_recursive();
            if session.is_closed() {
                return JobStatus::Failed(FailureReason::SessionClosed);
            }
            let ctx = RayContext {
                engine: &self.engine,
                instances: &instances,
                scratch: &self.scratch,
                components: session.model.components(),
                stats: &self.stats,
                max_hits: job.request.max_hits,
            };
            self.stats.start_work();
            let results: Option<Vec<RayResult>> = job
                .request
                .rays
                .par_iter()
                .map(|ray| (!job.cancel.is_cancelled()).then(|| ctx.fire(ray)))
                .collect();
            self.stats.end_work();
            results
        };

        // A cancel that lands after the last ray still wins.
        if let Some(reason) = job.cancel.reason() {
            return JobStatus::Failed(reason);
        }
        match results {
            Some(per_ray_results) => JobStatus::Completed(JobResult {
                job_id: job.id,
                session_id,
                got_some_hits: per_ray_results.iter().any(|r| !r.hits.is_empty()),
                per_ray_results,
            }),
            None => JobStatus::Failed(FailureReason::Cancelled),
        }
    }
}

/// A concurrent ray-query server over one loaded model.
pub struct Server<E: IntersectionEngine> {
    shared: Arc<Shared<E>>,
    pool: ThreadPool,
}

impl<E: IntersectionEngine> Server<E> {
    /// Start a server with `config.workers` worker threads.
    pub fn new(engine: E, config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("rtserver-worker-{i}"))
            .build()
            .map_err(|e| ServerError::Config(e.to_string()))?;
        let scratch = ScratchPool::new(config.workers, || engine.new_scratch());
        let queues = (0..config.queues).map(|_| Mutex::new(VecDeque::new())).collect();

        info!(
            workers = config.workers,
            queues = config.queues,
            use_air = config.use_air,
            "server started"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                engine,
                config,
                scratch,
                model: RwLock::new(None),
                sessions: RwLock::new(HashMap::new()),
                queues,
                board: ResultBoard::default(),
                next_session: AtomicU64::new(0),
                next_job: AtomicU64::new(0),
                stats: Stats::default(),
                shut_down: AtomicBool::new(false),
            }),
            pool,
        })
    }

    /// The engine rays are fired through.
    pub fn engine(&self) -> &E {
        &self.shared.engine
    }

    /// Active configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Load a model, replacing any previous one.
    ///
    /// Sessions opened earlier keep the model they were opened on.
    pub fn load(&self, db: Database, request: LoadRequest) -> Result<()> {
        let model = Model::load(
            &self.shared.engine,
            Arc::new(db),
            request,
            self.shared.config.use_air,
        )?;
        *self.shared.model.write() = Some(Arc::new(model));
        Ok(())
    }

    /// Open a database file read-only and load it.
    pub fn load_file(&self, path: impl AsRef<Path>, request: LoadRequest) -> Result<()> {
        self.load(Database::open(path)?, request)
    }

    /// Open a session on the loaded model's default configuration.
    pub fn open_session(&self) -> Result<SessionId> {
        if self.shared.shut_down.load(Ordering::Acquire) {
            return Err(ServerError::ShutDown);
        }
        let model = self.shared.model()?;
        let id = self.shared.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        self.shared
            .sessions
            .write()
            .insert(id, Arc::new(Session::new(id, model)));
        info!(session = id, "session opened");
        Ok(id)
    }

    /// Close a session, failing its outstanding jobs with `SessionClosed`.
    ///
    /// Returns once no job of the session is still dispatching.
    pub fn close_session(&self, id: SessionId) -> Result<()> {
        let session = self
            .shared
            .sessions
            .write()
            .remove(&id)
            .ok_or(ServerError::UnknownSession(id))?;
        session.close();
        let cancelled = self
            .shared
            .board
            .cancel_where(FailureReason::SessionClosed, |e| e.session_id == id);
        drop(session.instances.write());
        info!(session = session.id, cancelled, "session closed");
        Ok(())
    }

    /// Replace a session's instances with a new articulation.
    ///
    /// Out-of-range values are rejected and leave the session unchanged.
    pub fn rearticulate(&self, id: SessionId, params: &ArticulationParams) -> Result<()> {
        let session = self.shared.session(id)?;
        let instances = session.model.articulate(&self.shared.engine, params)?;
        let count = instances.len();
        *session.instances.write() = instances;
        debug!(session = id, instances = count, "session rearticulated");
        Ok(())
    }

    /// Submit rays on queue 0.
    pub fn submit(&self, session_id: SessionId, rays: Vec<XRay>) -> Result<JobId> {
        self.submit_job(JobRequest::new(session_id, rays))
    }

    /// Submit rays on a given priority queue.
    pub fn submit_to_queue(&self, session_id: SessionId, rays: Vec<XRay>, queue: usize) -> Result<JobId> {
        self.submit_job(JobRequest::new(session_id, rays).with_queue(queue))
    }

    /// Submit a fully specified job.
    pub fn submit_job(&self, request: JobRequest) -> Result<JobId> {
        let shared = &self.shared;
        if shared.shut_down.load(Ordering::Acquire) {
            return Err(ServerError::ShutDown);
        }
        if request.queue >= shared.queues.len() {
            return Err(ServerError::InvalidQueue {
                queue: request.queue,
                queues: shared.queues.len(),
            });
        }
        shared.session(request.session_id)?;
        self.reap_expired();

        let id = shared.next_job.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = Arc::new(CancelToken::default());
        debug!(
            job = id,
            session = request.session_id,
            rays = request.rays.len(),
            queue = request.queue,
            "job submitted"
        );
        shared.board.entries.lock().insert(
            id,
            BoardEntry {
                session_id: request.session_id,
                queue: request.queue,
                cancel: Arc::clone(&cancel),
                status: JobStatus::Pending,
                finished_at: None,
            },
        );
        let queue = request.queue;
        shared.queues[queue].lock().push_back(QueuedJob { id, request, cancel });
        shared.stats.job_submitted();

        let task = Arc::clone(shared);
        self.pool.spawn(move || task.run_next());
        Ok(id)
    }

    /// Current state of a job. A finished job is handed over and forgotten.
    pub fn poll(&self, job_id: JobId) -> Result<JobStatus> {
        take_finished(&mut self.shared.board.entries.lock(), job_id)
    }

    /// Block until a job finishes or `timeout` passes; `Pending` on timeout.
    pub fn wait(&self, job_id: JobId, timeout: Duration) -> Result<JobStatus> {
        self.shared
            .board
            .wait_until(job_id, Some(Instant::now() + timeout))
    }

    /// Submit and block until the job finishes.
    pub fn submit_and_wait(&self, session_id: SessionId, rays: Vec<XRay>) -> Result<JobStatus> {
        let id = self.submit(session_id, rays)?;
        self.shared.board.wait_until(id, None)
    }

    /// Any finished job of a session, lowest queue index first.
    pub fn next_result(&self, session_id: SessionId) -> Option<(JobId, JobStatus)> {
        let mut entries = self.shared.board.entries.lock();
        let id = entries
            .iter()
            .filter(|(_, e)| e.session_id == session_id && e.is_finished())
            .min_by_key(|(id, e)| (e.queue, **id))
            .map(|(id, _)| *id)?;
        entries.remove(&id).map(|e| (id, e.status))
    }

    /// Request cancellation. Returns false if the job had already finished
    /// or was already cancelled.
    pub fn cancel(&self, job_id: JobId) -> Result<bool> {
        let entries = self.shared.board.entries.lock();
        let entry = entries.get(&job_id).ok_or(ServerError::UnknownJob(job_id))?;
        if entry.is_finished() {
            return Ok(false);
        }
        Ok(entry.cancel.cancel(FailureReason::Cancelled))
    }

    /// Drop finished results older than the retention time. Returns how
    /// many were dropped.
    pub fn reap_expired(&self) -> usize {
        let retention = self.shared.config.retention();
        let mut entries = self.shared.board.entries.lock();
        let before = entries.len();
        entries.retain(|id, e| match e.finished_at {
            Some(at) if at.elapsed() >= retention => {
                debug!(job = *id, "unretrieved result expired");
                false
            }
            _ => true,
        });
        before - entries.len()
    }

    /// World-space bounds of a session's instances.
    pub fn model_extents(&self, session_id: SessionId) -> Result<Aabb3> {
        Ok(self.shared.session(session_id)?.extents())
    }

    /// Component names of the model a session was opened on, index-aligned
    /// with [`RayHit::component_id`](crate::RayHit::component_id).
    pub fn component_names(&self, session_id: SessionId) -> Result<Vec<String>> {
        let session = self.shared.session(session_id)?;
        Ok(session.model.components().names().to_vec())
    }

    /// Title from the loaded database's banner.
    pub fn db_title(&self) -> Result<String> {
        Ok(self.shared.model()?.database().banner().title.clone())
    }

    /// Object hierarchy below every tree top of a session's instances,
    /// with the component names recorded on its regions and combinations.
    pub fn item_tree(&self, session_id: SessionId) -> Result<Vec<ItemNode>> {
        let session = self.shared.session(session_id)?;
        let tops: Vec<String> = session
            .instances
            .read()
            .iter()
            .flat_map(|inst| inst.tree_tops.iter().cloned())
            .collect();
        items::item_tree(session.model.database(), tops.iter().map(String::as_str))
    }

    /// Name of a region reported in a hit.
    pub fn region_name(&self, session_id: SessionId, region: RegionRef) -> Result<Option<String>> {
        let session = self.shared.session(session_id)?;
        let instances = session.instances.read();
        Ok(instances
            .get(region.instance)
            .and_then(|inst| inst.prepared.regions.get(region.region))
            .map(|r| r.name.clone()))
    }

    /// Counters since start.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Log the counters and the current model.
    pub fn log_summary(&self) {
        if let Ok(model) = self.shared.model() {
            let banner = model.database().banner();
            info!(
                title = %banner.title,
                components = model.components().len() - 1,
                sessions = self.shared.sessions.read().len(),
                "model summary"
            );
        }
        self.shared.stats.snapshot().log();
    }

    /// Stop accepting work, cancel everything outstanding and close all
    /// sessions.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let cancelled = self.shared.board.cancel_where(FailureReason::Cancelled, |_| true);
        let sessions: Vec<_> = self.shared.sessions.write().drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.close();
        }
        info!(cancelled, sessions = sessions.len(), "server shut down");
        self.log_summary();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::articulation::Axis;
    use crate::components::NO_COMPONENT;
    use crate::testutil::{fixture_db, init_tracing, renamed_components_db, CountingEngine};
    use approx::assert_relative_eq;
    use rtserver_math::{Point3, Vec3};

    fn config(workers: usize) -> ServerConfig {
        ServerConfig {
            workers,
            ..ServerConfig::default()
        }
    }

    fn server_with(engine: CountingEngine, config: ServerConfig, request: LoadRequest) -> Server<CountingEngine> {
        init_tracing();
        let server = Server::new(engine, config).unwrap();
        server.load(fixture_db(), request).unwrap();
        server
    }

    fn top_server() -> Server<CountingEngine> {
        server_with(CountingEngine::new(), config(2), LoadRequest::Top)
    }

    fn articulated_server() -> Server<CountingEngine> {
        server_with(
            CountingEngine::new(),
            config(2),
            LoadRequest::Articulated(ArticulationParams::new()),
        )
    }

    fn ray(p: [f64; 3], d: [f64; 3]) -> XRay {
        XRay::new(Point3::new(p[0], p[1], p[2]), Vec3::new(d[0], d[1], d[2]))
    }

    fn along_x(y: f64) -> XRay {
        ray([-5.0, y, 0.0], [1.0, 0.0, 0.0])
    }

    fn completed(status: JobStatus) -> JobResult {
        match status {
            JobStatus::Completed(r) => r,
            other => panic!("expected completed, got {other:?}"),
        }
    }

    fn run(server: &Server<CountingEngine>, session: SessionId, rays: Vec<XRay>) -> JobResult {
        completed(server.submit_and_wait(session, rays).unwrap())
    }

    fn wait_finished(server: &Server<CountingEngine>, id: JobId) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if server.shared.board.entries.lock().get(&id).is_some_and(BoardEntry::is_finished) {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("job {id} did not finish");
    }

    #[test]
    fn test_results_follow_ray_order_with_a_miss() {
        let server = top_server();
        let s = server.open_session().unwrap();
        let rays = vec![
            along_x(0.0),
            along_x(5.0),
            ray([5.0, 0.0, -5.0], [0.0, 0.0, 1.0]),
        ];
        let result = run(&server, s, rays.clone());

        assert_eq!(result.session_id, s);
        assert!(result.got_some_hits);
        assert_eq!(result.per_ray_results.len(), 3);
        for (r, sent) in result.per_ray_results.iter().zip(&rays) {
            assert_eq!(&r.ray, sent);
        }

        let first = &result.per_ray_results[0].hits;
        assert_eq!(first.len(), 2);
        assert_relative_eq!(first[0].distance, 5.0, epsilon = 1e-9);
        assert_relative_eq!(first[0].line_of_sight, 2.0, epsilon = 1e-9);
        assert_relative_eq!(first[1].distance, 9.0, epsilon = 1e-9);
        assert_eq!(first[0].region_id, 1001);
        assert_eq!(first[1].region_id, 1002);

        assert!(result.per_ray_results[1].hits.is_empty());

        let third = &result.per_ray_results[2].hits;
        assert_eq!(third.len(), 1);
        assert_relative_eq!(third[0].distance, 4.0, epsilon = 1e-9);
        assert!(server.stats().rays_clipped >= 1);
    }

    #[test]
    fn test_unnormalized_directions() {
        let server = top_server();
        let s = server.open_session().unwrap();
        let start = Point3::new(-5.0, 0.0, 0.0);
        let short = XRay {
            point: start,
            direction: Vec3::new(0.1, 0.0, 0.0),
        };
        let long = XRay {
            point: start,
            direction: Vec3::new(4.0, 0.0, 0.0),
        };
        let stalled = XRay {
            point: start,
            direction: Vec3::zeros(),
        };
        let result = run(&server, s, vec![short, long, stalled]);

        // Distances count in lengths of the ray's own direction.
        let hits = &result.per_ray_results[0].hits;
        assert_eq!(hits.len(), 2);
        assert_relative_eq!(hits[0].distance, 50.0, epsilon = 1e-6);
        assert_relative_eq!(hits[1].distance, 90.0, epsilon = 1e-6);

        let hits = &result.per_ray_results[1].hits;
        assert_eq!(hits.len(), 2);
        assert_relative_eq!(hits[0].distance, 1.25, epsilon = 1e-9);

        assert!(result.per_ray_results[2].hits.is_empty());
    }

    #[test]
    fn test_all_misses_report_no_hits() {
        let server = top_server();
        let s = server.open_session().unwrap();
        let result = run(&server, s, vec![along_x(5.0), along_x(-5.0)]);
        assert!(!result.got_some_hits);
        assert_eq!(server.engine().shot_count(), 0);
    }

    #[test]
    fn test_components_and_region_names() {
        let server = top_server();
        let s = server.open_session().unwrap();
        assert_eq!(
            server.component_names(s).unwrap(),
            vec![NO_COMPONENT, "HULL", "TURRET"]
        );
        let result = run(&server, s, vec![along_x(0.0)]);
        let hits = &result.per_ray_results[0].hits;
        assert_eq!(hits[0].component_id, 1);
        assert_eq!(hits[1].component_id, 2);
        assert_eq!(
            server.region_name(s, hits[0].region).unwrap().as_deref(),
            Some("box1.r")
        );
    }

    #[test]
    fn test_air_reported_only_with_use_air() {
        let cfg = ServerConfig {
            use_air: true,
            ..config(2)
        };
        let server = server_with(CountingEngine::new(), cfg, LoadRequest::Top);
        let s = server.open_session().unwrap();
        let hits = run(&server, s, vec![along_x(0.0)]).per_ray_results[0].hits.clone();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[2].region_id, 1003);
        let names = server.component_names(s).unwrap();
        assert_eq!(names[hits[2].component_id], "CREW");
    }

    #[test]
    fn test_max_hits_keeps_nearest() {
        let server = top_server();
        let s = server.open_session().unwrap();
        let id = server
            .submit_job(JobRequest::new(s, vec![along_x(0.0)]).with_max_hits(1))
            .unwrap();
        let result = completed(server.wait(id, Duration::from_secs(10)).unwrap());
        let hits = &result.per_ray_results[0].hits;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].region_id, 1001);
    }

    #[test]
    fn test_engine_failure_yields_empty_ray() {
        let server = server_with(CountingEngine::failing_on_z(), config(2), LoadRequest::Top);
        let s = server.open_session().unwrap();
        let result = run(
            &server,
            s,
            vec![along_x(0.0), ray([5.0, 0.0, -5.0], [0.0, 0.0, 1.0])],
        );
        assert!(result.got_some_hits);
        assert_eq!(result.per_ray_results[0].hits.len(), 2);
        assert!(result.per_ray_results[1].hits.is_empty());
    }

    #[test]
    fn test_articulated_rotation_moves_geometry() {
        let server = articulated_server();
        let s = server.open_session().unwrap();
        let params = ArticulationParams::new().rotate("hull_asm", Axis::Z, 90.0);
        server.rearticulate(s, &params).unwrap();

        let result = run(&server, s, vec![ray([0.0, -5.0, 0.0], [0.0, 1.0, 0.0])]);
        let hits = &result.per_ray_results[0].hits;
        assert_eq!(hits.len(), 2);
        assert_relative_eq!(hits[0].distance, 5.0, epsilon = 1e-9);
        assert_relative_eq!(hits[1].distance, 9.0, epsilon = 1e-9);
        assert_relative_eq!(hits[0].enter_normal, Vec3::new(0.0, -1.0, 0.0), epsilon = 1e-9);
        assert_eq!(hits[0].region.instance, 0);
        assert_eq!(hits[1].region.instance, 1);
    }

    #[test]
    fn test_child_follows_parent() {
        let server = articulated_server();
        let s = server.open_session().unwrap();
        let params = ArticulationParams::new()
            .rotate("hull_asm", Axis::Z, 90.0)
            .translate("turret_asm", Axis::Y, 2.0);
        server.rearticulate(s, &params).unwrap();

        // Turret box now spans x -3..-1, y 4..6.
        let result = run(&server, s, vec![ray([-2.0, -5.0, 0.0], [0.0, 1.0, 0.0])]);
        let hits = &result.per_ray_results[0].hits;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].region_id, 1002);
        assert_relative_eq!(hits[0].distance, 9.0, epsilon = 1e-9);
    }

    #[test]
    fn test_out_of_range_rejected_and_session_unchanged() {
        let server = articulated_server();
        let s = server.open_session().unwrap();
        let before = server.model_extents(s).unwrap();

        for params in [
            ArticulationParams::new().rotate("hull_asm", Axis::Z, 120.0),
            ArticulationParams::new().translate("turret_asm", Axis::Y, 3.0),
            ArticulationParams::new().rotate("turret_asm", Axis::X, 10.0),
            ArticulationParams::new().rotate("hull_asm", Axis::Z, f64::NAN),
            ArticulationParams::new().translate("turret_asm", Axis::X, f64::INFINITY),
        ] {
            assert!(matches!(
                server.rearticulate(s, &params),
                Err(ServerError::OutOfRangeParam { .. })
            ));
        }
        assert!(matches!(
            server.rearticulate(s, &ArticulationParams::new().rotate("nope", Axis::Z, 1.0)),
            Err(ServerError::UnknownAssembly(_))
        ));
        assert_eq!(server.model_extents(s).unwrap(), before);
        let result = run(&server, s, vec![along_x(0.5)]);
        assert_eq!(result.per_ray_results[0].hits.len(), 2);
    }

    #[test]
    fn test_sessions_do_not_share_articulation() {
        let server = articulated_server();
        let moved = server.open_session().unwrap();
        let still = server.open_session().unwrap();
        assert!(still > moved);

        let params = ArticulationParams::new().rotate("hull_asm", Axis::Z, 90.0);
        server.rearticulate(moved, &params).unwrap();

        let rays = vec![along_x(0.5)];
        let a = run(&server, moved, rays.clone());
        let b = run(&server, still, rays);
        assert_eq!(a.per_ray_results[0].hits.len(), 1);
        assert_relative_eq!(a.per_ray_results[0].hits[0].distance, 4.0, epsilon = 1e-9);
        assert_eq!(b.per_ray_results[0].hits.len(), 2);
        assert_relative_eq!(b.per_ray_results[0].hits[0].distance, 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rearticulate_waits_for_running_job() {
        let server = server_with(
            CountingEngine::slow(Duration::from_millis(20)),
            config(2),
            LoadRequest::Articulated(ArticulationParams::new()),
        );
        let s = server.open_session().unwrap();
        let running = server.submit(s, vec![along_x(0.5); 10]).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while server.engine().shot_count() == 0 {
            assert!(Instant::now() < deadline, "job never started");
            std::thread::sleep(Duration::from_millis(1));
        }
        let params = ArticulationParams::new().rotate("hull_asm", Axis::Z, 90.0);
        std::thread::scope(|scope| {
            scope.spawn(|| server.rearticulate(s, &params).unwrap());
        });

        // Every ray of the running job saw the old placement.
        let before = completed(server.wait(running, Duration::from_secs(10)).unwrap());
        for r in &before.per_ray_results {
            assert_eq!(r.hits.len(), 2);
            assert_relative_eq!(r.hits[0].distance, 5.0, epsilon = 1e-9);
        }
        let after = run(&server, s, vec![along_x(0.5)]);
        assert_eq!(after.per_ray_results[0].hits.len(), 1);
        assert_relative_eq!(after.per_ray_results[0].hits[0].distance, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_reload_keeps_session_components() {
        let server = top_server();
        let old = server.open_session().unwrap();
        server
            .load(renamed_components_db(), LoadRequest::Objects(vec!["box1.r".into()]))
            .unwrap();
        let new = server.open_session().unwrap();

        let hit = run(&server, old, vec![along_x(0.0)]).per_ray_results[0].hits[0].clone();
        assert_eq!(hit.region_id, 1001);
        assert_eq!(server.component_names(old).unwrap()[hit.component_id], "HULL");

        let hit = run(&server, new, vec![along_x(0.0)]).per_ray_results[0].hits[0].clone();
        assert_eq!(hit.region_id, 1001);
        assert_eq!(hit.component_id, 2);
        assert_eq!(
            server.component_names(new).unwrap(),
            vec![NO_COMPONENT, "ENGINE", "HULL"]
        );
        assert_eq!(server.db_title().unwrap(), "renamed");
    }

    #[test]
    fn test_db_title_and_item_tree() {
        let server = articulated_server();
        assert_eq!(server.db_title().unwrap(), "fixture");
        let s = server.open_session().unwrap();

        let tree = server.item_tree(s).unwrap();
        let names: Vec<_> = tree.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["hull", "turret"]);
        let hull_region = &tree[0].children[0];
        assert_eq!(hull_region.name, "box1.r");
        assert_eq!(hull_region.component.as_deref(), Some("HULL"));
        assert_eq!(tree[1].children[0].component.as_deref(), Some("TURRET"));

        let server = top_server();
        let s = server.open_session().unwrap();
        let tree = server.item_tree(s).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].name, "all");
        assert_eq!(tree[0].children.len(), 3);
    }

    #[test]
    fn test_prepared_contexts_are_shared() {
        let server = articulated_server();
        let after_load = server.engine().prepare_count();
        assert_eq!(after_load, 2);

        let a = server.open_session().unwrap();
        let b = server.open_session().unwrap();
        server
            .rearticulate(a, &ArticulationParams::new().rotate("hull_asm", Axis::Z, 45.0))
            .unwrap();
        server
            .rearticulate(b, &ArticulationParams::new().rotate("turret_asm", Axis::Z, -30.0))
            .unwrap();
        assert_eq!(server.engine().prepare_count(), after_load);
    }

    #[test]
    fn test_objects_model_cannot_articulate() {
        let server = server_with(
            CountingEngine::new(),
            config(1),
            LoadRequest::Objects(vec!["box1.r".into()]),
        );
        let s = server.open_session().unwrap();
        assert!(matches!(
            server.rearticulate(s, &ArticulationParams::new()),
            Err(ServerError::ArticulationWithObjects)
        ));
        let result = run(&server, s, vec![along_x(0.0)]);
        assert_eq!(result.per_ray_results[0].hits.len(), 1);
    }

    #[test]
    fn test_cancel_fails_job() {
        let server = server_with(
            CountingEngine::slow(Duration::from_millis(20)),
            config(1),
            LoadRequest::Top,
        );
        let s = server.open_session().unwrap();
        let id = server.submit(s, vec![along_x(0.0); 50]).unwrap();
        assert!(server.cancel(id).unwrap());
        assert!(!server.cancel(id).unwrap());

        let status = server.wait(id, Duration::from_secs(10)).unwrap();
        assert_eq!(status, JobStatus::Failed(FailureReason::Cancelled));
        assert!(server.engine().shot_count() < 50);
        assert!(matches!(server.poll(id), Err(ServerError::UnknownJob(_))));
    }

    #[test]
    fn test_close_session_fails_outstanding_jobs() {
        let server = server_with(
            CountingEngine::slow(Duration::from_millis(20)),
            config(1),
            LoadRequest::Top,
        );
        let s = server.open_session().unwrap();
        let running = server.submit(s, vec![along_x(0.0); 50]).unwrap();
        let queued = server.submit(s, vec![along_x(0.0); 50]).unwrap();
        server.close_session(s).unwrap();

        for id in [running, queued] {
            let status = server.wait(id, Duration::from_secs(10)).unwrap();
            assert_eq!(status, JobStatus::Failed(FailureReason::SessionClosed));
        }
        assert!(matches!(server.submit(s, vec![along_x(0.0)]), Err(ServerError::UnknownSession(_))));
        assert!(matches!(server.close_session(s), Err(ServerError::UnknownSession(_))));
        assert_eq!(server.stats().jobs_failed, 2);
    }

    #[test]
    fn test_next_result_prefers_lower_queue() {
        let server = top_server();
        let s = server.open_session().unwrap();
        let low = server.submit_to_queue(s, vec![along_x(0.0)], 2).unwrap();
        let high = server.submit_to_queue(s, vec![along_x(0.0)], 0).unwrap();
        wait_finished(&server, low);
        wait_finished(&server, high);

        assert_eq!(server.next_result(s).map(|(id, _)| id), Some(high));
        let (id, status) = server.next_result(s).unwrap();
        assert_eq!(id, low);
        assert!(status.is_finished());
        assert!(server.next_result(s).is_none());
    }

    #[test]
    fn test_poll_pending_then_completed() {
        let server = server_with(
            CountingEngine::slow(Duration::from_millis(30)),
            config(1),
            LoadRequest::Top,
        );
        let s = server.open_session().unwrap();
        let id = server.submit(s, vec![along_x(0.0); 3]).unwrap();
        assert_eq!(server.poll(id).unwrap(), JobStatus::Pending);
        assert_eq!(server.wait(id, Duration::from_millis(1)).unwrap(), JobStatus::Pending);
        let result = completed(server.wait(id, Duration::from_secs(10)).unwrap());
        assert_eq!(result.job_id, id);
        assert!(matches!(server.poll(id), Err(ServerError::UnknownJob(_))));
    }

    #[test]
    fn test_reap_drops_unretrieved_results() {
        let cfg = ServerConfig {
            result_retention_secs: 0,
            ..config(1)
        };
        let server = server_with(CountingEngine::new(), cfg, LoadRequest::Top);
        let s = server.open_session().unwrap();
        let id = server.submit(s, vec![along_x(0.0)]).unwrap();
        wait_finished(&server, id);
        assert_eq!(server.reap_expired(), 1);
        assert!(matches!(server.poll(id), Err(ServerError::UnknownJob(_))));
    }

    #[test]
    fn test_request_validation() {
        let server = Server::new(CountingEngine::new(), config(1)).unwrap();
        assert!(matches!(server.open_session(), Err(ServerError::NoModel)));
        assert!(matches!(server.db_title(), Err(ServerError::NoModel)));
        assert!(matches!(server.component_names(1), Err(ServerError::UnknownSession(1))));
        assert!(matches!(server.item_tree(1), Err(ServerError::UnknownSession(1))));

        server.load(fixture_db(), LoadRequest::Top).unwrap();
        let s = server.open_session().unwrap();
        assert!(matches!(
            server.submit_to_queue(s, vec![along_x(0.0)], 3),
            Err(ServerError::InvalidQueue { queue: 3, queues: 3 })
        ));
        assert!(matches!(server.submit(s + 1, Vec::new()), Err(ServerError::UnknownSession(_))));
        assert!(matches!(server.poll(999), Err(ServerError::UnknownJob(999))));
        assert!(matches!(server.cancel(999), Err(ServerError::UnknownJob(999))));

        let bad = ServerConfig {
            workers: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(Server::new(CountingEngine::new(), bad), Err(ServerError::Config(_))));
    }

    #[test]
    fn test_extents_cover_instances() {
        let server = top_server();
        let s = server.open_session().unwrap();
        let bounds = server.model_extents(s).unwrap();
        assert!(bounds.contains_point(&Point3::new(1.0, 0.0, 0.0)));
        assert!(bounds.contains_point(&Point3::new(8.5, 0.0, 0.0)));
    }

    #[test]
    fn test_shutdown_refuses_work() {
        let server = top_server();
        let s = server.open_session().unwrap();
        run(&server, s, vec![along_x(0.0)]);
        server.shutdown();
        assert!(matches!(server.submit(s, vec![along_x(0.0)]), Err(ServerError::ShutDown)));
        assert!(matches!(server.open_session(), Err(ServerError::ShutDown)));
        let stats = server.stats();
        assert_eq!(stats.jobs_submitted, 1);
        assert_eq!(stats.jobs_completed, 1);
    }
}
