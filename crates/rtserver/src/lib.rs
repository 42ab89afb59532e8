#![warn(missing_docs)]

//! Concurrent ray-query server over a CSG geometry database.
//!
//! A [`Server`] loads one model from a [`Database`](rtserver_db::Database),
//! optionally placed by the assembly hierarchy in its `rtserver_data`
//! object, and hands out sessions. Each session holds its own articulated
//! copy of the model's instances. Clients submit batches of rays as jobs;
//! a worker pool clips each ray against every instance, fires the
//! survivors through an [`IntersectionEngine`](rtserver_raytrace::IntersectionEngine)
//! and returns one sorted hit list per ray.
//!
//! # Example
//!
//! ```
//! use rtserver::{JobStatus, LoadRequest, Server, ServerConfig};
//! use rtserver_db::{Database, DbWriter, Member, MemberOp, Primitive, Units};
//! use rtserver_math::{Point3, Vec3};
//! use rtserver_raytrace::{PrimitiveEngine, XRay};
//!
//! let mut w = DbWriter::new("demo", Units::Millimeters).unwrap();
//! let cube = Primitive::Rpp { min: Point3::new(-1.0, -1.0, -1.0), max: Point3::new(1.0, 1.0, 1.0) };
//! w.solid("cube.s", &cube).unwrap();
//! w.region("cube.r", 1, 0, None, &[Member { op: MemberOp::Union, name: "cube.s".into() }]).unwrap();
//! let db = Database::from_bytes(w.finish()).unwrap();
//!
//! let server = Server::new(PrimitiveEngine::new(), ServerConfig::default()).unwrap();
//! server.load(db, LoadRequest::Objects(vec!["cube.r".into()])).unwrap();
//! let session = server.open_session().unwrap();
//!
//! let ray = XRay::new(Point3::new(-10.0, 0.0, 0.0), Vec3::x());
//! let JobStatus::Completed(result) = server.submit_and_wait(session, vec![ray]).unwrap() else {
//!     panic!("job failed");
//! };
//! assert_eq!(result.per_ray_results[0].hits[0].distance, 9.0);
//! ```

pub use rtserver_db;
pub use rtserver_math;
pub use rtserver_raytrace;

mod articulation;
mod assembly;
mod components;
mod config;
mod dispatch;
mod error;
mod instance;
mod items;
mod job;
mod model;
mod scratch;
mod server;
mod session;
mod stats;

pub mod transport;

#[cfg(test)]
mod testutil;

pub use articulation::{resolve, ArticulationParams, Axis, JointValues, ResolvedAssembly};
pub use assembly::{
    parse_rtserver_data, split_list, Assembly, AssemblySet, RotationLimit, TranslationLimit,
    TOP_NAMES,
};
pub use components::{ComponentTable, NO_COMPONENT};
pub use config::ServerConfig;
pub use error::{FailureReason, Result, ServerError, TransportError};
pub use instance::Instance;
pub use items::ItemNode;
pub use job::{JobId, JobRequest, JobResult, JobStatus, RayHit, RayResult, RegionRef};
pub use model::{read_geometry_source, LoadRequest, GEOMETRY_SOURCE};
pub use scratch::{ScratchGuard, ScratchPool};
pub use server::Server;
pub use session::SessionId;
pub use stats::StatsSnapshot;
