#![warn(missing_docs)]

//! Ray shooting for the rtserver.
//!
//! # Architecture
//!
//! - [`XRay`] - client ray (point + direction); [`Ray`] caches data for slab tests
//! - [`clip`] - segment-against-box clipping used to reject rays early
//! - [`IntersectionEngine`] - the prepare/shoot contract the server drives
//! - [`PrimitiveEngine`] - built-in engine over boxes, spheres and polysolids
//! - [`bvh`] - bounding volume hierarchy used by the built-in engine
//!
//! # Example
//!
//! ```
//! use rtserver_db::{Database, DbWriter, Member, MemberOp, Primitive, Units};
//! use rtserver_math::{Point3, Vec3};
//! use rtserver_raytrace::{IntersectionEngine, PrimitiveEngine, XRay};
//!
//! let mut w = DbWriter::new("demo", Units::Millimeters).unwrap();
//! w.solid("ball.s", &Primitive::Sphere { center: Point3::origin(), radius: 1.0 }).unwrap();
//! w.region("ball.r", 1, 0, None, &[Member { op: MemberOp::Union, name: "ball.s".into() }]).unwrap();
//! let db = Database::from_bytes(w.finish()).unwrap();
//!
//! let engine = PrimitiveEngine::new();
//! let prepared = engine.prepare(&db, &["ball.r".to_string()]).unwrap();
//! let mut scratch = engine.new_scratch();
//! let ray = XRay::new(Point3::new(-5.0, 0.0, 0.0), Vec3::x());
//! let parts = engine.shoot(&prepared, &ray, &mut scratch).unwrap();
//! assert_eq!(parts.len(), 1);
//! ```

mod engine;
mod error;
mod primitive;
mod ray;

pub mod bvh;
pub mod clip;
pub mod csg;
pub mod intersect;

pub use bvh::Bvh;
pub use clip::{clip_in_place, clip_segment};
pub use engine::{IntersectionEngine, Partition, PreparedGeometry, RegionInfo};
pub use error::{EngineError, Result};
pub use primitive::{PrimitiveAccel, PrimitiveEngine, PrimitiveScratch};
pub use ray::{Ray, XRay};
