//! Fixtures shared by the server tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rtserver_db::{Database, DbWriter, Member, MemberOp, Primitive, Units};
use rtserver_math::Point3;
use rtserver_raytrace::{
    EngineError, IntersectionEngine, Partition, PreparedGeometry, PrimitiveAccel, PrimitiveEngine,
    PrimitiveScratch, XRay,
};

pub(crate) const GEOMETRY: &str = "\
top {all}
hull_asm {hull} key_pt {0 0 0} zrotate {90 -90 0} children {turret_asm}
turret_asm {turret} key_pt {5 0 0} zrotate {180 -180 0} ytranslate {2 -2} xtranslate {}
";

/// Route `tracing` output to the test harness. Safe to call repeatedly.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Wraps the built-in engine, counting calls and injecting faults.
#[derive(Debug, Default)]
pub(crate) struct CountingEngine {
    inner: PrimitiveEngine,
    pub(crate) prepares: AtomicUsize,
    pub(crate) shots: AtomicUsize,
    fail_on_z: bool,
    delay: Option<Duration>,
}

impl CountingEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Refuse rays travelling mostly along z.
    pub(crate) fn failing_on_z() -> Self {
        Self {
            fail_on_z: true,
            ..Self::default()
        }
    }

    /// Sleep before every shot.
    pub(crate) fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) fn prepare_count(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    pub(crate) fn shot_count(&self) -> usize {
        self.shots.load(Ordering::SeqCst)
    }
}

impl IntersectionEngine for CountingEngine {
    type Accel = PrimitiveAccel;
    type Scratch = PrimitiveScratch;

    fn prepare(
        &self,
        db: &Database,
        tops: &[String],
    ) -> rtserver_raytrace::Result<PreparedGeometry<PrimitiveAccel>> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        self.inner.prepare(db, tops)
    }

    fn new_scratch(&self) -> PrimitiveScratch {
        self.inner.new_scratch()
    }

    fn shoot(
        &self,
        prepared: &PreparedGeometry<PrimitiveAccel>,
        ray: &XRay,
        scratch: &mut PrimitiveScratch,
    ) -> rtserver_raytrace::Result<Vec<Partition>> {
        self.shots.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail_on_z && ray.direction.z.abs() > 0.5 {
            return Err(EngineError::DegenerateRay("refused by test engine".into()));
        }
        self.inner.shoot(prepared, ray, scratch)
    }
}

fn union(name: &str) -> Member {
    Member {
        op: MemberOp::Union,
        name: name.to_string(),
    }
}

fn rpp(w: &mut DbWriter, name: &str, x0: f64, x1: f64) {
    let prim = Primitive::Rpp {
        min: Point3::new(x0, -1.0, -1.0),
        max: Point3::new(x1, 1.0, 1.0),
    };
    w.solid(name, &prim).unwrap();
}

/// Database writer pre-loaded with the hull, turret and air boxes.
///
/// | object | x range | region id | component |
/// |--------|---------|-----------|-----------|
/// | box1.r | 0..2    | 1001      | HULL      |
/// | box2.r | 4..6    | 1002      | TURRET    |
/// | air.r  | 8..9    | 1003, air | CREW      |
pub(crate) fn fixture_writer() -> DbWriter {
    let mut w = DbWriter::new("fixture", Units::Millimeters).unwrap();
    rpp(&mut w, "box1.s", 0.0, 2.0);
    rpp(&mut w, "box2.s", 4.0, 6.0);
    rpp(&mut w, "air.s", 8.0, 9.0);
    w.region("box1.r", 1001, 0, Some("HULL"), &[union("box1.s")]).unwrap();
    w.region("box2.r", 1002, 0, Some("TURRET"), &[union("box2.s")]).unwrap();
    w.region("air.r", 1003, 2, Some("CREW"), &[union("air.s")]).unwrap();
    w.combination("hull", &[union("box1.r")]).unwrap();
    w.combination("turret", &[union("box2.r")]).unwrap();
    w.combination("all", &[union("hull"), union("turret"), union("air.r")]).unwrap();
    w
}

/// The fixture with its geometry source.
pub(crate) fn fixture_db() -> Database {
    let mut w = fixture_writer();
    w.binary("rtserver_data", GEOMETRY.as_bytes()).unwrap();
    Database::from_bytes(w.finish()).unwrap()
}

/// The hull box filed after an ENGINE region, so HULL becomes component 2.
pub(crate) fn renamed_components_db() -> Database {
    let mut w = DbWriter::new("renamed", Units::Millimeters).unwrap();
    rpp(&mut w, "engine.s", 20.0, 22.0);
    rpp(&mut w, "box1.s", 0.0, 2.0);
    w.region("engine.r", 2001, 0, Some("ENGINE"), &[union("engine.s")]).unwrap();
    w.region("box1.r", 1001, 0, Some("HULL"), &[union("box1.s")]).unwrap();
    Database::from_bytes(w.finish()).unwrap()
}
