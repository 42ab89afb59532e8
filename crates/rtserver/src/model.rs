//! A loaded geometry model and its prepared contexts.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rtserver_db::{Database, EntryKind};
use rtserver_math::Transform;
use rtserver_raytrace::{IntersectionEngine, PreparedGeometry};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::articulation::{resolve, ArticulationParams};
use crate::assembly::AssemblySet;
use crate::components::ComponentTable;
use crate::error::{Result, ServerError};
use crate::instance::Instance;

/// Name of the geometry source object.
pub const GEOMETRY_SOURCE: &str = "rtserver_data";

/// What to instance when loading a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LoadRequest {
    /// One un-articulated instance of the named objects.
    Objects(Vec<String>),
    /// One instance of the top assembly from the geometry source.
    Top,
    /// One instance per non-top assembly, placed by these joint values.
    Articulated(ArticulationParams),
}

/// Read and validate the geometry source of a database.
pub fn read_geometry_source(db: &Database) -> Result<AssemblySet> {
    let entry = db
        .lookup_quiet(GEOMETRY_SOURCE)
        .ok_or(ServerError::MissingGeometrySource)?;
    if entry.kind != EntryKind::Binary {
        return Err(ServerError::BadGeometrySource(entry.kind.as_str()));
    }
    let bytes = db.binary(entry)?;
    AssemblySet::parse(&String::from_utf8_lossy(&bytes))
}

pub(crate) struct Model<A> {
    db: Arc<Database>,
    assemblies: Option<AssemblySet>,
    components: Arc<ComponentTable>,
    default_instances: Vec<Instance<A>>,
    // Serializes prepare and caches contexts by tree tops.
    prepared: Mutex<HashMap<Vec<String>, Arc<PreparedGeometry<A>>>>,
}

impl<A: Send + Sync + 'static> Model<A> {
    pub(crate) fn load<E>(engine: &E, db: Arc<Database>, request: LoadRequest, use_air: bool) -> Result<Self>
    where
        E: IntersectionEngine<Accel = A>,
    {
        let components = Arc::new(ComponentTable::from_database(&db, use_air)?);
        let assemblies = match &request {
            LoadRequest::Objects(_) => None,
            LoadRequest::Top | LoadRequest::Articulated(_) => Some(read_geometry_source(&db)?),
        };
        let mut model = Self {
            db,
            assemblies,
            components,
            default_instances: Vec::new(),
            prepared: Mutex::new(HashMap::new()),
        };

        model.default_instances = match request {
            LoadRequest::Objects(objects) => {
                if objects.is_empty() {
                    return Err(ServerError::NoObjects);
                }
                let prepared = model.prepare(engine, &objects)?;
                vec![Instance::new(objects.join(" "), objects, prepared, Transform::Identity)]
            }
            LoadRequest::Top => {
                let top = model
                    .assemblies
                    .as_ref()
                    .ok_or(ServerError::MissingGeometrySource)?
                    .top()
                    .clone();
                let prepared = model.prepare(engine, &top.members)?;
                vec![Instance::new(top.name, top.members, prepared, Transform::Identity)]
            }
            LoadRequest::Articulated(params) => model.articulate(engine, &params)?,
        };

        info!(
            title = %model.db.banner().title,
            instances = model.default_instances.len(),
            "model loaded"
        );
        Ok(model)
    }

    /// Prepared context for a set of tree tops, building it on first use.
    pub(crate) fn prepare<E>(&self, engine: &E, tops: &[String]) -> Result<Arc<PreparedGeometry<A>>>
    where
        E: IntersectionEngine<Accel = A>,
    {
        let mut cache = self.prepared.lock();
        if let Some(p) = cache.get(tops) {
            debug!(?tops, "reusing prepared context");
            return Ok(Arc::clone(p));
        }
        let prepared = Arc::new(engine.prepare(&self.db, tops)?);
        cache.insert(tops.to_vec(), Arc::clone(&prepared));
        Ok(prepared)
    }

    /// Instances for the non-top assemblies under the given joint values.
    pub(crate) fn articulate<E>(&self, engine: &E, params: &ArticulationParams) -> Result<Vec<Instance<A>>>
    where
        E: IntersectionEngine<Accel = A>,
    {
        let set = self
            .assemblies
            .as_ref()
            .ok_or(ServerError::ArticulationWithObjects)?;
        resolve(set, params)?
            .into_iter()
            .filter(|r| !r.is_top)
            .map(|r| {
                let prepared = self.prepare(engine, &r.members)?;
                Ok(Instance::new(r.name, r.members, prepared, r.transform))
            })
            .collect()
    }

    pub(crate) fn default_instances(&self) -> &[Instance<A>] {
        &self.default_instances
    }

    pub(crate) fn components(&self) -> &Arc<ComponentTable> {
        &self.components
    }

    pub(crate) fn database(&self) -> &Arc<Database> {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::articulation::Axis;
    use crate::testutil::{fixture_db, fixture_writer, CountingEngine};
    use rtserver_db::{Primitive, Units};
    use rtserver_math::Point3;

    fn load(db: Database, request: LoadRequest) -> Result<Model<rtserver_raytrace::PrimitiveAccel>> {
        Model::load(&CountingEngine::new(), Arc::new(db), request, false)
    }

    #[test]
    fn test_geometry_source_missing_or_wrong_kind() {
        let plain = Database::from_bytes(fixture_writer().finish()).unwrap();
        assert!(matches!(
            read_geometry_source(&plain),
            Err(ServerError::MissingGeometrySource)
        ));

        let mut w = fixture_writer();
        let prim = Primitive::Sphere {
            center: Point3::origin(),
            radius: 1.0,
        };
        w.solid(GEOMETRY_SOURCE, &prim).unwrap();
        let wrong = Database::from_bytes(w.finish()).unwrap();
        assert!(matches!(
            read_geometry_source(&wrong),
            Err(ServerError::BadGeometrySource("solid"))
        ));
    }

    #[test]
    fn test_objects_load_needs_no_geometry_source() {
        let plain = Database::from_bytes(fixture_writer().finish()).unwrap();
        let model = load(plain, LoadRequest::Objects(vec!["box1.r".into(), "box2.r".into()])).unwrap();
        let inst = &model.default_instances()[0];
        assert_eq!(inst.name, "box1.r box2.r");
        assert_eq!(inst.prepared.regions.len(), 2);
        assert!(matches!(
            load(
                Database::from_bytes(fixture_writer().finish()).unwrap(),
                LoadRequest::Objects(Vec::new())
            ),
            Err(ServerError::NoObjects)
        ));
        assert!(matches!(
            load(
                Database::from_bytes(fixture_writer().finish()).unwrap(),
                LoadRequest::Top
            ),
            Err(ServerError::MissingGeometrySource)
        ));
    }

    #[test]
    fn test_top_and_articulated_modes() {
        let top = load(fixture_db(), LoadRequest::Top).unwrap();
        assert_eq!(top.default_instances().len(), 1);
        assert_eq!(top.default_instances()[0].tree_tops, vec!["all".to_string()]);

        let params = ArticulationParams::new().rotate("turret_asm", Axis::Z, 45.0);
        let art = load(fixture_db(), LoadRequest::Articulated(params)).unwrap();
        let names: Vec<_> = art.default_instances().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["hull_asm", "turret_asm"]);
        assert!(art.default_instances()[0].transform.is_identity());
        assert!(!art.default_instances()[1].transform.is_identity());
    }

    #[test]
    fn test_prepare_is_cached_per_tree_tops() {
        let engine = CountingEngine::new();
        let model = Model::load(&engine, Arc::new(fixture_db()), LoadRequest::Top, false).unwrap();
        assert_eq!(engine.prepare_count(), 1);
        let again = model.prepare(&engine, &["all".to_string()]).unwrap();
        assert!(Arc::ptr_eq(&again, &model.default_instances()[0].prepared));
        assert_eq!(engine.prepare_count(), 1);
        model.prepare(&engine, &["hull".to_string()]).unwrap();
        assert_eq!(engine.prepare_count(), 2);
        assert_eq!(model.database().banner().units, Some(Units::Millimeters));
    }
}
