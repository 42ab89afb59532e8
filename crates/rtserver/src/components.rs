//! Component table: maps regions to named components.
//!
//! Regions carrying a component-name attribute are grouped by that name and
//! each distinct name gets a 1-based index. Index 0 means "no component".
//! Ordinary regions are keyed by region ident; air regions by aircode, and
//! only when air is in use.

use std::collections::HashMap;

use rtserver_db::{CombinationHeader, Database, EntryKind};
use rtserver_raytrace::RegionInfo;
use tracing::{debug, info};

use crate::error::Result;

/// Name reported for index 0.
pub const NO_COMPONENT: &str = "No Component Name";

/// Region-to-component lookup for one loaded model.
#[derive(Debug, Clone)]
pub struct ComponentTable {
    names: Vec<String>,
    by_name: HashMap<String, usize>,
    by_ident: HashMap<i32, usize>,
    by_aircode: HashMap<i32, usize>,
    use_air: bool,
}

impl ComponentTable {
    /// An empty table holding only the "no component" entry.
    pub fn new(use_air: bool) -> Self {
        Self {
            names: vec![NO_COMPONENT.to_string()],
            by_name: HashMap::new(),
            by_ident: HashMap::new(),
            by_aircode: HashMap::new(),
            use_air,
        }
    }

    /// Build from every region record in a database.
    pub fn from_database(db: &Database, use_air: bool) -> Result<Self> {
        let mut table = Self::new(use_air);
        for entry in db.directory().entries() {
            if entry.kind != EntryKind::Region {
                continue;
            }
            let granules = db.store().get(entry, 0, 1)?;
            let header = CombinationHeader::decode(&granules[0]);
            table.add(header.region_id, header.aircode, header.component.as_deref());
        }
        info!(components = table.len() - 1, use_air, "component table built");
        Ok(table)
    }

    /// Register one region. Returns the index it maps to.
    pub fn add(&mut self, region_id: i32, aircode: i32, component: Option<&str>) -> usize {
        let Some(name) = component else { return 0 };
        if aircode > 0 && !self.use_air {
            debug!(aircode, component = name, "air region skipped");
            return 0;
        }
        let next = self.names.len();
        let idx = *self.by_name.entry(name.to_string()).or_insert(next);
        if idx == next {
            self.names.push(name.to_string());
        }
        if aircode > 0 {
            self.by_aircode.insert(aircode, idx);
        } else {
            self.by_ident.insert(region_id, idx);
        }
        idx
    }

    /// Component index for a region, 0 if it has none.
    pub fn lookup(&self, region: &RegionInfo) -> usize {
        let found = if region.is_air() {
            if !self.use_air {
                return 0;
            }
            self.by_aircode.get(&region.aircode)
        } else {
            self.by_ident.get(&region.region_id)
        };
        found.copied().unwrap_or(0)
    }

    /// Component name at an index.
    pub fn name(&self, idx: usize) -> Option<&str> {
        self.names.get(idx).map(String::as_str)
    }

    /// All names, index-aligned; element 0 is [`NO_COMPONENT`].
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of entries including index 0.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false: index 0 is always present.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Whether air regions are included.
    pub fn use_air(&self) -> bool {
        self.use_air
    }
}
