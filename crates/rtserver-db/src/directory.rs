//! Name → location index built by one sequential scan of a record store.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::error::{DbError, Result};
use crate::record::{
    BinaryHeader, CombinationHeader, IdentRecord, RecordAddr, RecordKind, Units, DB_VERSION,
};
use crate::store::RecordStore;

/// Kind of object a directory entry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Identification record.
    Ident,
    /// Free granules.
    Free,
    /// Single-granule primitive solid.
    Solid,
    /// Polysolid spanning a head and its facet granules.
    PolysolidHead,
    /// Region (combination flagged as a region) plus its members.
    Region,
    /// Plain combination plus its members.
    Combination,
    /// Opaque binary object plus its payload.
    Binary,
}

impl EntryKind {
    /// Human-readable kind name.
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Ident => "ident",
            EntryKind::Free => "free",
            EntryKind::Solid => "solid",
            EntryKind::PolysolidHead => "polysolid",
            EntryKind::Region => "region",
            EntryKind::Combination => "combination",
            EntryKind::Binary => "binary",
        }
    }
}

/// One named object in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Unique object name.
    pub name: String,
    /// Address of the object's first granule.
    pub location: RecordAddr,
    /// Number of granules the object spans.
    pub length: u32,
    /// Object kind.
    pub kind: EntryKind,
}

/// Title and units from the identification record(s).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Banner {
    /// Database title.
    pub title: String,
    /// Units, if a valid code was recorded.
    pub units: Option<Units>,
    /// Format version string as found on disk.
    pub version: String,
}

/// In-memory directory of a record store.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    entries: Vec<DirectoryEntry>,
    by_name: HashMap<String, usize>,
    banner: Banner,
}

impl Directory {
    /// Scan `store` from granule 0 and index every named object.
    pub fn build(store: &RecordStore) -> Result<Self> {
        let total = store.len_granules()?;
        let header = store
            .read_granule(0)
            .map_err(|e| DbError::CorruptHeader(e.to_string()))?
            .ok_or_else(|| DbError::CorruptHeader("empty database".into()))?;
        if header.kind() != Some(RecordKind::Ident) {
            return Err(DbError::CorruptHeader(format!(
                "first granule has tag {:?}, expected identification record",
                header.tag() as char
            )));
        }

        let mut dir = Directory::default();
        let mut addr: RecordAddr = 0;
        while addr < total {
            let Some(g) = store.read_granule(addr)? else {
                break;
            };
            match g.kind() {
                Some(RecordKind::Ident) => {
                    dir.set_banner(IdentRecord::decode(&g));
                    addr += 1;
                }
                Some(RecordKind::Free) => addr += 1,
                Some(RecordKind::Solid) => {
                    dir.insert(g.name(), addr, 1, EntryKind::Solid);
                    addr += 1;
                }
                Some(RecordKind::PolyHead) => {
                    let mut span: u64 = 1;
                    while addr + span < total {
                        match store.read_granule(addr + span)? {
                            Some(next) if next.kind() == Some(RecordKind::PolyData) => span += 1,
                            _ => break,
                        }
                    }
                    dir.insert(g.name(), addr, span as u32, EntryKind::PolysolidHead);
                    addr += span;
                }
                Some(RecordKind::Combination) => {
                    let header = CombinationHeader::decode(&g);
                    let kind = if header.is_region {
                        EntryKind::Region
                    } else {
                        EntryKind::Combination
                    };
                    let span = dir.clamp_span(&header.name, addr, 1 + u64::from(header.member_count), total);
                    dir.insert(header.name, addr, span as u32, kind);
                    addr += span;
                }
                Some(RecordKind::BinaryHead) => {
                    let header = BinaryHeader::decode(&g);
                    let span = dir.clamp_span(&header.name, addr, 1 + u64::from(header.data_granules()), total);
                    dir.insert(header.name, addr, span as u32, EntryKind::Binary);
                    addr += span;
                }
                Some(kind @ (RecordKind::Member | RecordKind::PolyData | RecordKind::BinaryData)) => {
                    warn!(addr, ?kind, "stray continuation granule, skipping");
                    addr += 1;
                }
                None => {
                    warn!(addr, tag = g.tag(), "unknown record kind, skipping");
                    addr += 1;
                }
            }
        }

        debug!(entries = dir.entries.len(), granules = total, "directory built");
        Ok(dir)
    }

    fn set_banner(&mut self, ident: IdentRecord) {
        if ident.version != DB_VERSION {
            warn!(
                found = %ident.version,
                expected = DB_VERSION,
                "database format version mismatch"
            );
        }
        info!(
            title = %ident.title,
            units = ident.units.map_or("unknown", Units::name),
            "database banner"
        );
        self.banner = Banner {
            title: ident.title,
            units: ident.units,
            version: ident.version,
        };
    }

    fn clamp_span(&self, name: &str, addr: RecordAddr, span: u64, total: u64) -> u64 {
        if addr + span > total {
            warn!(name, addr, span, total, "record runs past end of database, truncating");
            total - addr
        } else {
            span
        }
    }

    fn insert(&mut self, name: String, location: RecordAddr, length: u32, kind: EntryKind) {
        let entry = DirectoryEntry {
            name: name.clone(),
            location,
            length,
            kind,
        };
        match self.by_name.get(&name) {
            Some(&idx) => {
                warn!(%name, "duplicate record name, later record wins");
                self.entries[idx] = entry;
            }
            None => {
                self.by_name.insert(name, self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Look up a name, logging a diagnostic on a miss.
    pub fn lookup(&self, name: &str) -> Option<&DirectoryEntry> {
        let found = self.lookup_quiet(name);
        if found.is_none() {
            warn!(name, "lookup failed: no such object");
        }
        found
    }

    /// Look up a name without any diagnostic on a miss.
    pub fn lookup_quiet(&self, name: &str) -> Option<&DirectoryEntry> {
        self.by_name.get(name).map(|&idx| &self.entries[idx])
    }

    /// All entries in scan order.
    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no objects were indexed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Banner from the identification record.
    pub fn banner(&self) -> &Banner {
        &self.banner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Granule, Member, MemberOp, Primitive};
    use crate::writer::DbWriter;
    use rtserver_math::Point3;

    fn sphere(r: f64) -> Primitive {
        Primitive::Sphere {
            center: Point3::origin(),
            radius: r,
        }
    }

    #[test]
    fn test_missing_ident_is_corrupt() {
        let store = RecordStore::from_bytes(Granule::with_kind(RecordKind::Solid).0.to_vec());
        assert!(matches!(Directory::build(&store), Err(DbError::CorruptHeader(_))));
        let empty = RecordStore::from_bytes(Vec::new());
        assert!(matches!(Directory::build(&empty), Err(DbError::CorruptHeader(_))));
    }

    #[test]
    fn test_scan_kinds_and_spans() {
        let mut w = DbWriter::new("scan test", Units::Millimeters).unwrap();
        w.solid("ball.s", &sphere(1.0)).unwrap();
        w.free(2);
        w.region(
            "ball.r",
            100,
            0,
            Some("BALL"),
            &[Member { op: MemberOp::Union, name: "ball.s".into() }],
        )
        .unwrap();
        let tri = [Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)];
        w.polysolid("facets", &[tri, tri, tri]).unwrap();
        w.binary("blob", &[1u8; 300]).unwrap();
        w.solid("last.s", &sphere(2.0)).unwrap();

        let store = RecordStore::from_bytes(w.finish());
        let dir = Directory::build(&store).unwrap();

        assert_eq!(dir.banner().title, "scan test");
        assert_eq!(dir.banner().units, Some(Units::Millimeters));

        let ball = dir.lookup("ball.s").unwrap();
        assert_eq!((ball.location, ball.length, ball.kind), (1, 1, EntryKind::Solid));
        let region = dir.lookup("ball.r").unwrap();
        assert_eq!((region.location, region.length, region.kind), (4, 2, EntryKind::Region));
        let poly = dir.lookup("facets").unwrap();
        assert_eq!((poly.location, poly.length, poly.kind), (6, 4, EntryKind::PolysolidHead));
        let blob = dir.lookup("blob").unwrap();
        assert_eq!((blob.location, blob.length, blob.kind), (10, 4, EntryKind::Binary));
        let last = dir.lookup("last.s").unwrap();
        assert_eq!(last.location, 14);
        assert_eq!(dir.len(), 5);
    }

    #[test]
    fn test_unknown_kind_skipped() {
        let mut w = DbWriter::new("unknown", Units::Meters).unwrap();
        w.raw(Granule([b'Z'; crate::record::GRANULE_SIZE]));
        w.solid("after.s", &sphere(1.0)).unwrap();
        let dir = Directory::build(&RecordStore::from_bytes(w.finish())).unwrap();
        assert_eq!(dir.lookup_quiet("after.s").unwrap().location, 2);
    }

    #[test]
    fn test_version_mismatch_not_fatal() {
        let ident = IdentRecord {
            units: Some(Units::Inches),
            version: "v3".into(),
            title: "old".into(),
        };
        let store = RecordStore::from_bytes(ident.encode().unwrap().0.to_vec());
        let dir = Directory::build(&store).unwrap();
        assert_eq!(dir.banner().version, "v3");
        assert!(dir.is_empty());
    }

    #[test]
    fn test_truncated_region_clamped() {
        let mut w = DbWriter::new("trunc", Units::Millimeters).unwrap();
        let header = CombinationHeader {
            name: "cut.r".into(),
            is_region: true,
            member_count: 10,
            region_id: 1,
            aircode: 0,
            component: None,
        };
        w.raw(header.encode().unwrap());
        let dir = Directory::build(&RecordStore::from_bytes(w.finish())).unwrap();
        assert_eq!(dir.lookup_quiet("cut.r").unwrap().length, 1);
    }

    #[test]
    fn test_quiet_and_noisy_miss() {
        let w = DbWriter::new("empty", Units::None).unwrap();
        let dir = Directory::build(&RecordStore::from_bytes(w.finish())).unwrap();
        assert!(dir.lookup("nope").is_none());
        assert!(dir.lookup_quiet("nope").is_none());
    }

    #[test]
    fn test_duplicate_name_later_wins() {
        let mut w = DbWriter::new("dup", Units::Millimeters).unwrap();
        w.solid("twin", &sphere(1.0)).unwrap();
        w.solid("twin", &sphere(2.0)).unwrap();
        let dir = Directory::build(&RecordStore::from_bytes(w.finish())).unwrap();
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.lookup_quiet("twin").unwrap().location, 2);
    }

    #[test]
    fn test_directory_roundtrip_bytes() {
        let mut w = DbWriter::new("roundtrip", Units::Centimeters).unwrap();
        let names = ["a.s", "b.s", "c.s"];
        let prims: Vec<Primitive> = (1..=3).map(|i| sphere(i as f64)).collect();
        for (name, prim) in names.iter().zip(&prims) {
            w.solid(name, prim).unwrap();
        }
        let store = RecordStore::from_bytes(w.finish());
        let dir = Directory::build(&store).unwrap();
        for (name, prim) in names.iter().zip(&prims) {
            let entry = dir.lookup(name).unwrap();
            let got = store.get(entry, 0, entry.length as usize).unwrap();
            assert_eq!(got, vec![prim.encode(name).unwrap()]);
        }
    }
}
