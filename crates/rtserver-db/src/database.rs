//! Record store paired with its directory, plus typed readers.

use std::path::Path;

use crate::directory::{Banner, Directory, DirectoryEntry, EntryKind};
use crate::error::{DbError, Result};
use crate::record::{
    decode_poly_data, BinaryHeader, CombinationHeader, Member, Primitive, Triangle,
};
use crate::store::RecordStore;

/// A combination or region with its member list.
#[derive(Debug, Clone, PartialEq)]
pub struct Combination {
    /// Header fields.
    pub header: CombinationHeader,
    /// Members in record order.
    pub members: Vec<Member>,
}

/// An opened geometry database.
#[derive(Debug)]
pub struct Database {
    store: RecordStore,
    directory: Directory,
}

impl Database {
    /// Open a database file read-only and build its directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_store(RecordStore::open(path, true)?)
    }

    /// Build a database over an in-memory image.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_store(RecordStore::from_bytes(bytes))
    }

    /// Build the directory of an existing store.
    pub fn from_store(store: RecordStore) -> Result<Self> {
        let directory = Directory::build(&store)?;
        Ok(Self { store, directory })
    }

    /// The underlying store.
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// The directory index.
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Title and units banner.
    pub fn banner(&self) -> &Banner {
        self.directory.banner()
    }

    /// Noisy lookup.
    pub fn lookup(&self, name: &str) -> Option<&DirectoryEntry> {
        self.directory.lookup(name)
    }

    /// Quiet lookup.
    pub fn lookup_quiet(&self, name: &str) -> Option<&DirectoryEntry> {
        self.directory.lookup_quiet(name)
    }

    /// Look up a name that must exist.
    pub fn entry(&self, name: &str) -> Result<&DirectoryEntry> {
        self.directory
            .lookup(name)
            .ok_or_else(|| DbError::NotFound(name.to_string()))
    }

    fn expect_kind(entry: &DirectoryEntry, kinds: &[EntryKind], expected: &'static str) -> Result<()> {
        if kinds.contains(&entry.kind) {
            Ok(())
        } else {
            Err(DbError::WrongKind {
                name: entry.name.clone(),
                expected,
                found: entry.kind.as_str(),
            })
        }
    }

    /// Read a primitive solid.
    pub fn solid(&self, entry: &DirectoryEntry) -> Result<Primitive> {
        Self::expect_kind(entry, &[EntryKind::Solid], "solid")?;
        let granules = self.store.get(entry, 0, 1)?;
        Primitive::decode(&granules[0])
    }

    /// Read the facets of a polysolid.
    pub fn polysolid(&self, entry: &DirectoryEntry) -> Result<Vec<Triangle>> {
        Self::expect_kind(entry, &[EntryKind::PolysolidHead], "polysolid")?;
        let granules = self.store.get(entry, 1, entry.length as usize - 1)?;
        Ok(granules.iter().map(decode_poly_data).collect())
    }

    /// Read a combination or region and its members.
    pub fn combination(&self, entry: &DirectoryEntry) -> Result<Combination> {
        Self::expect_kind(
            entry,
            &[EntryKind::Region, EntryKind::Combination],
            "combination",
        )?;
        let granules = self.store.get(entry, 0, entry.length as usize)?;
        let header = CombinationHeader::decode(&granules[0]);
        let members = granules[1..]
            .iter()
            .map(Member::decode)
            .collect::<Result<Vec<_>>>()?;
        if members.len() != header.member_count as usize {
            return Err(DbError::Malformed {
                name: entry.name.clone(),
                reason: format!(
                    "header declares {} members, {} present",
                    header.member_count,
                    members.len()
                ),
            });
        }
        Ok(Combination { header, members })
    }

    /// Read the payload of a binary object.
    pub fn binary(&self, entry: &DirectoryEntry) -> Result<Vec<u8>> {
        Self::expect_kind(entry, &[EntryKind::Binary], "binary")?;
        let granules = self.store.get(entry, 0, entry.length as usize)?;
        let header = BinaryHeader::decode(&granules[0]);
        let mut bytes: Vec<u8> = granules[1..]
            .iter()
            .flat_map(|g| g.0[1..].iter().copied())
            .collect();
        if bytes.len() < header.byte_count as usize {
            return Err(DbError::Malformed {
                name: entry.name.clone(),
                reason: format!("payload truncated: {} of {} bytes", bytes.len(), header.byte_count),
            });
        }
        bytes.truncate(header.byte_count as usize);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MemberOp, Units};
    use crate::writer::DbWriter;
    use rtserver_math::Point3;

    fn fixture() -> Database {
        let mut w = DbWriter::new("fixture", Units::Millimeters).unwrap();
        w.solid(
            "box.s",
            &Primitive::Rpp {
                min: Point3::new(-1.0, -1.0, -1.0),
                max: Point3::new(1.0, 1.0, 1.0),
            },
        )
        .unwrap();
        w.region(
            "box.r",
            7,
            0,
            Some("BOX"),
            &[Member { op: MemberOp::Union, name: "box.s".into() }],
        )
        .unwrap();
        w.binary("rtserver_data", b"top { box.r }\n").unwrap();
        Database::from_bytes(w.finish()).unwrap()
    }

    #[test]
    fn test_read_solid() {
        let db = fixture();
        let prim = db.solid(db.entry("box.s").unwrap()).unwrap();
        assert!(matches!(prim, Primitive::Rpp { .. }));
    }

    #[test]
    fn test_read_region() {
        let db = fixture();
        let comb = db.combination(db.entry("box.r").unwrap()).unwrap();
        assert!(comb.header.is_region);
        assert_eq!(comb.header.region_id, 7);
        assert_eq!(comb.header.component.as_deref(), Some("BOX"));
        assert_eq!(comb.members.len(), 1);
        assert_eq!(comb.members[0].name, "box.s");
    }

    #[test]
    fn test_read_binary() {
        let db = fixture();
        let bytes = db.binary(db.entry("rtserver_data").unwrap()).unwrap();
        assert_eq!(bytes, b"top { box.r }\n");
    }

    #[test]
    fn test_wrong_kind() {
        let db = fixture();
        let err = db.solid(db.entry("box.r").unwrap()).unwrap_err();
        assert!(matches!(err, DbError::WrongKind { expected: "solid", found: "region", .. }));
    }

    #[test]
    fn test_missing_entry() {
        let db = fixture();
        assert!(matches!(db.entry("ghost"), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.g");
        let mut w = DbWriter::new("on disk", Units::Feet).unwrap();
        w.solid(
            "s",
            &Primitive::Sphere {
                center: Point3::origin(),
                radius: 1.0,
            },
        )
        .unwrap();
        w.write_to(&path).unwrap();

        let db = Database::open(&path).unwrap();
        assert_eq!(db.banner().units, Some(Units::Feet));
        assert!(db.store().is_read_only());
        assert!(db.lookup("s").is_some());
    }
}
