//! Sequential writer producing well-formed granule streams.

use std::path::Path;

use crate::error::{DbError, Result};
use crate::record::{
    encode_binary_data, encode_poly_data, encode_poly_head, BinaryHeader, CombinationHeader,
    Granule, IdentRecord, Member, Primitive, RecordKind, Triangle, Units, DB_VERSION,
};

/// Builds a database image one record at a time.
///
/// ```
/// use rtserver_db::{DbWriter, Database, Primitive, Units};
/// use rtserver_math::Point3;
///
/// let mut w = DbWriter::new("demo", Units::Millimeters).unwrap();
/// w.solid("ball.s", &Primitive::Sphere { center: Point3::origin(), radius: 5.0 }).unwrap();
/// let db = Database::from_bytes(w.finish()).unwrap();
/// assert!(db.lookup_quiet("ball.s").is_some());
/// ```
#[derive(Debug, Clone)]
pub struct DbWriter {
    granules: Vec<Granule>,
}

impl DbWriter {
    /// Start a database with an identification record.
    pub fn new(title: &str, units: Units) -> Result<Self> {
        let ident = IdentRecord {
            units: Some(units),
            version: DB_VERSION.to_string(),
            title: title.to_string(),
        };
        Ok(Self {
            granules: vec![ident.encode()?],
        })
    }

    /// Append a raw granule as-is.
    pub fn raw(&mut self, g: Granule) {
        self.granules.push(g);
    }

    /// Append `count` free granules.
    pub fn free(&mut self, count: usize) {
        self.granules
            .extend(std::iter::repeat(Granule::with_kind(RecordKind::Free)).take(count));
    }

    /// Append a primitive solid.
    pub fn solid(&mut self, name: &str, prim: &Primitive) -> Result<()> {
        self.granules.push(prim.encode(name)?);
        Ok(())
    }

    /// Append a polysolid made of triangles.
    pub fn polysolid(&mut self, name: &str, triangles: &[Triangle]) -> Result<()> {
        self.granules.push(encode_poly_head(name)?);
        self.granules.extend(triangles.iter().map(encode_poly_data));
        Ok(())
    }

    /// Append a region.
    pub fn region(
        &mut self,
        name: &str,
        region_id: i32,
        aircode: i32,
        component: Option<&str>,
        members: &[Member],
    ) -> Result<()> {
        self.combination_record(name, true, region_id, aircode, component, members)
    }

    /// Append a plain (non-region) combination.
    pub fn combination(&mut self, name: &str, members: &[Member]) -> Result<()> {
        self.combination_record(name, false, 0, 0, None, members)
    }

    fn combination_record(
        &mut self,
        name: &str,
        is_region: bool,
        region_id: i32,
        aircode: i32,
        component: Option<&str>,
        members: &[Member],
    ) -> Result<()> {
        let member_count = u16::try_from(members.len()).map_err(|_| DbError::Malformed {
            name: name.to_string(),
            reason: format!("{} members exceed the record limit", members.len()),
        })?;
        let header = CombinationHeader {
            name: name.to_string(),
            is_region,
            member_count,
            region_id,
            aircode,
            component: component.map(str::to_string),
        };
        self.granules.push(header.encode()?);
        for member in members {
            self.granules.push(member.encode()?);
        }
        Ok(())
    }

    /// Append an opaque binary object.
    pub fn binary(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let byte_count = u32::try_from(bytes.len()).map_err(|_| DbError::Malformed {
            name: name.to_string(),
            reason: "binary object larger than 4 GiB".into(),
        })?;
        let header = BinaryHeader {
            name: name.to_string(),
            byte_count,
        };
        self.granules.push(header.encode()?);
        self.granules.extend(encode_binary_data(bytes));
        Ok(())
    }

    /// Number of granules written so far.
    pub fn len(&self) -> usize {
        self.granules.len()
    }

    /// Always false: the identification record is written on construction.
    pub fn is_empty(&self) -> bool {
        self.granules.is_empty()
    }

    /// Finish and return the database image.
    pub fn finish(self) -> Vec<u8> {
        self.granules.iter().flat_map(|g| g.0).collect()
    }

    /// Finish and write the image to a file.
    pub fn write_to(self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.finish())?;
        Ok(())
    }
}
