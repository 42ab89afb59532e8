//! Granule layout and typed record codecs.
//!
//! Every record occupies one or more fixed 128-byte granules. Byte 0 of each
//! granule is its kind tag; multi-byte numbers are little-endian.

use rtserver_math::Point3;

use crate::error::{DbError, Result};

/// Size of one granule in bytes.
pub const GRANULE_SIZE: usize = 128;

/// Capacity of a record name field.
pub const NAME_LEN: usize = 16;

/// Database format version written into identification records.
pub const DB_VERSION: &str = "v4";

/// Payload bytes carried by one binary data granule.
pub const BINARY_CHUNK: usize = GRANULE_SIZE - 1;

const VERSION_FIELD: std::ops::Range<usize> = 2..8;
const TITLE_FIELD: std::ops::Range<usize> = 8..80;
const COMPONENT_FIELD: std::ops::Range<usize> = 32..96;
const PARAMS_AT: usize = 24;

/// Absolute granule address within a record store.
pub type RecordAddr = u64;

/// Record kinds, keyed by the tag in byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Database identification banner.
    Ident,
    /// Free (deleted) granule.
    Free,
    /// Single-granule primitive solid.
    Solid,
    /// First granule of a polysolid.
    PolyHead,
    /// Polysolid member triangle.
    PolyData,
    /// Combination or region header.
    Combination,
    /// Combination member.
    Member,
    /// Opaque binary object header.
    BinaryHead,
    /// Opaque binary object payload.
    BinaryData,
}

impl RecordKind {
    /// Decode a kind tag. Unknown tags yield `None`.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            b'I' => Self::Ident,
            b'F' => Self::Free,
            b'S' => Self::Solid,
            b'P' => Self::PolyHead,
            b'Q' => Self::PolyData,
            b'C' => Self::Combination,
            b'M' => Self::Member,
            b'U' => Self::BinaryHead,
            b'D' => Self::BinaryData,
            _ => return None,
        })
    }

    /// The on-disk tag byte.
    pub fn tag(self) -> u8 {
        match self {
            Self::Ident => b'I',
            Self::Free => b'F',
            Self::Solid => b'S',
            Self::PolyHead => b'P',
            Self::PolyData => b'Q',
            Self::Combination => b'C',
            Self::Member => b'M',
            Self::BinaryHead => b'U',
            Self::BinaryData => b'D',
        }
    }
}

/// One fixed-size storage unit.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Granule(pub [u8; GRANULE_SIZE]);

impl std::fmt::Debug for Granule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Granule")
            .field("tag", &(self.0[0] as char))
            .finish_non_exhaustive()
    }
}

impl Default for Granule {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl Granule {
    /// An all-zero granule (kind tag 0 means "undefined").
    pub fn zeroed() -> Self {
        Self([0; GRANULE_SIZE])
    }

    /// A zeroed granule carrying the given kind tag.
    pub fn with_kind(kind: RecordKind) -> Self {
        let mut g = Self::zeroed();
        g.0[0] = kind.tag();
        g
    }

    /// Raw kind tag.
    pub fn tag(&self) -> u8 {
        self.0[0]
    }

    /// Overwrite the kind tag.
    pub fn set_tag(&mut self, tag: u8) {
        self.0[0] = tag;
    }

    /// Decoded kind, `None` for an unknown tag.
    pub fn kind(&self) -> Option<RecordKind> {
        RecordKind::from_tag(self.0[0])
    }

    /// Name stored at bytes `1..17`.
    pub fn name(&self) -> String {
        self.text(1..1 + NAME_LEN)
    }

    fn text(&self, range: std::ops::Range<usize>) -> String {
        let field = &self.0[range];
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        String::from_utf8_lossy(&field[..end]).into_owned()
    }

    fn put_text(&mut self, range: std::ops::Range<usize>, text: &str) -> Result<()> {
        let max = range.len();
        if text.len() > max {
            return Err(DbError::NameTooLong {
                name: text.to_string(),
                len: text.len(),
                max,
            });
        }
        let field = &mut self.0[range];
        field.fill(0);
        field[..text.len()].copy_from_slice(text.as_bytes());
        Ok(())
    }

    fn f64_at(&self, at: usize) -> f64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.0[at..at + 8]);
        f64::from_le_bytes(b)
    }

    fn put_f64(&mut self, at: usize, v: f64) {
        self.0[at..at + 8].copy_from_slice(&v.to_le_bytes());
    }

    fn point_at(&self, at: usize) -> Point3 {
        Point3::new(self.f64_at(at), self.f64_at(at + 8), self.f64_at(at + 16))
    }

    fn put_point(&mut self, at: usize, p: &Point3) {
        self.put_f64(at, p.x);
        self.put_f64(at + 8, p.y);
        self.put_f64(at + 16, p.z);
    }

    fn u16_at(&self, at: usize) -> u16 {
        u16::from_le_bytes([self.0[at], self.0[at + 1]])
    }

    fn i32_at(&self, at: usize) -> i32 {
        i32::from_le_bytes([self.0[at], self.0[at + 1], self.0[at + 2], self.0[at + 3]])
    }

    fn u32_at(&self, at: usize) -> u32 {
        u32::from_le_bytes([self.0[at], self.0[at + 1], self.0[at + 2], self.0[at + 3]])
    }
}

/// Units code carried by the identification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    /// No units recorded.
    None,
    /// Millimeters.
    Millimeters,
    /// Centimeters.
    Centimeters,
    /// Meters.
    Meters,
    /// Inches.
    Inches,
    /// Feet.
    Feet,
    /// Reserved extra slot.
    Extra,
}

impl Units {
    const TABLE: [Units; 7] = [
        Units::None,
        Units::Millimeters,
        Units::Centimeters,
        Units::Meters,
        Units::Inches,
        Units::Feet,
        Units::Extra,
    ];

    /// Look up a units code (index into the 7-entry table).
    pub fn from_code(code: u8) -> Option<Self> {
        Self::TABLE.get(code as usize).copied()
    }

    /// Index into the units table.
    pub fn code(self) -> u8 {
        Self::TABLE.iter().position(|&u| u == self).unwrap_or(0) as u8
    }

    /// Short display name.
    pub fn name(self) -> &'static str {
        match self {
            Units::None => "none",
            Units::Millimeters => "mm",
            Units::Centimeters => "cm",
            Units::Meters => "m",
            Units::Inches => "in",
            Units::Feet => "ft",
            Units::Extra => "extra",
        }
    }
}

/// Decoded identification record.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentRecord {
    /// Units code; `None` if the code was out of range.
    pub units: Option<Units>,
    /// Format version string.
    pub version: String,
    /// Database title.
    pub title: String,
}

impl IdentRecord {
    /// Decode from an `I` granule.
    pub fn decode(g: &Granule) -> Self {
        Self {
            units: Units::from_code(g.0[1]),
            version: g.text(VERSION_FIELD),
            title: g.text(TITLE_FIELD),
        }
    }

    /// Encode into an `I` granule.
    pub fn encode(&self) -> Result<Granule> {
        let mut g = Granule::with_kind(RecordKind::Ident);
        g.0[1] = self.units.map_or(0, Units::code);
        g.put_text(VERSION_FIELD, &self.version)?;
        g.put_text(TITLE_FIELD, &self.title)?;
        Ok(g)
    }
}

/// Primitive solid parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    /// Right parallelepiped (axis-aligned box).
    Rpp {
        /// Minimum corner.
        min: Point3,
        /// Maximum corner.
        max: Point3,
    },
    /// Sphere.
    Sphere {
        /// Center.
        center: Point3,
        /// Radius.
        radius: f64,
    },
}

impl Primitive {
    const RPP: u8 = 1;
    const SPHERE: u8 = 2;

    /// Decode the parameters of an `S` granule.
    pub fn decode(g: &Granule) -> Result<Self> {
        match g.0[17] {
            Self::RPP => Ok(Self::Rpp {
                min: g.point_at(PARAMS_AT),
                max: g.point_at(PARAMS_AT + 24),
            }),
            Self::SPHERE => Ok(Self::Sphere {
                center: g.point_at(PARAMS_AT),
                radius: g.f64_at(PARAMS_AT + 24),
            }),
            code => Err(DbError::Malformed {
                name: g.name(),
                reason: format!("unknown primitive code {code}"),
            }),
        }
    }

    /// Encode into an `S` granule with the given name.
    pub fn encode(&self, name: &str) -> Result<Granule> {
        let mut g = Granule::with_kind(RecordKind::Solid);
        g.put_text(1..1 + NAME_LEN, name)?;
        match self {
            Self::Rpp { min, max } => {
                g.0[17] = Self::RPP;
                g.put_point(PARAMS_AT, min);
                g.put_point(PARAMS_AT + 24, max);
            }
            Self::Sphere { center, radius } => {
                g.0[17] = Self::SPHERE;
                g.put_point(PARAMS_AT, center);
                g.put_f64(PARAMS_AT + 24, *radius);
            }
        }
        Ok(g)
    }
}

/// A polysolid facet.
pub type Triangle = [Point3; 3];

/// Encode a polysolid head granule.
pub fn encode_poly_head(name: &str) -> Result<Granule> {
    let mut g = Granule::with_kind(RecordKind::PolyHead);
    g.put_text(1..1 + NAME_LEN, name)?;
    Ok(g)
}

/// Encode one polysolid facet granule.
pub fn encode_poly_data(tri: &Triangle) -> Granule {
    let mut g = Granule::with_kind(RecordKind::PolyData);
    for (i, p) in tri.iter().enumerate() {
        g.put_point(PARAMS_AT + i * 24, p);
    }
    g
}

/// Decode one polysolid facet granule.
pub fn decode_poly_data(g: &Granule) -> Triangle {
    [
        g.point_at(PARAMS_AT),
        g.point_at(PARAMS_AT + 24),
        g.point_at(PARAMS_AT + 48),
    ]
}

/// Combination / region header.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinationHeader {
    /// Record name.
    pub name: String,
    /// Whether this combination is a region.
    pub is_region: bool,
    /// Number of member granules that follow.
    pub member_count: u16,
    /// Region ident number.
    pub region_id: i32,
    /// Air code (0 for non-air regions).
    pub aircode: i32,
    /// Component name attribute, if any.
    pub component: Option<String>,
}

impl CombinationHeader {
    /// Decode a `C` granule.
    pub fn decode(g: &Granule) -> Self {
        let component = g.text(COMPONENT_FIELD);
        Self {
            name: g.name(),
            is_region: g.0[17] == b'R',
            member_count: g.u16_at(18),
            region_id: g.i32_at(20),
            aircode: g.i32_at(24),
            component: (!component.is_empty()).then_some(component),
        }
    }

    /// Encode a `C` granule.
    pub fn encode(&self) -> Result<Granule> {
        let mut g = Granule::with_kind(RecordKind::Combination);
        g.put_text(1..1 + NAME_LEN, &self.name)?;
        g.0[17] = if self.is_region { b'R' } else { b' ' };
        g.0[18..20].copy_from_slice(&self.member_count.to_le_bytes());
        g.0[20..24].copy_from_slice(&self.region_id.to_le_bytes());
        g.0[24..28].copy_from_slice(&self.aircode.to_le_bytes());
        if let Some(component) = &self.component {
            g.put_text(COMPONENT_FIELD, component)?;
        }
        Ok(g)
    }
}

/// Boolean operator attached to a combination member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberOp {
    /// Union.
    Union,
    /// Subtraction.
    Subtract,
    /// Intersection.
    Intersect,
}

impl MemberOp {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'u' => Some(Self::Union),
            b'-' => Some(Self::Subtract),
            b'+' => Some(Self::Intersect),
            _ => None,
        }
    }

    fn byte(self) -> u8 {
        match self {
            Self::Union => b'u',
            Self::Subtract => b'-',
            Self::Intersect => b'+',
        }
    }
}

/// One member of a combination.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    /// Boolean operator.
    pub op: MemberOp,
    /// Name of the referenced record.
    pub name: String,
}

impl Member {
    /// Decode an `M` granule.
    pub fn decode(g: &Granule) -> Result<Self> {
        let name = g.text(2..2 + NAME_LEN);
        let op = MemberOp::from_byte(g.0[1]).ok_or_else(|| DbError::Malformed {
            name: name.clone(),
            reason: format!("unknown member operator {:?}", g.0[1] as char),
        })?;
        Ok(Self { op, name })
    }

    /// Encode an `M` granule.
    pub fn encode(&self) -> Result<Granule> {
        let mut g = Granule::with_kind(RecordKind::Member);
        g.0[1] = self.op.byte();
        g.put_text(2..2 + NAME_LEN, &self.name)?;
        Ok(g)
    }
}

/// Binary object header.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryHeader {
    /// Record name.
    pub name: String,
    /// Payload length in bytes.
    pub byte_count: u32,
}

impl BinaryHeader {
    /// Decode a `U` granule.
    pub fn decode(g: &Granule) -> Self {
        Self {
            name: g.name(),
            byte_count: g.u32_at(20),
        }
    }

    /// Encode a `U` granule.
    pub fn encode(&self) -> Result<Granule> {
        let mut g = Granule::with_kind(RecordKind::BinaryHead);
        g.put_text(1..1 + NAME_LEN, &self.name)?;
        g.0[20..24].copy_from_slice(&self.byte_count.to_le_bytes());
        Ok(g)
    }

    /// Number of data granules following the header.
    pub fn data_granules(&self) -> u32 {
        (self.byte_count as usize).div_ceil(BINARY_CHUNK) as u32
    }
}

/// Encode a binary payload into `D` granules.
pub fn encode_binary_data(bytes: &[u8]) -> Vec<Granule> {
    bytes
        .chunks(BINARY_CHUNK)
        .map(|chunk| {
            let mut g = Granule::with_kind(RecordKind::BinaryData);
            g.0[1..1 + chunk.len()].copy_from_slice(chunk);
            g
        })
        .collect()
}
