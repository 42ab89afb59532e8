#![warn(missing_docs)]

//! Geometry database access for rtserver.
//!
//! A database is a flat sequence of 128-byte granules. [`RecordStore`] moves
//! granules in and out of a backing medium with per-record bounds checks,
//! [`Directory`] scans the store once and indexes every named object, and
//! [`Database`] pairs the two with typed readers for solids, polysolids,
//! combinations and binary objects. [`DbWriter`] builds images for tests and
//! tooling.

mod database;
mod directory;
mod error;
mod record;
mod store;
mod writer;

pub use database::{Combination, Database};
pub use directory::{Banner, Directory, DirectoryEntry, EntryKind};
pub use error::{DbError, Result};
pub use record::{
    decode_poly_data, encode_binary_data, encode_poly_data, encode_poly_head, BinaryHeader,
    CombinationHeader, Granule, IdentRecord, Member, MemberOp, Primitive, RecordAddr, RecordKind,
    Triangle, Units, BINARY_CHUNK, DB_VERSION, GRANULE_SIZE, NAME_LEN,
};
pub use store::{Backing, FileBacking, MemBacking, RecordStore};
pub use writer::DbWriter;
