//! Error types for the record database.

use thiserror::Error;

/// Errors raised by the record store, directory and database readers.
#[derive(Error, Debug)]
pub enum DbError {
    /// The first granule is missing or is not an identification record.
    #[error("corrupt database header: {0}")]
    CorruptHeader(String),

    /// A physical read returned fewer bytes than requested.
    #[error("short read at granule {addr}: wanted {wanted} bytes, got {got}")]
    Read {
        /// Absolute granule address of the read.
        addr: u64,
        /// Bytes requested.
        wanted: usize,
        /// Bytes actually read.
        got: usize,
    },

    /// A physical write failed.
    #[error("write failed at granule {addr}: {source}")]
    Write {
        /// Absolute granule address of the write.
        addr: u64,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// A get/put ran outside the record's granule range.
    #[error("{name}: granules {offset}..{end} outside record of {valid} granules")]
    Bounds {
        /// Record name.
        name: String,
        /// Requested starting offset within the record.
        offset: usize,
        /// Requested end offset (exclusive).
        end: usize,
        /// Number of granules the record spans.
        valid: u32,
    },

    /// The store was opened read-only.
    #[error("database is read-only")]
    ReadOnly,

    /// No directory entry has this name.
    #[error("no such record: {0}")]
    NotFound(String),

    /// The record exists but is not of the expected kind.
    #[error("{name} is a {found} record, expected {expected}")]
    WrongKind {
        /// Record name.
        name: String,
        /// Kind that was expected.
        expected: &'static str,
        /// Kind that was found.
        found: &'static str,
    },

    /// A record body could not be decoded.
    #[error("malformed record {name}: {reason}")]
    Malformed {
        /// Record name.
        name: String,
        /// What was wrong.
        reason: String,
    },

    /// A record name does not fit in a granule name field.
    #[error("name too long ({len} bytes, max {max}): {name}")]
    NameTooLong {
        /// Offending name.
        name: String,
        /// Its length in bytes.
        len: usize,
        /// Field capacity.
        max: usize,
    },

    /// Underlying I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DbError>;
