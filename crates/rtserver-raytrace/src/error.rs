//! Error types for geometry preparation and ray shooting.

use rtserver_db::DbError;
use thiserror::Error;

/// Errors raised by an intersection engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Reading the database failed.
    #[error("database error: {0}")]
    Db(#[from] DbError),

    /// A tree top or member names nothing in the database.
    #[error("object not found: {0}")]
    UnknownObject(String),

    /// An object of a kind that carries no geometry appeared in a tree.
    #[error("{name} is a {kind} record and cannot be raytraced")]
    NotGeometry {
        /// Object name.
        name: String,
        /// Its directory kind.
        kind: &'static str,
    },

    /// A combination contains itself.
    #[error("combination {0} references itself")]
    CyclicTree(String),

    /// The tree tops contain no regions.
    #[error("no regions found under {0:?}")]
    NoRegions(Vec<String>),

    /// The ray cannot be traced.
    #[error("degenerate ray: {0}")]
    DegenerateRay(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
