//! Error types for the ray server.

use rtserver_db::DbError;
use rtserver_raytrace::EngineError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::JobId;
use crate::session::SessionId;

/// Errors returned by server operations.
#[derive(Error, Debug)]
pub enum ServerError {
    /// No open session has this id.
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// No job with this id is pending or awaiting retrieval.
    #[error("unknown job: {0}")]
    UnknownJob(JobId),

    /// An assembly name that was never declared.
    #[error("unknown assembly: {0}")]
    UnknownAssembly(String),

    /// The children graph loops back on itself.
    #[error("assembly {0} is its own descendant")]
    CyclicChildren(String),

    /// An assembly is listed as a child of more than one parent.
    #[error("assembly {child} has two parents: {first} and {second}")]
    MultipleParents {
        /// The child assembly.
        child: String,
        /// First parent seen.
        first: String,
        /// Second parent seen.
        second: String,
    },

    /// An articulation value outside its declared limits.
    #[error("{assembly}: {param} = {value} outside [{min}, {max}]")]
    OutOfRangeParam {
        /// Assembly the value was given for.
        assembly: String,
        /// Parameter key, such as `zrotate`.
        param: &'static str,
        /// Requested value.
        value: f64,
        /// Declared minimum.
        min: f64,
        /// Declared maximum.
        max: f64,
    },

    /// No `top` or `rtserver_tops` assembly.
    #[error("no top assembly declared")]
    MissingTop,

    /// More than one top assembly.
    #[error("more than one top assembly declared")]
    DuplicateTop,

    /// An assembly declared without members.
    #[error("assembly {0} has no members")]
    EmptyAssembly(String),

    /// A load request naming no objects.
    #[error("no objects given to load")]
    NoObjects,

    /// Malformed geometry source text.
    #[error("rtserver_data line {line}: {reason}")]
    Parse {
        /// One-based line number.
        line: usize,
        /// What went wrong.
        reason: String,
    },

    /// The database has no `rtserver_data` object.
    #[error("rtserver_data object not found")]
    MissingGeometrySource,

    /// `rtserver_data` exists but is not a binary object.
    #[error("rtserver_data is a {0} record, expected binary")]
    BadGeometrySource(&'static str),

    /// Articulation asked of a model loaded from explicit objects.
    #[error("model was loaded from explicit objects and cannot be articulated")]
    ArticulationWithObjects,

    /// No model has been loaded yet.
    #[error("no model loaded")]
    NoModel,

    /// A queue index beyond the configured count.
    #[error("queue {queue} out of range, server has {queues}")]
    InvalidQueue {
        /// Requested queue.
        queue: usize,
        /// Configured queue count.
        queues: usize,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The server no longer accepts work.
    #[error("server is shut down")]
    ShutDown,

    /// Database error.
    #[error("database error: {0}")]
    Db(#[from] DbError),

    /// Engine error during preparation.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a job ended in `Failed`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The job was cancelled.
    #[error("cancelled")]
    Cancelled,
    /// Its session was closed before the job completed.
    #[error("session closed")]
    SessionClosed,
    /// Its session no longer existed when the job was dispatched.
    #[error("unknown session")]
    UnknownSession,
}

/// Errors from the result transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The peer closed the stream between frames.
    #[error("connection closed")]
    Closed,

    /// The peer closed the stream inside a frame.
    #[error("connection closed mid-frame after {got} of {wanted} bytes")]
    Truncated {
        /// Bytes of the current part received.
        got: usize,
        /// Bytes expected.
        wanted: usize,
    },

    /// Announced frame size exceeds the receiver's limit.
    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Announced size.
        size: u64,
        /// Limit.
        max: u64,
    },

    /// Payload encoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
