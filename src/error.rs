//! Crate-wide error type.
//!
//! Every error kind in `§7` of the design ("error handling") maps to one
//! variant here. `PlanInvalid` is the only one callers should treat as
//! fatal; the others are reported per-PT or per-channel by the runtime and
//! do not abort a running query (see [`crate::runtime`]).

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PlasmaError>;

/// Errors produced while planning, executing, or transporting a query.
#[derive(Debug, Error, Clone)]
pub enum PlasmaError {
    /// Plan is structurally broken: missing root, dangling dependency, or an
    /// unknown operator type. The only fatal error kind — surfaced
    /// immediately to the caller rather than dropped per-PT.
    #[error("invalid plan: {0}")]
    PlanInvalid(String),

    /// A node id required by an operator was not found in the graph.
    #[error("graph node not found: {0}")]
    GraphMissing(String),

    /// An expression was evaluated against a property of the wrong type.
    #[error("type mismatch evaluating `{op}`: {detail}")]
    TypeMismatch {
        /// Operator symbol being evaluated.
        op: String,
        /// Human-readable detail of the mismatch.
        detail: String,
    },

    /// The remote peer could not be reached, or the connection dropped
    /// mid-stream.
    #[error("transport failure talking to {peer}: {detail}")]
    TransportFailure {
        /// URL of the peer involved.
        peer: String,
        /// Human-readable detail.
        detail: String,
    },

    /// A wall-clock or per-channel timeout elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A recursive or iterated plan exceeded its hops-to-live budget.
    #[error("hops-to-live exhausted")]
    HtlExhausted,

    /// A structured error returned by a remote peer.
    #[error("remote error from {peer}: {message}")]
    RemoteError {
        /// URL of the peer that returned the error.
        peer: String,
        /// Error message as reported by the remote peer.
        message: String,
    },

    /// Local I/O failure (config loading, listener bind, ...).
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON (de)serialization failure, typically on the wire boundary.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl PlasmaError {
    /// Machine-readable code for the RPC error envelope (`§6`).
    pub fn code(&self) -> &'static str {
        match self {
            PlasmaError::PlanInvalid(_) => "PlanInvalid",
            PlasmaError::GraphMissing(_) => "GraphMissing",
            PlasmaError::TypeMismatch { .. } => "TypeMismatch",
            PlasmaError::TransportFailure { .. } => "TransportFailure",
            PlasmaError::Timeout(_) => "Timeout",
            PlasmaError::HtlExhausted => "HtlExhausted",
            PlasmaError::RemoteError { .. } => "RemoteError",
            PlasmaError::Io(_) => "Io",
            PlasmaError::Serialization(_) => "Serialization",
        }
    }
}

impl From<std::io::Error> for PlasmaError {
    fn from(err: std::io::Error) -> Self {
        PlasmaError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PlasmaError {
    fn from(err: serde_json::Error) -> Self {
        PlasmaError::Serialization(err.to_string())
    }
}
