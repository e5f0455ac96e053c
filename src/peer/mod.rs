//! The peer facade and RPC glue (`§4.H`): `ping`, `node-by-uuid`, `query`,
//! `query-channel`, `sub-query`, `recur-query`, `iter-n-query`, plus the
//! wire envelopes and the two transport halves (`server`, `client`).

pub mod client;
pub mod facade;
mod io_compat;
pub mod server;

pub use client::{HttpPeerLink, PeerLink};
pub use facade::PeerFacade;
pub use server::serve;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One of the six RPC methods (`§6`).
pub const METHOD_PING: &str = "ping";
/// See [`METHOD_PING`].
pub const METHOD_NODE_BY_UUID: &str = "node-by-uuid";
/// See [`METHOD_PING`].
pub const METHOD_QUERY: &str = "query";
/// See [`METHOD_PING`].
pub const METHOD_SUB_QUERY: &str = "sub-query";
/// See [`METHOD_PING`].
pub const METHOD_RECUR_QUERY: &str = "recur-query";
/// See [`METHOD_PING`].
pub const METHOD_ITER_N_QUERY: &str = "iter-n-query";

/// Request envelope: `{id, method, params}` (`§6`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Caller-chosen correlation id, echoed back in the response.
    pub id: String,
    /// One of the `METHOD_*` constants.
    pub method: String,
    /// Method-specific parameters, as a JSON value.
    pub params: Value,
}

/// Response envelope: `{id, result}` or `{id, error}` (`§6`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Echoes the request's correlation id.
    pub id: String,
    /// Present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Builds a successful response envelope.
    pub fn ok(id: String, result: Value) -> Self {
        Self { id, result: Some(result), error: None }
    }

    /// Builds a failed response envelope from a crate error.
    pub fn err(id: String, err: &crate::error::PlasmaError) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError {
                message: err.to_string(),
                cause: Some(err.code().to_string()),
            }),
        }
    }
}

/// Structured RPC error payload (`§6`, `§7`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcError {
    /// Human-readable message.
    pub message: String,
    /// Machine-readable error code, if known (see [`crate::error::PlasmaError::code`]).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

/// Fixed marker returned by `ping` (`§8` scenario a).
pub const PING_MARKER: &str = "pong";
