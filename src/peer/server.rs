//! The RPC transport's server half (`§4.H`/`§6`): `POST /rpc` for the four
//! request-channel methods and `POST /rpc/stream` for `sub-query`, modeled
//! on `sombra`'s dashboard `packages/api-server` (`ServerState`/`serve`/
//! `build_router` shape, `AppError`-as-`IntoResponse`) but with every
//! response an `{id, result|error}` envelope rather than an HTTP status
//! code, per `§7`: "All request-channel exceptions become `{error}`
//! envelopes".

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::stream;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{PlasmaError, Result};
use crate::model::NodeId;
use crate::plan::Plan;

use super::facade::PeerFacade;
use super::{
    RpcRequest, RpcResponse, METHOD_ITER_N_QUERY, METHOD_NODE_BY_UUID, METHOD_PING, METHOD_QUERY,
    METHOD_RECUR_QUERY, METHOD_SUB_QUERY,
};

type AppState = Arc<PeerFacade>;

/// Errors that can occur while starting or running a peer's RPC listener.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Binding the listener or running the server failed.
    #[error("peer RPC server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Binds `listen_addr` and serves RPC requests against `facade` until a
/// shutdown signal arrives.
pub async fn serve(listen_addr: &str, facade: Arc<PeerFacade>) -> std::result::Result<(), ServeError> {
    let addr: SocketAddr = listen_addr
        .parse()
        .map_err(|err: std::net::AddrParseError| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let app = build_router(facade);
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(%addr, "peer RPC listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn build_router(facade: AppState) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/rpc/stream", post(rpc_stream_handler))
        .with_state(facade)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(err) => tracing::error!(%err, "failed to listen for shutdown signal"),
    }
}

async fn rpc_handler(State(facade): State<AppState>, Json(req): Json<RpcRequest>) -> Json<RpcResponse> {
    let id = req.id.clone();
    match dispatch(&facade, req).await {
        Ok(value) => Json(RpcResponse::ok(id, value)),
        Err(err) => Json(RpcResponse::err(id, &err)),
    }
}

async fn dispatch(facade: &PeerFacade, req: RpcRequest) -> Result<Value> {
    match req.method.as_str() {
        METHOD_PING => Ok(json!(facade.ping().await?)),
        METHOD_NODE_BY_UUID => {
            let id = parse_node_id(&req.params)?;
            let node = facade.node_by_uuid(&id).await?;
            Ok(serde_json::to_value(node)?)
        }
        METHOD_QUERY => {
            let plan: Plan = parse_field(&req.params, "plan")?;
            let seeds = parse_seeds(&req.params)?;
            let records = facade.query(plan, seeds).await?;
            Ok(serde_json::to_value(records)?)
        }
        METHOD_RECUR_QUERY => {
            let plan: Plan = parse_field(&req.params, "plan")?;
            let ids = facade.recur_query(plan).await?;
            Ok(serde_json::to_value(ids)?)
        }
        METHOD_ITER_N_QUERY => {
            let plan: Plan = parse_field(&req.params, "plan")?;
            let ids = facade.iter_n_query(plan).await?;
            Ok(serde_json::to_value(ids)?)
        }
        METHOD_SUB_QUERY => Err(PlasmaError::PlanInvalid(
            "sub-query is a stream-channel method; use POST /rpc/stream".into(),
        )),
        other => Err(PlasmaError::PlanInvalid(format!("unknown RPC method `{other}`"))),
    }
}

/// Handles `sub-query` (`§6`'s stream channel): streams newline-delimited
/// JSON path tuples until the plan's result channel closes, rather than
/// buffering a full response body.
async fn rpc_stream_handler(State(facade): State<AppState>, Json(req): Json<RpcRequest>) -> Response {
    if req.method != METHOD_SUB_QUERY {
        let msg = format!("`{}` is a request-channel method; use POST /rpc", req.method);
        return (StatusCode::BAD_REQUEST, msg).into_response();
    }
    let plan = match parse_field::<Plan>(&req.params, "plan") {
        Ok(plan) => plan,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    let rx = match facade.sub_query(plan).await {
        Ok(rx) => rx,
        Err(err) => return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    };

    let lines = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|pt| {
            let mut line = serde_json::to_vec(&pt).unwrap_or_default();
            line.push(b'\n');
            (Ok::<_, std::io::Error>(line), rx)
        })
    });
    Body::from_stream(lines).into_response()
}

fn parse_node_id(params: &Value) -> Result<NodeId> {
    let raw = params
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| PlasmaError::PlanInvalid("missing `id` parameter".into()))?;
    NodeId::parse(raw).ok_or_else(|| PlasmaError::PlanInvalid(format!("malformed node id `{raw}`")))
}

fn parse_field<T: DeserializeOwned>(params: &Value, field: &str) -> Result<T> {
    let value = params
        .get(field)
        .ok_or_else(|| PlasmaError::PlanInvalid(format!("missing `{field}` parameter")))?;
    Ok(serde_json::from_value(value.clone())?)
}

fn parse_seeds(params: &Value) -> Result<BTreeMap<String, Vec<NodeId>>> {
    match params.get("params") {
        Some(value) => Ok(serde_json::from_value(value.clone())?),
        None => Ok(BTreeMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_field_reports_missing_key() {
        let params = json!({});
        let result: Result<Plan> = parse_field(&params, "plan");
        assert!(result.is_err());
    }

    #[test]
    fn parse_node_id_rejects_malformed_id() {
        let params = json!({ "id": "not-a-uuid" });
        assert!(parse_node_id(&params).is_err());
    }
}
