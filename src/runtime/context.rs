//! Per-query-execution context threaded through every operator task
//! (`§9` "Global state": plumbed explicitly rather than kept as a
//! process-wide singleton).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{PlasmaError, Result};
use crate::graph::GraphAdapter;
use crate::plan::{OpId, Plan};
use crate::pt::PathTuple;

/// Side-channel event reported instead of aborting the whole query (`§7`):
/// a predicate failure, a remote transport hiccup, or an exhausted hop
/// budget all surface here rather than as a fatal error.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// An operator dropped a PT after a failed evaluation.
    Dropped {
        /// Operator that dropped the tuple.
        op: OpId,
        /// Why it was dropped.
        error: PlasmaError,
    },
    /// A remote channel feeding a `receive` op closed, either because the
    /// remote plan finished or because its per-channel timeout elapsed.
    RemoteClosed {
        /// URL of the peer the channel was talking to.
        peer: String,
        /// True if closure was due to timeout rather than normal completion.
        timed_out: bool,
    },
    /// A recursive/iterated plan exceeded its hops-to-live budget.
    HtlExhausted,
}

/// Abstraction over "ship a sub-plan to a remote peer and stream its path
/// tuples back" (`§4.G`/`§4.H`). The operator runtime depends only on this
/// trait, not on any concrete transport, so tests can exercise proxy
/// crossings without a network.
#[async_trait]
pub trait RemoteQuerier: Send + Sync {
    /// Opens a streaming sub-query against `peer_url`, returning a channel
    /// the remote peer's result tuples arrive on.
    async fn sub_query(&self, peer_url: &str, plan: Plan) -> Result<mpsc::Receiver<PathTuple>>;
}

/// A [`RemoteQuerier`] that always fails. Used where no transport has been
/// configured; exercising a proxy crossing against it surfaces
/// `TransportFailure` rather than hanging.
#[derive(Debug, Default)]
pub struct NoRemoteQuerier;

#[async_trait]
impl RemoteQuerier for NoRemoteQuerier {
    async fn sub_query(&self, peer_url: &str, _plan: Plan) -> Result<mpsc::Receiver<PathTuple>> {
        Err(PlasmaError::TransportFailure {
            peer: peer_url.to_string(),
            detail: "no remote transport configured".into(),
        })
    }
}

/// Lightweight per-kind counters, gated by the `PLASMA_PROFILE` environment
/// variable, following `sombra`'s `SOMBRA_PROFILE`-gated profiling.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    enabled: AtomicBool,
    pts_emitted: AtomicU64,
    pts_dropped: AtomicU64,
    remote_crossings: AtomicU64,
}

impl EngineMetrics {
    /// Builds a metrics collector, enabled iff `PLASMA_PROFILE` is set.
    pub fn from_env() -> Self {
        let metrics = Self::default();
        metrics
            .enabled
            .store(std::env::var("PLASMA_PROFILE").is_ok(), Ordering::Relaxed);
        metrics
    }

    pub(crate) fn record_emit(&self) {
        if self.enabled.load(Ordering::Relaxed) {
            self.pts_emitted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_drop(&self) {
        if self.enabled.load(Ordering::Relaxed) {
            self.pts_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_remote_crossing(&self) {
        if self.enabled.load(Ordering::Relaxed) {
            self.remote_crossings.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns `(emitted, dropped, remote_crossings)`.
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.pts_emitted.load(Ordering::Relaxed),
            self.pts_dropped.load(Ordering::Relaxed),
            self.remote_crossings.load(Ordering::Relaxed),
        )
    }
}

/// Shared state for one query execution: the graph adapter, the remote
/// transport seam, the error side-channel, and metrics.
#[derive(Clone)]
pub struct RunContext {
    /// Read surface over the local graph (`§4.A`).
    pub graph: Arc<dyn GraphAdapter>,
    /// Transport seam for proxy crossings (`§4.G`/`§4.H`).
    pub remote: Arc<dyn RemoteQuerier>,
    /// Side channel for per-PT/per-channel errors (`§7`).
    pub events: mpsc::UnboundedSender<EngineEvent>,
    /// Profiling counters.
    pub metrics: Arc<EngineMetrics>,
    /// Bounded channel capacity between adjacent operator tasks.
    pub channel_capacity: usize,
}

impl RunContext {
    /// Reports a dropped PT and records it in the metrics.
    pub fn report_drop(&self, op: OpId, error: PlasmaError) {
        self.metrics.record_drop();
        let _ = self.events.send(EngineEvent::Dropped { op, error });
    }
}
