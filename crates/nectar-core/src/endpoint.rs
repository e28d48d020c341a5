// ── Endpoint contracts and the transport seam ──
//
// An endpoint is the immutable triple (params contract, transport, result
// contract). The transport is supplied per endpoint as an async function;
// this crate never speaks a protocol itself. Returning `Ok(None)` is the
// transport's way of reporting "aborted before completion" — the store
// passes that through without touching any cache.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use nectar_model::{ContractRef, Json};

static NEXT_ENDPOINT_ID: AtomicU64 = AtomicU64::new(1);

/// Failure vocabulary of a transport function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The call observed its cancellation token. Classified as a superseded
    /// attempt, never surfaced as a resource error.
    #[error("request cancelled")]
    Cancelled,

    /// Anything else the transport wants to report. Retryable via
    /// `refetch()`.
    #[error("transport failure: {0}")]
    Failed(String),
}

/// Per-endpoint async request function.
///
/// Implemented for free by closures of the shape
/// `Fn(Json, CancellationToken) -> impl Future<Output = Result<Option<Json>, TransportError>>`.
pub trait Transport: Send + Sync + 'static {
    fn call(
        &self,
        params: Json,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<Option<Json>, TransportError>>;
}

impl<F, Fut> Transport for F
where
    F: Fn(Json, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Json>, TransportError>> + Send + 'static,
{
    fn call(
        &self,
        params: Json,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<Option<Json>, TransportError>> {
        Box::pin(self(params, cancel))
    }
}

/// A typed remote operation: params contract, result contract, transport.
///
/// Created once at startup and shared as `Arc<Endpoint>`; identity is the
/// allocation (a monotonic id), which is what the store keys its
/// per-endpoint registries by.
pub struct Endpoint {
    id: u64,
    name: String,
    params: ContractRef,
    result: ContractRef,
    transport: Arc<dyn Transport>,
}

impl Endpoint {
    pub fn new(
        name: impl Into<String>,
        params: ContractRef,
        result: ContractRef,
        transport: impl Transport,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            params,
            result,
            transport: Arc::new(transport),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params_contract(&self) -> &ContractRef {
        &self.params
    }

    pub fn result_contract(&self) -> &ContractRef {
        &self.result
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
