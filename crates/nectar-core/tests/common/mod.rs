#![allow(dead_code)]
// Shared fixtures: function-backed test transports (the transport seam is a
// closure, so no HTTP mocking is involved), plus the models and endpoints
// the suites query against.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use nectar_core::endpoint::{Endpoint, Transport, TransportError};
use nectar_core::query::QueryState;
use nectar_model::{Json, Model, Value, schema};

// ── Transports ──────────────────────────────────────────────────────

/// A transport call parked until the test resolves it.
pub struct PendingCall {
    pub params: Json,
    pub cancel: CancellationToken,
    responder: oneshot::Sender<Result<Option<Json>, TransportError>>,
}

impl PendingCall {
    pub fn reply(self, body: Json) {
        let _ = self.responder.send(Ok(Some(body)));
    }

    pub fn fail(self, message: &str) {
        let _ = self.responder.send(Err(TransportError::Failed(message.to_owned())));
    }
}

/// Transport whose calls block until the test resolves them through the
/// returned receiver. Cancellation wins over a late reply, reported as the
/// aborted-before-completion convention (`Ok(None)`).
pub fn pending_transport() -> (impl Transport, mpsc::UnboundedReceiver<PendingCall>) {
    let (calls_tx, calls_rx) = mpsc::unbounded_channel();
    let transport = move |params: Json, cancel: CancellationToken| {
        let (responder, response) = oneshot::channel();
        let delivered = calls_tx
            .send(PendingCall {
                params,
                cancel: cancel.clone(),
                responder,
            })
            .is_ok();
        async move {
            if !delivered {
                return Err(TransportError::Failed("test transport closed".to_owned()));
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => Ok(None),
                outcome = response => outcome.unwrap_or(Err(TransportError::Cancelled)),
            }
        }
    };
    (transport, calls_rx)
}

/// Transport that replies immediately with a fixed body and counts calls.
pub fn counted_transport(body: Json) -> (impl Transport, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let transport = move |_params: Json, _cancel: CancellationToken| {
        seen.fetch_add(1, Ordering::SeqCst);
        let body = body.clone();
        async move { Ok(Some(body)) }
    };
    (transport, calls)
}

pub fn call_count(calls: &Arc<AtomicUsize>) -> usize {
    calls.load(Ordering::SeqCst)
}

// ── Models and endpoints ────────────────────────────────────────────

/// `user` model: identity key `id`, payload field `val`.
pub fn user_model() -> Arc<Model> {
    Model::builder("user")
        .key_field("id", schema::integer())
        .field("val", schema::integer())
        .build()
}

/// Endpoint taking `{id}` params and returning one `user` entity.
pub fn user_endpoint(name: &str, model: &Arc<Model>, transport: impl Transport) -> Arc<Endpoint> {
    Endpoint::new(
        name,
        schema::object([("id", schema::integer())]),
        schema::entity(model),
        transport,
    )
}

pub fn id_params(id: i64) -> Option<Value> {
    Some(Value::object([("id", Value::Int(id))]))
}

pub fn user_key(id: i64) -> nectar_model::Fields {
    [("id".to_owned(), Value::Int(id))].into_iter().collect()
}

// ── Scheduling helpers ──────────────────────────────────────────────

/// Let every ready task on the current-thread runtime run to quiescence.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Wait until the query state watch reports a settled (non-loading) state.
pub async fn settled(rx: &mut watch::Receiver<QueryState>) -> QueryState {
    rx.wait_for(|state| !state.loading)
        .await
        .expect("query state channel alive")
        .clone()
}

/// Integer field of a snapshot, for terse assertions.
pub fn snap_int(state: &QueryState, field: &str) -> Option<i64> {
    state.data.as_ref()?.get(field)?.as_int()
}
