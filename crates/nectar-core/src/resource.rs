// ── Cached fetch outcomes ──
//
// A Resource is the cached outcome of fetching one endpoint at one fixed
// fingerprint: data / loading / error, published through a `watch` channel.
// Concurrent queries with equal fingerprints share one Resource, which is
// what coalesces their fetches.
//
// Supersession: each `fetch` cancels the previous in-flight call and claims
// a sequence number; only the holder of the newest number applies its
// outcome. An older call that resolves late finds its number stale and
// touches nothing.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use nectar_model::Value;

use crate::endpoint::Endpoint;
use crate::error::CoreError;
use crate::store::Store;
use crate::stream::StateStream;

/// Listener handle returned by [`Resource::add_listener`].
pub type ListenerId = u64;

/// Published state of a resource.
#[derive(Clone, Debug, Default)]
pub struct ResourceState {
    /// Last successful parsed result, possibly containing entity instances.
    pub data: Option<Arc<Value>>,
    /// Whether a fetch is in flight.
    pub loading: bool,
    /// Last real failure. Cancellations never land here.
    pub error: Option<Arc<CoreError>>,
}

/// A single cached fetch outcome for one (endpoint, params) pair.
pub struct Resource {
    endpoint: Arc<Endpoint>,
    params: Value,
    fingerprint: String,
    state: watch::Sender<ResourceState>,
    /// One-shot done listeners, fired and drained on the next resolution.
    listeners: Mutex<Vec<(ListenerId, oneshot::Sender<()>)>>,
    next_listener: AtomicU64,
    /// Explicit usage count, fed by [`UsageGuard`]s held by bound queries.
    attached: AtomicUsize,
    /// Supersession sequence: only the newest fetch applies its outcome.
    fetch_seq: AtomicU64,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Resource {
    pub(crate) fn new(endpoint: Arc<Endpoint>, params: Value, fingerprint: String) -> Arc<Self> {
        let (state, _) = watch::channel(ResourceState::default());
        Arc::new(Self {
            endpoint,
            params,
            fingerprint,
            state,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            attached: AtomicUsize::new(0),
            fetch_seq: AtomicU64::new(0),
            cancel: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Current state (cheap clone; `data` and `error` are `Arc`s).
    pub fn state(&self) -> ResourceState {
        self.state.borrow().clone()
    }

    pub fn data(&self) -> Option<Arc<Value>> {
        self.state.borrow().data.clone()
    }

    pub fn loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn error(&self) -> Option<Arc<CoreError>> {
        self.state.borrow().error.clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ResourceState> {
        self.state.subscribe()
    }

    /// Stream adapter over [`subscribe`](Self::subscribe).
    pub fn stream(&self) -> StateStream<ResourceState> {
        StateStream::new(self.state.subscribe())
    }

    /// Whether anyone currently cares about this resource: an attach guard,
    /// a pending done-listener, a state subscriber, or an observed entity
    /// inside `data`.
    pub fn is_used(&self) -> bool {
        if self.attached.load(Ordering::SeqCst) > 0 {
            return true;
        }
        if !self.lock_listeners().is_empty() {
            return true;
        }
        if self.state.receiver_count() > 0 {
            return true;
        }
        self.state
            .borrow()
            .data
            .as_ref()
            .is_some_and(|data| data.is_observed())
    }

    /// Whether cached data can be adopted without a fetch: used, settled,
    /// and present. An unobserved resource is never ready — stale cache is
    /// only usable where a policy opts into it explicitly.
    pub fn is_ready(&self) -> bool {
        let state = self.state.borrow();
        self.is_used() && !state.loading && state.data.is_some()
    }

    /// Register a one-shot listener fired on the next resolution.
    pub fn add_listener(&self) -> (ListenerId, oneshot::Receiver<()>) {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock_listeners().push((id, tx));
        (id, rx)
    }

    /// Remove a listener. Removing the last one cancels any in-flight
    /// fetch: nobody is waiting, stop wasting work.
    pub fn remove_listener(&self, id: ListenerId) {
        let mut listeners = self.lock_listeners();
        listeners.retain(|(listener, _)| *listener != id);
        let empty = listeners.is_empty();
        drop(listeners);
        if empty {
            self.cancel_in_flight();
        }
    }

    /// Mark this resource as used for as long as the guard lives.
    pub fn attach(self: &Arc<Self>) -> UsageGuard {
        self.attached.fetch_add(1, Ordering::SeqCst);
        UsageGuard {
            resource: Arc::clone(self),
        }
    }

    /// Synchronously mark the resource loading, returning whether a fetch
    /// round was already pending. Claiming before the fetch task first runs
    /// is what lets concurrently binding queries agree on a single fetch.
    pub(crate) fn claim_loading(&self) -> bool {
        let mut already = true;
        self.state.send_modify(|state| {
            if !state.loading {
                already = false;
                state.loading = true;
            }
        });
        already
    }

    /// Run the fetch lifecycle once: cancel the previous in-flight call,
    /// mark loading, perform the request, and apply the outcome unless a
    /// newer fetch superseded this one in the meantime.
    ///
    /// Returns the parsed value on success and `None` for every other
    /// outcome; failures are recorded in the state, never propagated.
    pub async fn fetch(self: &Arc<Self>, store: &Store) -> Option<Arc<Value>> {
        let token = CancellationToken::new();
        {
            let mut slot = self.lock_cancel();
            if let Some(previous) = slot.take() {
                previous.cancel();
            }
            *slot = Some(token.clone());
        }
        let seq = self.fetch_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_modify(|state| state.loading = true);
        trace!(
            endpoint = %self.endpoint.name(),
            fingerprint = %self.fingerprint,
            seq,
            "fetch started"
        );

        let outcome = store.perform(&self.endpoint, &self.params, token).await;

        if self.fetch_seq.load(Ordering::SeqCst) != seq {
            // Superseded: the newer fetch owns the state now.
            trace!(
                endpoint = %self.endpoint.name(),
                fingerprint = %self.fingerprint,
                seq,
                "fetch superseded"
            );
            return None;
        }
        *self.lock_cancel() = None;

        let result = match outcome {
            Ok(Some(value)) => {
                let value = Arc::new(value);
                self.state.send_modify(|state| {
                    state.data = Some(Arc::clone(&value));
                    state.error = None;
                    state.loading = false;
                });
                Some(value)
            }
            Ok(None) => {
                // Aborted before completion: leave any previous error alone.
                self.state.send_modify(|state| state.loading = false);
                None
            }
            Err(err) if err.is_cancellation() => {
                self.state.send_modify(|state| state.loading = false);
                None
            }
            Err(err) => {
                debug!(
                    endpoint = %self.endpoint.name(),
                    fingerprint = %self.fingerprint,
                    error = %err,
                    "fetch failed"
                );
                self.state.send_modify(|state| {
                    state.error = Some(Arc::new(err));
                    state.loading = false;
                });
                None
            }
        };

        self.notify_listeners();
        result
    }

    fn notify_listeners(&self) {
        let drained: Vec<_> = self.lock_listeners().drain(..).collect();
        for (_, tx) in drained {
            let _ = tx.send(());
        }
    }

    fn cancel_in_flight(&self) {
        if let Some(token) = self.lock_cancel().take() {
            token.cancel();
        }
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, oneshot::Sender<()>)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_cancel(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("endpoint", &self.endpoint.name())
            .field("fingerprint", &self.fingerprint)
            .field("loading", &self.loading())
            .finish_non_exhaustive()
    }
}

/// Keeps a resource marked as used while held. Dropped on query rebind or
/// deactivation.
pub struct UsageGuard {
    resource: Arc<Resource>,
}

impl Drop for UsageGuard {
    fn drop(&mut self) {
        self.resource.attached.fetch_sub(1, Ordering::SeqCst);
    }
}
