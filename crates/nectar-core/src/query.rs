// ── Reactive query controller ──
//
// A Query binds a changing parameter source to the resource cache: on every
// parameter change it fingerprints the serialized params, resolves the
// matching resource, applies the fetch policy, and republishes
// loading/error/params/data with `data` as an immutable snapshot.
//
// Lifecycle is observation-driven: the query is inert until `observe()` is
// called and goes back to inert when the last observer guard drops. While
// active, a driver task selects over parameter changes, refetch signals,
// and resource completion.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use nectar_model::{Snapshot, Value, fingerprint, snapshot};

use crate::endpoint::Endpoint;
use crate::error::CoreError;
use crate::policy::FetchPolicy;
use crate::resource::{ListenerId, Resource, UsageGuard};
use crate::store::Store;
use crate::stream::StateStream;

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

/// Hook invoked with `(data, params)` after a successful fetch initiated by
/// this query.
pub type OnFetched = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

/// Per-query configuration.
#[derive(Clone, Default)]
pub struct QueryOptions {
    pub policy: FetchPolicy,
    pub on_fetched: Option<OnFetched>,
}

impl std::fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOptions")
            .field("policy", &self.policy)
            .field("on_fetched", &self.on_fetched.is_some())
            .finish()
    }
}

/// Published query state. `data` is a snapshot, never the live value.
#[derive(Clone, Debug, Default)]
pub struct QueryState {
    pub loading: bool,
    pub error: Option<Arc<CoreError>>,
    pub params: Option<Value>,
    pub data: Option<Snapshot>,
}

/// A reactive controller mapping a changing parameter value to the correct
/// resource. One per UI binding; not shared.
pub struct Query {
    shared: Arc<QueryShared>,
}

/// Keeps the query active while held. Dropping the last guard deactivates
/// the query: the resource listener is detached and parameter tracking
/// stops.
pub struct QueryObserver {
    shared: Arc<QueryShared>,
}

struct QueryShared {
    id: u64,
    store: Store,
    endpoint: Arc<Endpoint>,
    options: QueryOptions,
    params_rx: watch::Receiver<Option<Value>>,
    /// Keeps the channel alive for fixed-params queries.
    _params_tx: Option<watch::Sender<Option<Value>>>,
    state: watch::Sender<QueryState>,
    refetch: Arc<Notify>,
    observers: AtomicUsize,
    driver: Mutex<Option<Driver>>,
}

struct Driver {
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

/// The driver's attachment to the currently bound resource.
#[derive(Default)]
struct BindState {
    resource: Option<Arc<Resource>>,
    listener: Option<ListenerId>,
    guard: Option<UsageGuard>,
    params: Option<Value>,
}

impl Query {
    pub(crate) fn new(
        store: Store,
        endpoint: Arc<Endpoint>,
        params_rx: watch::Receiver<Option<Value>>,
        params_tx: Option<watch::Sender<Option<Value>>>,
        options: QueryOptions,
    ) -> Self {
        let (state, _) = watch::channel(QueryState::default());
        Self {
            shared: Arc::new(QueryShared {
                id: NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed),
                store,
                endpoint,
                options,
                params_rx,
                _params_tx: params_tx,
                state,
                refetch: Arc::new(Notify::new()),
                observers: AtomicUsize::new(0),
                driver: Mutex::new(None),
            }),
        }
    }

    /// Activate the query (on the first observer) and keep it active while
    /// the returned guard lives. Must be called within a tokio runtime.
    ///
    /// The initial bind runs synchronously, so a `cache-only` policy against
    /// an empty cache fails here rather than in the background.
    pub fn observe(&self) -> Result<QueryObserver, CoreError> {
        if self.shared.observers.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Err(err) = QueryShared::activate(&self.shared) {
                self.shared.observers.fetch_sub(1, Ordering::SeqCst);
                return Err(err);
            }
        }
        Ok(QueryObserver {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Whether any observer guard is currently alive.
    pub fn is_observed(&self) -> bool {
        self.shared.observers.load(Ordering::SeqCst) > 0
    }

    /// Current published state (cheap clone).
    pub fn state(&self) -> QueryState {
        self.shared.state.borrow().clone()
    }

    pub fn loading(&self) -> bool {
        self.shared.state.borrow().loading
    }

    pub fn error(&self) -> Option<Arc<CoreError>> {
        self.shared.state.borrow().error.clone()
    }

    pub fn params(&self) -> Option<Value> {
        self.shared.state.borrow().params.clone()
    }

    /// Snapshot of the bound resource's data.
    pub fn data(&self) -> Option<Snapshot> {
        self.shared.state.borrow().data.clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<QueryState> {
        self.shared.state.subscribe()
    }

    /// Stream adapter over [`subscribe`](Self::subscribe).
    pub fn stream(&self) -> StateStream<QueryState> {
        StateStream::new(self.shared.state.subscribe())
    }

    /// Force a fetch on the current binding, regardless of loading state.
    /// Repeated calls while a fetch is pending coalesce; calls while the
    /// query is unobserved are no-ops.
    pub fn refetch(&self) {
        self.shared.refetch.notify_waiters();
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.shared.id)
            .field("endpoint", &self.shared.endpoint.name())
            .field("observed", &self.is_observed())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for QueryObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryObserver")
            .field("query", &self.shared.id)
            .finish()
    }
}

impl Drop for QueryObserver {
    fn drop(&mut self) {
        if self.shared.observers.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.deactivate();
        }
    }
}

impl QueryShared {
    fn activate(shared: &Arc<Self>) -> Result<(), CoreError> {
        debug!(query = shared.id, endpoint = %shared.endpoint.name(), "query activated");
        let mut params_rx = shared.params_rx.clone();
        let mut bind = BindState::default();
        let params = params_rx.borrow_and_update().clone();
        let done = shared.rebind(&mut bind, params)?;
        shared.store.register_query(
            &shared.endpoint,
            shared.id,
            Arc::downgrade(&shared.refetch),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(drive(
            Arc::clone(shared),
            params_rx,
            bind,
            done,
            cancel.clone(),
        ));
        *shared.lock_driver() = Some(Driver {
            cancel,
            _task: task,
        });
        Ok(())
    }

    fn deactivate(&self) {
        debug!(query = self.id, "query deactivated");
        if let Some(driver) = self.lock_driver().take() {
            driver.cancel.cancel();
        }
        self.store.unregister_query(&self.endpoint, self.id);
    }

    /// Rebind to the resource matching `params`. Returns the done receiver
    /// of the fetch round, if one was started.
    fn rebind(
        &self,
        bind: &mut BindState,
        params: Option<Value>,
    ) -> Result<Option<oneshot::Receiver<()>>, CoreError> {
        self.release_binding(bind);
        bind.params = params.clone();

        let Some(params) = params else {
            self.publish(QueryState::default());
            return Ok(None);
        };

        let policy = self.options.policy;
        let raw = self.endpoint.params_contract().serialize(&params)?;
        let key = fingerprint(&raw);
        trace!(query = self.id, fingerprint = %key, %policy, "binding resource");

        let resource = if policy == FetchPolicy::NoCache {
            Resource::new(Arc::clone(&self.endpoint), params.clone(), key.clone())
        } else {
            self.store.resource(&self.endpoint, &key, &params)
        };

        // Readiness is judged before this query attaches its own usage
        // guard, so a resource nobody else observes stays untrusted.
        let ready = resource.is_ready();
        let cached = resource.state();

        bind.resource = Some(Arc::clone(&resource));
        bind.guard = Some(resource.attach());

        let adopt = (ready && policy != FetchPolicy::NetworkOnly)
            || (cached.data.is_some() && policy == FetchPolicy::CacheOnly);
        if adopt {
            self.publish(QueryState {
                loading: false,
                error: cached.error.clone(),
                params: Some(params.clone()),
                data: cached.data.as_deref().map(snapshot),
            });
            if policy != FetchPolicy::CacheAndNetwork {
                return Ok(None);
            }
        }
        if policy == FetchPolicy::CacheOnly {
            return Err(CoreError::MissingCacheData {
                endpoint: self.endpoint.name().to_owned(),
                fingerprint: key,
            });
        }

        Ok(Some(self.begin_fetch(bind, &resource)))
    }

    /// Arm a done listener and start the fetch unless one is already in
    /// flight (that in-flight fetch is the one being deduplicated against).
    fn begin_fetch(&self, bind: &mut BindState, resource: &Arc<Resource>) -> oneshot::Receiver<()> {
        self.state.send_modify(|state| state.loading = true);
        let (id, done) = resource.add_listener();
        bind.listener = Some(id);
        if !resource.claim_loading() {
            self.spawn_fetch(resource);
        }
        done
    }

    fn spawn_fetch(&self, resource: &Arc<Resource>) {
        let store = self.store.clone();
        let resource = Arc::clone(resource);
        let on_fetched = self.options.on_fetched.clone();
        tokio::spawn(async move {
            if let Some(data) = resource.fetch(&store).await {
                if let Some(callback) = on_fetched {
                    callback(&data, resource.params());
                }
            }
        });
    }

    /// Forced fetch for `refetch()`: re-uses the current binding and
    /// restarts the resource fetch even while one is in flight.
    fn force_fetch(&self, bind: &mut BindState) -> Option<oneshot::Receiver<()>> {
        let resource = bind.resource.clone()?;
        bind.params.as_ref()?;
        trace!(query = self.id, "refetch forced");
        if let Some(id) = bind.listener.take() {
            resource.remove_listener(id);
        }
        self.state.send_modify(|state| state.loading = true);
        let (id, done) = resource.add_listener();
        bind.listener = Some(id);
        resource.claim_loading();
        self.spawn_fetch(&resource);
        Some(done)
    }

    /// Republish from the bound resource after its fetch settled.
    fn publish_settled(&self, bind: &mut BindState) {
        bind.listener = None;
        let Some(resource) = &bind.resource else {
            return;
        };
        let state = resource.state();
        self.publish(QueryState {
            loading: false,
            error: state.error,
            params: bind.params.clone(),
            data: state.data.as_deref().map(snapshot),
        });
    }

    fn release_binding(&self, bind: &mut BindState) {
        if let Some(resource) = bind.resource.take() {
            if let Some(id) = bind.listener.take() {
                resource.remove_listener(id);
            }
        }
        bind.listener = None;
        bind.guard = None;
    }

    fn publish(&self, state: QueryState) {
        self.state.send_replace(state);
    }

    fn publish_error(&self, err: CoreError) {
        warn!(query = self.id, error = %err, "query bind failed");
        self.state.send_modify(|state| {
            state.loading = false;
            state.error = Some(Arc::new(err));
        });
    }

    fn lock_driver(&self) -> std::sync::MutexGuard<'_, Option<Driver>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Driver loop for an active query: parameter changes rebind, refetch
/// signals force, resource completion republishes.
async fn drive(
    shared: Arc<QueryShared>,
    mut params_rx: watch::Receiver<Option<Value>>,
    mut bind: BindState,
    mut done: Option<oneshot::Receiver<()>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = params_rx.changed() => {
                if changed.is_err() {
                    // Parameter source dropped: stop tracking, keep state.
                    break;
                }
                let params = params_rx.borrow_and_update().clone();
                match shared.rebind(&mut bind, params) {
                    Ok(next) => done = next,
                    Err(err) => {
                        done = None;
                        shared.publish_error(err);
                    }
                }
            }
            () = shared.refetch.notified() => {
                if let Some(next) = shared.force_fetch(&mut bind) {
                    done = Some(next);
                }
            }
            settled = wait_done(&mut done) => {
                done = None;
                if settled {
                    shared.publish_settled(&mut bind);
                }
            }
        }
    }
    shared.release_binding(&mut bind);
}

/// Resolves when the pending fetch round completes; parks forever when no
/// round is pending (the other branches stay responsive).
async fn wait_done(slot: &mut Option<oneshot::Receiver<()>>) -> bool {
    match slot.as_mut() {
        Some(done) => done.await.is_ok(),
        None => std::future::pending().await,
    }
}
