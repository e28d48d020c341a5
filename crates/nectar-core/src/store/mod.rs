// ── Store registries ──
//
// The top-level container: per endpoint, the fingerprint→Resource map and
// the set of live queries; per entity model, the identity map. `perform` is
// the single chokepoint where every response — cached, one-shot, or mocked —
// is parsed with the store as the explicit entity resolver, so overlapping
// entities from different endpoints converge on the same instances.
//
// No eviction: resources and instances live for the store's lifetime. A
// bounded layer can be added on top without changing observable semantics.

mod entities;

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use nectar_model::{
    EntityInstance, EntityResolver, Fields, Model, ParseCx, SchemaError, Value,
};

use crate::endpoint::Endpoint;
use crate::error::CoreError;
use crate::mock::Mocks;
use crate::query::{Query, QueryOptions};
use crate::resource::Resource;
use entities::EntityRegistry;

/// The top-level container. Cheaply cloneable; clones share all registries.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    /// Model id → identity map.
    entities: DashMap<u64, Arc<EntityRegistry>>,
    /// Endpoint id → fingerprint → resource.
    resources: DashMap<u64, Arc<DashMap<String, Arc<Resource>>>>,
    /// Endpoint id → query id → refetch hook of a live query.
    queries: DashMap<u64, Arc<DashMap<u64, Weak<Notify>>>>,
    /// When set, `perform` short-circuits the transport through handlers.
    mocks: Option<Arc<Mocks>>,
}

impl Store {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A store whose requests are served by mock handlers instead of the
    /// endpoints' transports. Results still flow through serialize → parse →
    /// entity normalization, exactly like wire data.
    pub fn mocked(mocks: Arc<Mocks>) -> Self {
        Self::build(Some(mocks))
    }

    fn build(mocks: Option<Arc<Mocks>>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                entities: DashMap::new(),
                resources: DashMap::new(),
                queries: DashMap::new(),
                mocks,
            }),
        }
    }

    // ── Queries ──────────────────────────────────────────────────

    /// Create a query bound to a changing parameter source. `None` params
    /// unbind the query. The query is inert until observed.
    pub fn query(
        &self,
        endpoint: &Arc<Endpoint>,
        params: watch::Receiver<Option<Value>>,
        options: QueryOptions,
    ) -> Query {
        Query::new(self.clone(), Arc::clone(endpoint), params, None, options)
    }

    /// Create a query with fixed parameters. The parameter channel is owned
    /// by the query, so the binding layer has nothing to keep alive.
    pub fn query_value(
        &self,
        endpoint: &Arc<Endpoint>,
        params: Option<Value>,
        options: QueryOptions,
    ) -> Query {
        let (tx, rx) = watch::channel(params);
        Query::new(self.clone(), Arc::clone(endpoint), rx, Some(tx), options)
    }

    // ── One-shot requests ────────────────────────────────────────

    /// Perform an endpoint once, bypassing the resource cache but still
    /// normalizing entities through the identity maps. Returns `Ok(None)`
    /// when the transport reports the request was aborted before
    /// completion.
    pub async fn request(
        &self,
        endpoint: &Arc<Endpoint>,
        params: &Value,
    ) -> Result<Option<Value>, CoreError> {
        self.perform(endpoint, params, CancellationToken::new()).await
    }

    /// The single serialize → transport → parse → normalize chokepoint.
    pub(crate) async fn perform(
        &self,
        endpoint: &Arc<Endpoint>,
        params: &Value,
        cancel: CancellationToken,
    ) -> Result<Option<Value>, CoreError> {
        if let Some(mocks) = &self.inner.mocks {
            return self.perform_mocked(mocks, endpoint, params);
        }

        let raw = endpoint.params_contract().serialize(params)?;
        debug!(endpoint = %endpoint.name(), "issuing request");
        match endpoint.transport().call(raw, cancel).await {
            Ok(Some(body)) => {
                let mut cx = ParseCx::new(self);
                let value = endpoint.result_contract().parse(&mut cx, &body)?;
                trace!(endpoint = %endpoint.name(), "response parsed and normalized");
                Ok(Some(value))
            }
            Ok(None) => {
                trace!(endpoint = %endpoint.name(), "request aborted before completion");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn perform_mocked(
        &self,
        mocks: &Arc<Mocks>,
        endpoint: &Arc<Endpoint>,
        params: &Value,
    ) -> Result<Option<Value>, CoreError> {
        let handler = mocks
            .handler(endpoint)
            .ok_or_else(|| CoreError::EndpointNotMocked(endpoint.name().to_owned()))?;
        let result = (handler.as_ref())(params.clone())?;
        let raw = endpoint.result_contract().serialize(&result)?;
        let mut cx = ParseCx::new(self);
        Ok(Some(endpoint.result_contract().parse(&mut cx, &raw)?))
    }

    // ── Resource registry ────────────────────────────────────────

    /// Get-or-create the shared resource for a fingerprint. This is the
    /// dedup point: concurrent queries with equal fingerprints land on the
    /// same resource and share one in-flight fetch.
    pub(crate) fn resource(
        &self,
        endpoint: &Arc<Endpoint>,
        fingerprint: &str,
        params: &Value,
    ) -> Arc<Resource> {
        let registry = self.endpoint_resources(endpoint);
        if let Some(existing) = registry.get(fingerprint) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            registry
                .entry(fingerprint.to_owned())
                .or_insert_with(|| {
                    trace!(
                        endpoint = %endpoint.name(),
                        fingerprint = %fingerprint,
                        "resource created"
                    );
                    Resource::new(Arc::clone(endpoint), params.clone(), fingerprint.to_owned())
                })
                .value(),
        )
    }

    /// Look up a cached resource without creating one.
    pub fn cached_resource(
        &self,
        endpoint: &Arc<Endpoint>,
        fingerprint: &str,
    ) -> Option<Arc<Resource>> {
        self.inner
            .resources
            .get(&endpoint.id())
            .and_then(|registry| registry.get(fingerprint).map(|r| Arc::clone(r.value())))
    }

    /// Number of cached resources for an endpoint.
    pub fn resource_count(&self, endpoint: &Arc<Endpoint>) -> usize {
        self.inner
            .resources
            .get(&endpoint.id())
            .map_or(0, |registry| registry.len())
    }

    // ── Entity registry ──────────────────────────────────────────

    /// Resolve a live instance by its identity-key fields.
    pub fn instance(
        &self,
        model: &Arc<Model>,
        key: &Fields,
    ) -> Result<Option<Arc<EntityInstance>>, CoreError> {
        let cache_key = model.cache_key(key)?;
        Ok(self
            .inner
            .entities
            .get(&model.id())
            .and_then(|registry| registry.get(&cache_key)))
    }

    /// All live instances of a model.
    pub fn instances(&self, model: &Arc<Model>) -> Vec<Arc<EntityInstance>> {
        self.inner
            .entities
            .get(&model.id())
            .map_or_else(Vec::new, |registry| registry.values())
    }

    /// Number of live instances of a model.
    pub fn instance_count(&self, model: &Arc<Model>) -> usize {
        self.inner
            .entities
            .get(&model.id())
            .map_or(0, |registry| registry.len())
    }

    // ── Live-query registry ──────────────────────────────────────

    /// Force every live query of an endpoint to refetch.
    pub fn refetch_endpoint(&self, endpoint: &Arc<Endpoint>) {
        let Some(registry) = self
            .inner
            .queries
            .get(&endpoint.id())
            .map(|r| Arc::clone(r.value()))
        else {
            return;
        };
        registry.retain(|_, hook| match hook.upgrade() {
            Some(refetch) => {
                refetch.notify_waiters();
                true
            }
            None => false,
        });
    }

    /// Number of live (observed) queries for an endpoint.
    pub fn query_count(&self, endpoint: &Arc<Endpoint>) -> usize {
        self.inner
            .queries
            .get(&endpoint.id())
            .map_or(0, |registry| registry.len())
    }

    pub(crate) fn register_query(
        &self,
        endpoint: &Arc<Endpoint>,
        query_id: u64,
        refetch: Weak<Notify>,
    ) {
        self.endpoint_queries(endpoint).insert(query_id, refetch);
    }

    pub(crate) fn unregister_query(&self, endpoint: &Arc<Endpoint>, query_id: u64) {
        if let Some(registry) = self.inner.queries.get(&endpoint.id()) {
            registry.remove(&query_id);
        }
    }

    // ── Private helpers ──────────────────────────────────────────

    fn endpoint_resources(&self, endpoint: &Arc<Endpoint>) -> Arc<DashMap<String, Arc<Resource>>> {
        Arc::clone(
            self.inner
                .resources
                .entry(endpoint.id())
                .or_default()
                .value(),
        )
    }

    fn endpoint_queries(&self, endpoint: &Arc<Endpoint>) -> Arc<DashMap<u64, Weak<Notify>>> {
        Arc::clone(self.inner.queries.entry(endpoint.id()).or_default().value())
    }

    fn model_registry(&self, model: &Arc<Model>) -> Arc<EntityRegistry> {
        Arc::clone(
            self.inner
                .entities
                .entry(model.id())
                .or_insert_with(|| Arc::new(EntityRegistry::new()))
                .value(),
        )
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl EntityResolver for Store {
    fn resolve(
        &self,
        model: &Arc<Model>,
        cache_key: &str,
        fields: Fields,
    ) -> Result<Arc<EntityInstance>, SchemaError> {
        Ok(self.model_registry(model).resolve(model, cache_key, fields))
    }
}
