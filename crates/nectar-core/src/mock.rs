// ── Mock harness ──
//
// Test doubles for endpoints and entities. A mocked store routes `perform`
// through registered handlers instead of the transport; handler results are
// serialized and re-parsed so they normalize through the identity maps
// exactly like wire data. Mock instances live in the harness's own
// directory, detached from any store; feeding them through a mocked
// endpoint is what materializes store-owned instances.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use nectar_model::{EntityInstance, Fields, Json, Model, Value};

use crate::endpoint::{Endpoint, Transport, TransportError};
use crate::error::CoreError;

/// Handler for a mocked endpoint: internal params in, internal result out.
pub type MockHandler = dyn Fn(Value) -> Result<Value, CoreError> + Send + Sync;

/// Registry of mock handlers and mock entity instances.
pub struct Mocks {
    handlers: DashMap<u64, Arc<MockHandler>>,
    db: DashMap<u64, Arc<DashMap<String, Arc<EntityInstance>>>>,
    /// Monotonic counters per generated-identifier field.
    counters: DashMap<String, u64>,
}

impl Mocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: DashMap::new(),
            db: DashMap::new(),
            counters: DashMap::new(),
        })
    }

    /// Register a handler for an endpoint. Each endpoint can be mocked at
    /// most once.
    pub fn endpoint(
        &self,
        endpoint: &Arc<Endpoint>,
        handler: impl Fn(Value) -> Result<Value, CoreError> + Send + Sync + 'static,
    ) -> Result<(), CoreError> {
        if self.handlers.contains_key(&endpoint.id()) {
            return Err(CoreError::EndpointAlreadyMocked(endpoint.name().to_owned()));
        }
        self.handlers.insert(endpoint.id(), Arc::new(handler));
        Ok(())
    }

    pub(crate) fn handler(&self, endpoint: &Arc<Endpoint>) -> Option<Arc<MockHandler>> {
        self.handlers
            .get(&endpoint.id())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Build a mock instance. A declared generated-identifier field that
    /// the caller leaves out is assigned the next value of its counter
    /// (as a string, the way test fixtures usually carry ids).
    pub fn instance(
        &self,
        model: &Arc<Model>,
        mut fields: Fields,
    ) -> Result<Arc<EntityInstance>, CoreError> {
        if let Some(field) = model.identifier() {
            if !fields.contains_key(field) {
                let counter_key = format!("{}::{field}", model.name());
                let mut counter = self.counters.entry(counter_key).or_insert(0);
                *counter += 1;
                let generated = counter.to_string();
                drop(counter);
                fields.insert(field.to_owned(), Value::String(generated));
            }
        }
        let cache_key = model.cache_key(&fields)?;
        let instance = EntityInstance::new(Arc::clone(model), cache_key.clone(), fields);
        self.model_db(model).insert(cache_key, Arc::clone(&instance));
        Ok(instance)
    }

    /// All mock instances of a model, in no particular order.
    pub fn instances(&self, model: &Arc<Model>) -> Vec<Arc<EntityInstance>> {
        self.model_db(model)
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Look up a mock instance by its identity-key fields.
    pub fn get(
        &self,
        model: &Arc<Model>,
        key: &Fields,
    ) -> Result<Option<Arc<EntityInstance>>, CoreError> {
        let cache_key = model.cache_key(key)?;
        Ok(self
            .model_db(model)
            .get(&cache_key)
            .map(|entry| Arc::clone(entry.value())))
    }

    fn model_db(&self, model: &Arc<Model>) -> Arc<DashMap<String, Arc<EntityInstance>>> {
        Arc::clone(self.db.entry(model.id()).or_default().value())
    }
}

/// Transport for endpoints that only ever run against a mocked store; a
/// mocked store never reaches the transport, and an unmocked store fails
/// loudly instead of hanging.
pub fn unwired() -> impl Transport {
    |_params: Json, _cancel: CancellationToken| async {
        Err::<Option<Json>, _>(TransportError::Failed(
            "endpoint has no transport; run it against a mocked store".to_owned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nectar_model::schema;
    use pretty_assertions::assert_eq;

    fn user_model() -> Arc<Model> {
        Model::builder("user")
            .key_field("id", schema::string())
            .generated_id("id")
            .field("name", schema::string())
            .build()
    }

    #[test]
    fn generated_identifiers_are_monotonic() {
        let mocks = Mocks::new();
        let model = user_model();

        let first = mocks
            .instance(&model, [("name".to_owned(), Value::from("alice"))].into_iter().collect())
            .expect("mock instance");
        let second = mocks
            .instance(&model, [("name".to_owned(), Value::from("bob"))].into_iter().collect())
            .expect("mock instance");

        assert_eq!(first.get("id"), Some(Value::from("1")));
        assert_eq!(second.get("id"), Some(Value::from("2")));
        assert_eq!(mocks.instances(&model).len(), 2);
    }

    #[test]
    fn explicit_identifier_wins_over_generation() {
        let mocks = Mocks::new();
        let model = user_model();

        let instance = mocks
            .instance(
                &model,
                [
                    ("id".to_owned(), Value::from("u42")),
                    ("name".to_owned(), Value::from("carol")),
                ]
                .into_iter()
                .collect(),
            )
            .expect("mock instance");

        assert_eq!(instance.get("id"), Some(Value::from("u42")));
        let key: Fields = [("id".to_owned(), Value::from("u42"))].into_iter().collect();
        let found = mocks.get(&model, &key).expect("valid key").expect("present");
        assert!(Arc::ptr_eq(&found, &instance));
    }

    #[test]
    fn double_mocking_an_endpoint_fails() {
        let mocks = Mocks::new();
        let endpoint = Endpoint::new(
            "users.get",
            schema::object([("id", schema::string())]),
            schema::object([("ok", schema::boolean())]),
            unwired(),
        );

        mocks
            .endpoint(&endpoint, |_| Ok(Value::object([("ok", Value::from(true))])))
            .expect("first registration");
        let err = mocks
            .endpoint(&endpoint, |_| Ok(Value::object([("ok", Value::from(false))])))
            .expect_err("second registration");
        assert!(matches!(err, CoreError::EndpointAlreadyMocked(name) if name == "users.get"));
    }
}
