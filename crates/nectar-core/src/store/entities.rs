// ── Per-model identity maps ──
//
// Lock-free storage for the live instances of one entity model, keyed by
// the canonical cache-key string of the identity key. `resolve` is the
// merge point guaranteeing at most one live instance per key.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::trace;

use nectar_model::{EntityInstance, Fields, Model};

/// Identity map for a single entity model.
pub(crate) struct EntityRegistry {
    instances: DashMap<String, Arc<EntityInstance>>,
}

impl EntityRegistry {
    pub(crate) fn new() -> Self {
        Self {
            instances: DashMap::new(),
        }
    }

    /// Get-or-create the instance for `cache_key`, merging `fields` into an
    /// existing instance in place rather than replacing it.
    pub(crate) fn resolve(
        &self,
        model: &Arc<Model>,
        cache_key: &str,
        fields: Fields,
    ) -> Arc<EntityInstance> {
        let mut incoming = Some(fields);

        if let Some(existing) = self.instances.get(cache_key) {
            let instance = Arc::clone(existing.value());
            drop(existing);
            if let Some(fields) = incoming.take() {
                instance.merge(fields);
            }
            return instance;
        }

        match self.instances.entry(cache_key.to_owned()) {
            Entry::Occupied(slot) => {
                let instance = Arc::clone(slot.get());
                drop(slot);
                if let Some(fields) = incoming.take() {
                    instance.merge(fields);
                }
                instance
            }
            Entry::Vacant(slot) => {
                let fields = incoming.take().unwrap_or_default();
                let instance =
                    EntityInstance::new(Arc::clone(model), cache_key.to_owned(), fields);
                slot.insert(Arc::clone(&instance));
                trace!(model = %model.name(), key = %cache_key, "entity instance created");
                instance
            }
        }
    }

    pub(crate) fn get(&self, cache_key: &str) -> Option<Arc<EntityInstance>> {
        self.instances
            .get(cache_key)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn len(&self) -> usize {
        self.instances.len()
    }

    pub(crate) fn values(&self) -> Vec<Arc<EntityInstance>> {
        self.instances
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nectar_model::{Value, schema};

    fn user_model() -> Arc<Model> {
        Model::builder("user")
            .key_field("id", schema::string())
            .field("name", schema::string())
            .build()
    }

    fn fields(id: &str, name: &str) -> Fields {
        [
            ("id".to_owned(), Value::from(id)),
            ("name".to_owned(), Value::from(name)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn resolve_creates_then_merges() {
        let registry = EntityRegistry::new();
        let model = user_model();

        let first = registry.resolve(&model, "k1", fields("u1", "alice"));
        let second = registry.resolve(&model, "k1", fields("u1", "bob"));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.get("name"), Some(Value::from("bob")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_keys_get_distinct_instances() {
        let registry = EntityRegistry::new();
        let model = user_model();

        let a = registry.resolve(&model, "k1", fields("u1", "alice"));
        let b = registry.resolve(&model, "k2", fields("u2", "bob"));

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn get_returns_the_live_instance() {
        let registry = EntityRegistry::new();
        let model = user_model();

        let created = registry.resolve(&model, "k1", fields("u1", "alice"));
        let fetched = registry.get("k1").expect("present");
        assert!(Arc::ptr_eq(&created, &fetched));
        assert!(registry.get("missing").is_none());
    }
}
