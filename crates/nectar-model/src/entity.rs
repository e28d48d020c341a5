// ── Live entity instances ──
//
// One mutable record per (model, identity key). All queries that resolve the
// same key share the same `Arc<EntityInstance>`; merging new data mutates the
// record in place, so consumers stay consistent without invalidation
// messages. Observation is an explicit registry: `subscribe()` hands out a
// `watch` receiver of the version counter, dropping it unsubscribes.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::watch;
use tracing::trace;

use crate::schema::Model;
use crate::snapshot::SnapshotMemo;
use crate::value::{Fields, Value};

/// The single live mutable record representing one logical entity.
pub struct EntityInstance {
    model: Arc<Model>,
    cache_key: String,
    fields: RwLock<Fields>,
    /// Version counter, bumped on every mutation. Doubles as the observer
    /// registry: receiver count is the number of live subscribers.
    version: watch::Sender<u64>,
    /// Memoized snapshot, keyed by version (own and nested). See
    /// [`crate::snapshot`].
    memo: Mutex<Option<SnapshotMemo>>,
}

impl EntityInstance {
    /// Create a fresh instance. Registration in an identity map is the
    /// caller's business; an unregistered instance is just a detached record.
    pub fn new(model: Arc<Model>, cache_key: String, fields: Fields) -> Arc<Self> {
        let (version, _) = watch::channel(0u64);
        Arc::new(Self {
            model,
            cache_key,
            fields: RwLock::new(fields),
            version,
            memo: Mutex::new(None),
        })
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Canonical cache-key string derived from the serialized identity key.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Current version. Bumped on every mutation.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Subscribe to mutations. The receiver yields the new version after
    /// each change; dropping it unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Whether any subscriber currently observes this instance.
    pub fn is_observed(&self) -> bool {
        self.version.receiver_count() > 0
    }

    /// Clone a single field value.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.with_fields(|fields| fields.get(field).cloned())
    }

    /// Clone the full field map.
    pub fn fields(&self) -> Fields {
        self.with_fields(Fields::clone)
    }

    /// Read the field map without cloning it.
    pub fn with_fields<R>(&self, f: impl FnOnce(&Fields) -> R) -> R {
        let guard = self.fields.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Merge incoming fields in place: provided keys overwrite, absent keys
    /// keep their current value. Bumps the version and wakes subscribers.
    pub fn merge(&self, incoming: Fields) {
        if incoming.is_empty() {
            return;
        }
        {
            let mut guard = self.fields.write().unwrap_or_else(PoisonError::into_inner);
            for (name, value) in incoming {
                guard.insert(name, value);
            }
        }
        self.bump();
        trace!(
            model = %self.model.name(),
            key = %self.cache_key,
            version = self.version(),
            "merged entity fields"
        );
    }

    /// Overwrite a single field. Bumps the version and wakes subscribers.
    pub fn set(&self, field: impl Into<String>, value: Value) {
        {
            let mut guard = self.fields.write().unwrap_or_else(PoisonError::into_inner);
            guard.insert(field.into(), value);
        }
        self.bump();
    }

    pub(crate) fn memo(&self) -> &Mutex<Option<SnapshotMemo>> {
        &self.memo
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

impl fmt::Debug for EntityInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityInstance")
            .field("model", &self.model.name())
            .field("key", &self.cache_key)
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}
