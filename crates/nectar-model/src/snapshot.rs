// ── Snapshot / restore bridge ──
//
// Converts a live `Value` into an immutable structural mirror that is cheap
// to clone and safe to hand to rendering code, and recovers the mutable
// source instance from an entity snapshot.
//
// Entity snapshots are memoized per instance, keyed by the instance version
// plus the versions of every entity reached while building. A memo hit
// returns the identical `Arc`s, so unchanged data survives shallow equality
// checks across repeated snapshot calls. Stability is best-effort: a memo
// is re-validated against live versions on every call and rebuilt when any
// dependency moved.

use std::sync::{Arc, PoisonError, Weak};

use chrono::NaiveDate;
use indexmap::IndexMap;

use crate::entity::EntityInstance;
use crate::value::Value;

/// Immutable point-in-time view of a [`Value`].
#[derive(Clone, Debug)]
pub enum Snapshot {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Arc<str>),
    Date(NaiveDate),
    Array(Arc<[Snapshot]>),
    Object(Arc<IndexMap<String, Snapshot>>),
    Entity(EntitySnapshot),
}

/// Immutable view of an [`EntityInstance`] at one version, with a back-link
/// to the source instance.
#[derive(Clone, Debug)]
pub struct EntitySnapshot {
    source: Arc<EntityInstance>,
    version: u64,
    fields: Arc<IndexMap<String, Snapshot>>,
}

/// An entity reached while building a snapshot, with the version it had.
type Dep = (Weak<EntityInstance>, u64);

/// Memoized entity snapshot stored on the instance itself.
pub(crate) struct SnapshotMemo {
    version: u64,
    deps: Vec<Dep>,
    snap: EntitySnapshot,
}

/// Build an immutable view of `value`. Plain data maps structurally; entity
/// nodes are memoized per instance and version.
pub fn snapshot(value: &Value) -> Snapshot {
    let mut deps = Vec::new();
    build(value, &mut deps)
}

/// Recover the mutable source of an entity snapshot. Returns `None` for
/// snapshots of plain data, which have no single mutable source.
pub fn restore(snap: &Snapshot) -> Option<Arc<EntityInstance>> {
    match snap {
        Snapshot::Entity(entity) => Some(entity.source()),
        _ => None,
    }
}

fn build(value: &Value, deps: &mut Vec<Dep>) -> Snapshot {
    match value {
        Value::Null => Snapshot::Null,
        Value::Bool(b) => Snapshot::Bool(*b),
        Value::Int(n) => Snapshot::Int(*n),
        Value::Float(f) => Snapshot::Float(*f),
        Value::String(s) => Snapshot::String(Arc::from(s.as_str())),
        Value::Date(d) => Snapshot::Date(*d),
        Value::Array(items) => {
            Snapshot::Array(items.iter().map(|item| build(item, deps)).collect())
        }
        Value::Object(fields) => Snapshot::Object(Arc::new(
            fields
                .iter()
                .map(|(name, field)| (name.clone(), build(field, deps)))
                .collect(),
        )),
        Value::Entity(instance) => Snapshot::Entity(snapshot_entity(instance, deps)),
    }
}

fn snapshot_entity(instance: &Arc<EntityInstance>, parent_deps: &mut Vec<Dep>) -> EntitySnapshot {
    // Read the version before the fields: a concurrent merge between the two
    // reads leaves a memo with a stale version, which the next call rejects.
    let version = instance.version();

    {
        let memo = instance
            .memo()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(memo) = memo.as_ref() {
            if memo.version == version && deps_fresh(&memo.deps) {
                parent_deps.push((Arc::downgrade(instance), version));
                parent_deps.extend(memo.deps.iter().cloned());
                return memo.snap.clone();
            }
        }
    }

    let mut deps = Vec::new();
    let fields: IndexMap<String, Snapshot> = instance.with_fields(|fields| {
        fields
            .iter()
            .map(|(name, field)| (name.clone(), build(field, &mut deps)))
            .collect()
    });
    let snap = EntitySnapshot {
        source: Arc::clone(instance),
        version,
        fields: Arc::new(fields),
    };

    *instance
        .memo()
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(SnapshotMemo {
        version,
        deps: deps.clone(),
        snap: snap.clone(),
    });

    parent_deps.push((Arc::downgrade(instance), version));
    parent_deps.extend(deps);
    snap
}

fn deps_fresh(deps: &[Dep]) -> bool {
    deps.iter().all(|(instance, seen)| {
        instance
            .upgrade()
            .is_some_and(|instance| instance.version() == *seen)
    })
}

impl EntitySnapshot {
    /// The live instance this snapshot was taken from.
    pub fn source(&self) -> Arc<EntityInstance> {
        Arc::clone(&self.source)
    }

    /// The instance version at snapshot time.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, field: &str) -> Option<&Snapshot> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &IndexMap<String, Snapshot> {
        &self.fields
    }
}

impl PartialEq for EntitySnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Entity(a), Self::Entity(b)) => a == b,
            _ => false,
        }
    }
}

impl Snapshot {
    /// Shallow identity comparison: `true` when both views share the same
    /// backing allocation (or are equal scalars). This is the cheap check
    /// rendering layers use to skip re-renders.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::String(a), Self::String(b)) => Arc::ptr_eq(a, b),
            (Self::Array(a), Self::Array(b)) => Arc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            (Self::Entity(a), Self::Entity(b)) => {
                Arc::ptr_eq(&a.source, &b.source) && Arc::ptr_eq(&a.fields, &b.fields)
            }
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Snapshot]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&EntitySnapshot> {
        match self {
            Self::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    /// Field lookup on object and entity snapshots.
    pub fn get(&self, field: &str) -> Option<&Snapshot> {
        match self {
            Self::Object(fields) => fields.get(field),
            Self::Entity(entity) => entity.get(field),
            _ => None,
        }
    }

    /// Element lookup on array snapshots.
    pub fn index(&self, index: usize) -> Option<&Snapshot> {
        match self {
            Self::Array(items) => items.get(index),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{self, Model};
    use crate::value::Fields;
    use pretty_assertions::assert_eq;

    fn user_model() -> Arc<Model> {
        Model::builder("user")
            .key_field("id", schema::string())
            .field("name", schema::string())
            .build()
    }

    fn user(name: &str) -> Arc<EntityInstance> {
        let mut fields = Fields::new();
        fields.insert("id".into(), Value::from("u1"));
        fields.insert("name".into(), Value::from(name));
        EntityInstance::new(user_model(), "{\"id\":\"u1\"}".into(), fields)
    }

    #[test]
    fn plain_values_map_structurally() {
        let value = Value::object([
            ("flag", Value::from(true)),
            ("items", Value::from(vec![1i64, 2, 3])),
        ]);
        let snap = snapshot(&value);

        assert_eq!(snap.get("flag").and_then(Snapshot::as_bool), Some(true));
        assert_eq!(
            snap.get("items").and_then(|s| s.index(2)).and_then(Snapshot::as_int),
            Some(3)
        );
        assert!(restore(&snap).is_none());
    }

    #[test]
    fn unchanged_instance_yields_identical_snapshot() {
        let inst = user("alice");
        let value = Value::Entity(Arc::clone(&inst));

        let first = snapshot(&value);
        let second = snapshot(&value);
        assert!(first.ptr_eq(&second));
    }

    #[test]
    fn mutation_invalidates_memo_but_not_taken_snapshots() {
        let inst = user("alice");
        let value = Value::Entity(Arc::clone(&inst));

        let stale = snapshot(&value);
        inst.set("name", Value::from("bob"));
        let fresh = snapshot(&value);

        assert_eq!(stale.get("name").and_then(Snapshot::as_str), Some("alice"));
        assert_eq!(fresh.get("name").and_then(Snapshot::as_str), Some("bob"));
        assert!(!stale.ptr_eq(&fresh));
    }

    #[test]
    fn restore_returns_the_source_instance() {
        let inst = user("alice");
        let snap = snapshot(&Value::Entity(Arc::clone(&inst)));

        let restored = restore(&snap).expect("entity snapshot restores");
        assert!(Arc::ptr_eq(&restored, &inst));
    }

    #[test]
    fn nested_entity_mutation_rebuilds_outer_snapshot() {
        let inner = user("alice");
        let team_model = Model::builder("team")
            .key_field("id", schema::string())
            .field("owner", schema::string())
            .build();
        let mut fields = Fields::new();
        fields.insert("id".into(), Value::from("t1"));
        fields.insert("owner".into(), Value::Entity(Arc::clone(&inner)));
        let outer = EntityInstance::new(team_model, "{\"id\":\"t1\"}".into(), fields);

        let value = Value::Entity(Arc::clone(&outer));
        let before = snapshot(&value);
        inner.set("name", Value::from("bob"));
        let after = snapshot(&value);

        assert!(!before.ptr_eq(&after));
        assert_eq!(
            after
                .get("owner")
                .and_then(|s| s.get("name"))
                .and_then(Snapshot::as_str),
            Some("bob")
        );
    }
}
