#![allow(clippy::unwrap_used)]
// Entity normalization: identity-preserving merges across endpoints, the
// one-shot request path, snapshot staleness, and the mock harness.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio_util::sync::CancellationToken;

use nectar_core::endpoint::Endpoint;
use nectar_core::error::CoreError;
use nectar_core::mock::{Mocks, unwired};
use nectar_core::query::QueryOptions;
use nectar_core::store::Store;
use nectar_model::{Fields, Json, Model, Snapshot, Value, restore, schema, snapshot};

use common::{call_count, counted_transport, id_params, settle, user_endpoint, user_key, user_model};

// ── Identity merge ──────────────────────────────────────────────────

#[tokio::test]
async fn overlapping_endpoints_converge_on_one_instance() {
    let store = Store::new();
    let model = user_model();
    let (transport_a, _) = counted_transport(json!({"id": 1, "val": 1}));
    let (transport_b, _) = counted_transport(json!({"id": 1, "val": 2}));
    let by_id = user_endpoint("users.byId", &model, transport_a);
    let by_handle = user_endpoint("users.byHandle", &model, transport_b);

    let first = store.query_value(&by_id, id_params(1), QueryOptions::default());
    let _watch_first = first.observe().unwrap();
    let mut rx = first.subscribe();
    let state = rx.wait_for(|s| s.data.is_some()).await.unwrap().clone();
    let stale = state.data.unwrap();
    assert_eq!(stale.get("val").and_then(Snapshot::as_int), Some(1));

    let second = store.query_value(&by_handle, id_params(1), QueryOptions::default());
    let _watch_second = second.observe().unwrap();
    let mut rx2 = second.subscribe();
    rx2.wait_for(|s| s.data.is_some()).await.unwrap();

    // One live instance, merged in place.
    assert_eq!(store.instance_count(&model), 1);
    let instance = store.instance(&model, &user_key(1)).unwrap().unwrap();
    assert_eq!(instance.get("val"), Some(Value::Int(2)));

    // The snapshot taken before the merge stays at its point in time; a
    // fresh snapshot of the same instance reads the merged value.
    assert_eq!(stale.get("val").and_then(Snapshot::as_int), Some(1));
    let fresh = snapshot(&Value::Entity(Arc::clone(&instance)));
    assert_eq!(fresh.get("val").and_then(Snapshot::as_int), Some(2));

    // The stale snapshot still restores to the live instance.
    let restored = restore(&stale).unwrap();
    assert!(Arc::ptr_eq(&restored, &instance));
}

// ── One-shot requests ───────────────────────────────────────────────

#[tokio::test]
async fn one_shot_request_bypasses_cache_but_normalizes() {
    let store = Store::new();
    let model = user_model();
    let (transport, calls) = counted_transport(json!({"id": 5, "val": 50}));
    let endpoint = user_endpoint("users.touch", &model, transport);

    let value = store
        .request(&endpoint, &Value::object([("id", Value::Int(5))]))
        .await
        .unwrap()
        .expect("request completed");

    assert_eq!(call_count(&calls), 1);
    assert_eq!(store.resource_count(&endpoint), 0, "no resource registered");
    assert_eq!(store.instance_count(&model), 1, "entity still normalized");

    let instance = store.instance(&model, &user_key(5)).unwrap().unwrap();
    assert_eq!(value, Value::Entity(Arc::clone(&instance)));
}

#[tokio::test]
async fn instance_lookup_misses_return_none() {
    let store = Store::new();
    let model = user_model();
    assert!(store.instance(&model, &user_key(404)).unwrap().is_none());
}

// ── Endpoint-wide refetch ───────────────────────────────────────────

#[tokio::test]
async fn refetch_endpoint_reloads_every_live_query() {
    let store = Store::new();
    let model = user_model();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let transport = move |params: Json, _cancel: CancellationToken| {
        seen.fetch_add(1, Ordering::SeqCst);
        async move { Ok(Some(json!({"id": params["id"].clone(), "val": 0}))) }
    };
    let endpoint = user_endpoint("users.get", &model, transport);

    let first = store.query_value(&endpoint, id_params(1), QueryOptions::default());
    let second = store.query_value(&endpoint, id_params(2), QueryOptions::default());
    let _watch_first = first.observe().unwrap();
    let _watch_second = second.observe().unwrap();
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.query_count(&endpoint), 2);

    store.refetch_endpoint(&endpoint);
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

// ── Fetch hook ──────────────────────────────────────────────────────

#[tokio::test]
async fn on_fetched_runs_with_data_and_params() {
    let store = Store::new();
    let model = user_model();
    let (transport, _) = counted_transport(json!({"id": 3, "val": 30}));
    let endpoint = user_endpoint("users.get", &model, transport);

    let seen: Arc<Mutex<Option<(Option<i64>, Option<i64>)>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let options = QueryOptions {
        on_fetched: Some(Arc::new(move |data: &Value, params: &Value| {
            let observed = (
                data.get("val").and_then(|v| v.as_int()),
                params.get("id").and_then(|v| v.as_int()),
            );
            *sink.lock().unwrap() = Some(observed);
        })),
        ..QueryOptions::default()
    };

    let query = store.query_value(&endpoint, id_params(3), options);
    let _watching = query.observe().unwrap();
    let mut rx = query.subscribe();
    rx.wait_for(|s| s.data.is_some()).await.unwrap();
    settle().await;

    assert_eq!(*seen.lock().unwrap(), Some((Some(30), Some(3))));
}

// ── Mock harness ────────────────────────────────────────────────────

fn named_user_model() -> Arc<Model> {
    Model::builder("named_user")
        .key_field("id", schema::string())
        .generated_id("id")
        .field("name", schema::string())
        .build()
}

#[tokio::test]
async fn mocked_store_normalizes_handler_results() {
    let mocks = Mocks::new();
    let store = Store::mocked(Arc::clone(&mocks));
    let model = named_user_model();
    let endpoint = Endpoint::new(
        "users.list",
        schema::object([("limit", schema::integer())]),
        schema::array(schema::entity(&model)),
        unwired(),
    );

    let alice = mocks
        .instance(&model, [("name".to_owned(), Value::from("alice"))].into_iter().collect())
        .unwrap();
    let bob = mocks
        .instance(&model, [("name".to_owned(), Value::from("bob"))].into_iter().collect())
        .unwrap();
    assert_eq!(alice.get("id"), Some(Value::from("1")));
    assert_eq!(bob.get("id"), Some(Value::from("2")));

    let roster = vec![Value::Entity(Arc::clone(&alice)), Value::Entity(bob)];
    mocks
        .endpoint(&endpoint, move |_params| Ok(Value::Array(roster.clone())))
        .unwrap();

    let result = store
        .request(&endpoint, &Value::object([("limit", Value::Int(10))]))
        .await
        .unwrap()
        .expect("mock handler ran");
    assert_eq!(result.as_array().map(<[Value]>::len), Some(2));

    // The store owns its own instances, keyed like the mock ones.
    let key: Fields = [("id".to_owned(), Value::from("1"))].into_iter().collect();
    let in_store = store.instance(&model, &key).unwrap().unwrap();
    assert_eq!(in_store.get("name"), Some(Value::from("alice")));
    assert!(!Arc::ptr_eq(&in_store, &alice));
}

#[tokio::test]
async fn unmocked_endpoints_fail_loudly_on_a_mocked_store() {
    let mocks = Mocks::new();
    let store = Store::mocked(mocks);
    let model = named_user_model();
    let endpoint = Endpoint::new(
        "users.forgotten",
        schema::object([("limit", schema::integer())]),
        schema::array(schema::entity(&model)),
        unwired(),
    );

    let err = store
        .request(&endpoint, &Value::object([("limit", Value::Int(1))]))
        .await
        .expect_err("handler missing");
    assert!(matches!(err, CoreError::EndpointNotMocked(name) if name == "users.forgotten"));
}

// ── Snapshot stability across query republishes ─────────────────────

#[tokio::test]
async fn untouched_entities_keep_snapshot_identity_across_refetch() {
    let store = Store::new();
    let model = user_model();
    let (transport, _) = counted_transport(json!({"id": 1, "val": 7}));
    let endpoint = user_endpoint("users.get", &model, transport);

    let query = store.query_value(&endpoint, id_params(1), QueryOptions::default());
    let _watching = query.observe().unwrap();
    let mut rx = query.subscribe();
    let before = rx
        .wait_for(|s| s.data.is_some())
        .await
        .unwrap()
        .data
        .clone()
        .unwrap();

    // Refetching returns byte-identical data; the merged instance does not
    // change observably, but the version bump invalidates the memo, so the
    // guarantee here is equality, not pointer identity.
    query.refetch();
    settle().await;
    let after = query.data().unwrap();
    assert_eq!(before, after);

    // Snapshots without an intervening mutation are pointer-identical.
    let instance = store.instance(&model, &user_key(1)).unwrap().unwrap();
    let a = snapshot(&Value::Entity(Arc::clone(&instance)));
    let b = snapshot(&Value::Entity(instance));
    assert!(a.ptr_eq(&b));
}
