//! Reactive resource cache: typed endpoints, fingerprint-keyed resources,
//! deduplicated fetches, and identity-preserving entity normalization.
//!
//! This crate owns the caching/consistency engine of the workspace:
//!
//! - **[`Store`]** — Top-level container. Owns, per endpoint, the
//!   fingerprint→[`Resource`] map and the live-query registry; per entity
//!   model, the identity map. Its `request`/`perform` chokepoint runs
//!   serialize → transport → parse → normalize for every response, so
//!   overlapping entities from different endpoints converge on the same
//!   instances.
//!
//! - **[`Resource`]** — A single cached fetch outcome for one
//!   (endpoint, params) pair: data/loading/error behind a `watch` channel,
//!   one-shot done listeners, cooperative cancellation, and supersession
//!   (only the newest in-flight fetch applies its outcome).
//!
//! - **[`Query`]** — A reactive controller bound to a changing parameter
//!   source. On each parameter change it fingerprints the params, resolves
//!   the matching resource (the dedup point), applies a [`FetchPolicy`],
//!   and republishes `{loading, error, params, data}` with `data` as an
//!   immutable snapshot. Inert until observed; deactivates when the last
//!   [`QueryObserver`] drops.
//!
//! - **[`Mocks`]** — Test doubles: per-endpoint handlers that bypass the
//!   transport but still normalize through the store, and mock instances
//!   with auto-generated identifier fields.
//!
//! The value model, contracts, entity instances, and snapshots live in
//! [`nectar_model`], re-exported here as [`model`].

pub mod endpoint;
pub mod error;
pub mod mock;
pub mod policy;
pub mod query;
pub mod resource;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use endpoint::{Endpoint, Transport, TransportError};
pub use error::CoreError;
pub use mock::Mocks;
pub use policy::FetchPolicy;
pub use query::{OnFetched, Query, QueryObserver, QueryOptions, QueryState};
pub use resource::{ListenerId, Resource, ResourceState, UsageGuard};
pub use store::Store;
pub use stream::{StateStream, WatchStateStream};

/// The value/contract layer, re-exported for one-stop consumers.
pub use nectar_model as model;
