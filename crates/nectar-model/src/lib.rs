//! Value model and contract layer for the nectar resource cache.
//!
//! This crate owns the data half of the workspace:
//!
//! - **[`Value`]** — the internal representation of parsed response data:
//!   JSON-shaped scalars, arrays, and objects, plus [`Value::Entity`] nodes
//!   pointing at live, identity-keyed [`EntityInstance`]s.
//!
//! - **[`schema`]** — bidirectional contracts (`parse(raw) -> Value`,
//!   `serialize(Value) -> raw`) composing scalars, objects, arrays,
//!   optionals, unions, and identity-tagged entity contracts. Parsing is
//!   explicit-context: a [`ParseCx`](schema::ParseCx) carries the entity
//!   resolver instead of any process-wide slot.
//!
//! - **[`EntityInstance`]** — the single live mutable record for one
//!   (model, identity key) pair. Re-parsing data for the same key merges
//!   fields in place and bumps a version `watch` channel; subscribers are an
//!   explicit registry (`subscribe()` / drop-to-unsubscribe).
//!
//! - **[`snapshot`]** — converts a live `Value` into an immutable,
//!   referentially-stable [`Snapshot`] and can recover the source instance
//!   from an entity snapshot via [`restore`].

pub mod entity;
pub mod error;
pub mod json;
pub mod schema;
pub mod snapshot;
pub mod value;

// ── Primary re-exports ──────────────────────────────────────────────
pub use entity::EntityInstance;
pub use error::SchemaError;
pub use json::{Json, fingerprint};
pub use schema::{Contract, ContractRef, EntityResolver, Model, ModelBuilder, ParseCx};
pub use snapshot::{EntitySnapshot, Snapshot, restore, snapshot};
pub use value::{Fields, Value};
