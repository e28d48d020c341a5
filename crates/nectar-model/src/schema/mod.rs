// ── Bidirectional data contracts ──
//
// A contract describes one level of the wire format: `parse` converts raw
// JSON into an internal `Value`, `serialize` converts back. Contracts
// compose; the identity-tagged entity contract is the hook through which
// parsing routes instances into a store.
//
// Parsing carries its context explicitly: `ParseCx` holds the entity
// resolver and the JSON path for error reporting. There is no process-wide
// "current store" slot.

mod combinators;
mod model;

use std::fmt::Write as _;
use std::sync::Arc;

pub use combinators::{
    array, boolean, float, integer, iso_date, literal, nullable, object, optional, string,
    string_enum, string_map, tagged_union, untagged_union,
};
pub use model::{Model, ModelBuilder, entity};

use crate::error::SchemaError;
use crate::json::{Json, json_kind};
use crate::value::{Fields, Value};
use crate::entity::EntityInstance;

/// Shared handle to a contract.
pub type ContractRef = Arc<dyn Contract>;

/// A bidirectional description of one level of the wire format.
pub trait Contract: Send + Sync + 'static {
    /// Convert a raw JSON value into the internal representation.
    fn parse(&self, cx: &mut ParseCx<'_>, raw: &Json) -> Result<Value, SchemaError>;

    /// Convert an internal value back to its wire form.
    fn serialize(&self, value: &Value) -> Result<Json, SchemaError>;

    /// Whether an enclosing object treats an absent field as acceptable.
    fn is_optional(&self) -> bool {
        false
    }
}

/// Resolves parsed entity data to the single live instance for its key.
///
/// Implemented by the store; the contract layer only knows the seam.
pub trait EntityResolver {
    fn resolve(
        &self,
        model: &Arc<Model>,
        cache_key: &str,
        fields: Fields,
    ) -> Result<Arc<EntityInstance>, SchemaError>;
}

/// Resolver for contexts without a store: refuses entity contracts.
struct Detached;

impl EntityResolver for Detached {
    fn resolve(
        &self,
        model: &Arc<Model>,
        _cache_key: &str,
        _fields: Fields,
    ) -> Result<Arc<EntityInstance>, SchemaError> {
        Err(SchemaError::NoEntityContext {
            model: model.name().to_owned(),
        })
    }
}

static DETACHED: Detached = Detached;

enum PathSegment {
    Field(String),
    Index(usize),
}

/// Explicit parse context: entity resolver plus the JSON path for errors.
pub struct ParseCx<'a> {
    resolver: &'a dyn EntityResolver,
    path: Vec<PathSegment>,
}

impl<'a> ParseCx<'a> {
    pub fn new(resolver: &'a dyn EntityResolver) -> Self {
        Self {
            resolver,
            path: Vec::new(),
        }
    }

    /// A context with no store behind it. Parsing an entity contract fails
    /// with [`SchemaError::NoEntityContext`].
    pub fn detached() -> ParseCx<'static> {
        ParseCx::new(&DETACHED)
    }

    /// Resolve parsed entity fields through the context's store.
    pub fn resolve(
        &self,
        model: &Arc<Model>,
        cache_key: &str,
        fields: Fields,
    ) -> Result<Arc<EntityInstance>, SchemaError> {
        self.resolver.resolve(model, cache_key, fields)
    }

    /// Current JSON path, e.g. `$.items[2].id`.
    pub fn path(&self) -> String {
        let mut out = String::from("$");
        for segment in &self.path {
            match segment {
                PathSegment::Field(name) => {
                    let _ = write!(out, ".{name}");
                }
                PathSegment::Index(index) => {
                    let _ = write!(out, "[{index}]");
                }
            }
        }
        out
    }

    /// Validation error for a kind mismatch at the current path.
    pub fn mismatch(&self, expected: impl Into<String>, raw: &Json) -> SchemaError {
        SchemaError::Parse {
            path: self.path(),
            expected: expected.into(),
            found: json_kind(raw).to_owned(),
        }
    }

    /// Run `f` with `name` pushed onto the path. The segment is popped on
    /// the way out regardless of the result, so trial parsing (unions) keeps
    /// the path balanced.
    pub fn with_field<R>(&mut self, name: &str, f: impl FnOnce(&mut Self) -> R) -> R {
        self.path.push(PathSegment::Field(name.to_owned()));
        let result = f(self);
        self.path.pop();
        result
    }

    /// Like [`with_field`](Self::with_field) for array indices.
    pub fn with_index<R>(&mut self, index: usize, f: impl FnOnce(&mut Self) -> R) -> R {
        self.path.push(PathSegment::Index(index));
        let result = f(self);
        self.path.pop();
        result
    }
}
