// ── Entity models ──
//
// A model is an object contract plus the subset of fields that form the
// identity key, and optionally the single field that mock harnesses assign
// automatically. The entity contract built from a model is the point where
// parsing routes through a store's identity map.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Map as JsonMap;

use super::combinators::{parse_props, serialize_props};
use super::{Contract, ContractRef, ParseCx};
use crate::error::SchemaError;
use crate::json::{Json, fingerprint};
use crate::value::{Fields, Value};

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

/// An object type with a designated identity key.
pub struct Model {
    id: u64,
    name: String,
    props: Vec<(String, ContractRef)>,
    key_fields: Vec<String>,
    identifier: Option<String>,
}

impl Model {
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder {
            name: name.into(),
            props: Vec::new(),
            key_fields: Vec::new(),
            identifier: None,
        }
    }

    /// Allocation identity, used as the registry key for this model's
    /// identity map.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn props(&self) -> &[(String, ContractRef)] {
        &self.props
    }

    /// Field names forming the identity key.
    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    /// Field auto-assigned by mock harnesses, if any.
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    /// Canonical cache-key string for a field map: the identity-key fields
    /// serialized to JSON and fingerprinted. Key fields must be present and
    /// serializable; anything else is a validation error.
    pub fn cache_key(&self, fields: &Fields) -> Result<String, SchemaError> {
        let mut raw = JsonMap::new();
        for name in &self.key_fields {
            let value = fields.get(name).ok_or_else(|| SchemaError::MissingKeyField {
                model: self.name.clone(),
                field: name.clone(),
            })?;
            let contract = self
                .props
                .iter()
                .find(|(prop, _)| prop == name)
                .map(|(_, contract)| contract)
                .ok_or_else(|| SchemaError::MissingKeyField {
                    model: self.name.clone(),
                    field: name.clone(),
                })?;
            raw.insert(name.clone(), contract.serialize(value)?);
        }
        Ok(fingerprint(&Json::Object(raw)))
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("key_fields", &self.key_fields)
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Model`]. `build` panics on a model without identity-key
/// fields or with a generated identifier that names no declared field —
/// both are construction-time programming errors.
pub struct ModelBuilder {
    name: String,
    props: Vec<(String, ContractRef)>,
    key_fields: Vec<String>,
    identifier: Option<String>,
}

impl ModelBuilder {
    /// Declare a plain field.
    pub fn field(mut self, name: impl Into<String>, contract: ContractRef) -> Self {
        self.props.push((name.into(), contract));
        self
    }

    /// Declare a field that is part of the identity key.
    pub fn key_field(mut self, name: impl Into<String>, contract: ContractRef) -> Self {
        let name = name.into();
        self.key_fields.push(name.clone());
        self.props.push((name, contract));
        self
    }

    /// Mark a declared field as the generated identifier: mock harnesses
    /// assign it a fresh value when the caller leaves it out.
    pub fn generated_id(mut self, name: impl Into<String>) -> Self {
        self.identifier = Some(name.into());
        self
    }

    pub fn build(self) -> Arc<Model> {
        assert!(
            !self.key_fields.is_empty(),
            "model `{}` declares no identity key fields",
            self.name
        );
        if let Some(identifier) = &self.identifier {
            assert!(
                self.props.iter().any(|(name, _)| name == identifier),
                "model `{}` marks undeclared field `{identifier}` as generated identifier",
                self.name
            );
        }
        Arc::new(Model {
            id: NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed),
            name: self.name,
            props: self.props,
            key_fields: self.key_fields,
            identifier: self.identifier,
        })
    }
}

struct EntityContract {
    model: Arc<Model>,
}

impl Contract for EntityContract {
    fn parse(&self, cx: &mut ParseCx<'_>, raw: &Json) -> Result<Value, SchemaError> {
        let fields = parse_props(cx, self.model.props(), raw)?;
        let cache_key = self.model.cache_key(&fields)?;
        let instance = cx.resolve(&self.model, &cache_key, fields)?;
        Ok(Value::Entity(instance))
    }

    fn serialize(&self, value: &Value) -> Result<Json, SchemaError> {
        match value {
            Value::Entity(instance) => {
                instance.with_fields(|fields| serialize_props(self.model.props(), fields))
            }
            Value::Object(fields) => serialize_props(self.model.props(), fields),
            other => Err(SchemaError::Serialize {
                expected: format!("`{}` entity", self.model.name()),
                found: other.kind().to_owned(),
            }),
        }
    }
}

/// Identity-tagged contract: parsed data resolves to the single live
/// instance for its key through the context's store.
pub fn entity(model: &Arc<Model>) -> ContractRef {
    Arc::new(EntityContract {
        model: Arc::clone(model),
    })
}
