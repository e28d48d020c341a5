// ── Contract-layer errors ──
//
// Validation failures carry a JSON-path so a bad payload points at the exact
// field. These are fatal for the fetch attempt that produced them; the
// engine surfaces them as the resource/query error.

use thiserror::Error;

/// Errors produced by the contract layer during parse or serialize.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A raw value did not match the contract at `path`.
    #[error("{path}: expected {expected}, found {found}")]
    Parse {
        path: String,
        expected: String,
        found: String,
    },

    /// An internal value cannot be serialized by the contract.
    #[error("cannot serialize {found} as {expected}")]
    Serialize { expected: String, found: String },

    /// No member of an untagged union accepted the raw value.
    #[error("{path}: no union member matched")]
    UnionMismatch { path: String },

    /// No member of an untagged union could serialize the value.
    #[error("no union member could serialize the value")]
    UnionSerialize,

    /// A tagged union met a discriminant it does not know.
    #[error("{path}: unknown variant `{tag}`")]
    UnknownVariant { path: String, tag: String },

    /// An identity-key field was absent when caching an entity. Key fields
    /// must be present and serializable before an entity can be cached.
    #[error("model `{model}`: identity key field `{field}` is missing")]
    MissingKeyField { model: String, field: String },

    /// An entity contract was parsed without a store context to resolve
    /// instances against.
    #[error("entity `{model}` parsed outside a store context")]
    NoEntityContext { model: String },
}
