// ── Contract combinators ──
//
// Constructors return `ContractRef`s so contracts compose freely. Scalars,
// containers, optionals, and both union flavors: tagged unions dispatch on a
// discriminant field; untagged unions fall back to trial parsing and are
// only appropriate where the wire format genuinely carries no tag.

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::Map as JsonMap;

use super::{Contract, ContractRef, ParseCx};
use crate::error::SchemaError;
use crate::json::Json;
use crate::value::{Fields, Value};

// ── Scalars ─────────────────────────────────────────────────────────

struct BooleanContract;

impl Contract for BooleanContract {
    fn parse(&self, cx: &mut ParseCx<'_>, raw: &Json) -> Result<Value, SchemaError> {
        raw.as_bool()
            .map(Value::Bool)
            .ok_or_else(|| cx.mismatch("boolean", raw))
    }

    fn serialize(&self, value: &Value) -> Result<Json, SchemaError> {
        match value {
            Value::Bool(b) => Ok(Json::Bool(*b)),
            other => Err(serialize_mismatch("boolean", other)),
        }
    }
}

pub fn boolean() -> ContractRef {
    Arc::new(BooleanContract)
}

struct IntegerContract;

impl Contract for IntegerContract {
    fn parse(&self, cx: &mut ParseCx<'_>, raw: &Json) -> Result<Value, SchemaError> {
        raw.as_i64()
            .map(Value::Int)
            .ok_or_else(|| cx.mismatch("integer", raw))
    }

    fn serialize(&self, value: &Value) -> Result<Json, SchemaError> {
        match value {
            Value::Int(n) => Ok(Json::from(*n)),
            other => Err(serialize_mismatch("integer", other)),
        }
    }
}

pub fn integer() -> ContractRef {
    Arc::new(IntegerContract)
}

struct FloatContract;

impl Contract for FloatContract {
    fn parse(&self, cx: &mut ParseCx<'_>, raw: &Json) -> Result<Value, SchemaError> {
        raw.as_f64()
            .map(Value::Float)
            .ok_or_else(|| cx.mismatch("number", raw))
    }

    fn serialize(&self, value: &Value) -> Result<Json, SchemaError> {
        let float = value
            .as_float()
            .ok_or_else(|| serialize_mismatch("number", value))?;
        serde_json::Number::from_f64(float)
            .map(Json::Number)
            .ok_or_else(|| serialize_mismatch("finite number", value))
    }
}

pub fn float() -> ContractRef {
    Arc::new(FloatContract)
}

struct StringContract;

impl Contract for StringContract {
    fn parse(&self, cx: &mut ParseCx<'_>, raw: &Json) -> Result<Value, SchemaError> {
        raw.as_str()
            .map(|s| Value::String(s.to_owned()))
            .ok_or_else(|| cx.mismatch("string", raw))
    }

    fn serialize(&self, value: &Value) -> Result<Json, SchemaError> {
        match value {
            Value::String(s) => Ok(Json::String(s.clone())),
            other => Err(serialize_mismatch("string", other)),
        }
    }
}

pub fn string() -> ContractRef {
    Arc::new(StringContract)
}

struct LiteralContract {
    expected: Json,
}

impl Contract for LiteralContract {
    fn parse(&self, cx: &mut ParseCx<'_>, raw: &Json) -> Result<Value, SchemaError> {
        if raw == &self.expected {
            scalar_from_json(raw).ok_or_else(|| cx.mismatch("scalar literal", raw))
        } else {
            Err(cx.mismatch(format!("literal {}", self.expected), raw))
        }
    }

    fn serialize(&self, value: &Value) -> Result<Json, SchemaError> {
        match scalar_to_json(value) {
            Some(raw) if raw == self.expected => Ok(raw),
            _ => Err(serialize_mismatch(format!("literal {}", self.expected), value)),
        }
    }
}

/// Accept exactly one scalar JSON value.
pub fn literal(expected: impl Into<Json>) -> ContractRef {
    Arc::new(LiteralContract {
        expected: expected.into(),
    })
}

struct StringEnumContract {
    variants: Vec<String>,
}

impl Contract for StringEnumContract {
    fn parse(&self, cx: &mut ParseCx<'_>, raw: &Json) -> Result<Value, SchemaError> {
        match raw.as_str() {
            Some(s) if self.variants.iter().any(|v| v == s) => Ok(Value::String(s.to_owned())),
            _ => Err(cx.mismatch(format!("one of {:?}", self.variants), raw)),
        }
    }

    fn serialize(&self, value: &Value) -> Result<Json, SchemaError> {
        match value.as_str() {
            Some(s) if self.variants.iter().any(|v| v == s) => Ok(Json::String(s.to_owned())),
            _ => Err(serialize_mismatch(format!("one of {:?}", self.variants), value)),
        }
    }
}

/// Accept one of a fixed set of strings.
pub fn string_enum<I, S>(variants: I) -> ContractRef
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Arc::new(StringEnumContract {
        variants: variants.into_iter().map(Into::into).collect(),
    })
}

struct IsoDateContract;

impl Contract for IsoDateContract {
    fn parse(&self, cx: &mut ParseCx<'_>, raw: &Json) -> Result<Value, SchemaError> {
        let text = raw
            .as_str()
            .filter(|s| s.len() == 10)
            .ok_or_else(|| cx.mismatch("ISO date (YYYY-MM-DD)", raw))?;
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|_| cx.mismatch("ISO date (YYYY-MM-DD)", raw))
    }

    fn serialize(&self, value: &Value) -> Result<Json, SchemaError> {
        match value {
            Value::Date(d) => Ok(Json::String(d.format("%Y-%m-%d").to_string())),
            other => Err(serialize_mismatch("date", other)),
        }
    }
}

/// Calendar date carried on the wire as `YYYY-MM-DD`.
pub fn iso_date() -> ContractRef {
    Arc::new(IsoDateContract)
}

// ── Wrappers ────────────────────────────────────────────────────────

struct OptionalContract {
    inner: ContractRef,
}

impl Contract for OptionalContract {
    fn parse(&self, cx: &mut ParseCx<'_>, raw: &Json) -> Result<Value, SchemaError> {
        self.inner.parse(cx, raw)
    }

    fn serialize(&self, value: &Value) -> Result<Json, SchemaError> {
        self.inner.serialize(value)
    }

    fn is_optional(&self) -> bool {
        true
    }
}

/// Mark a field as omittable: an enclosing object skips it when the key is
/// absent and omits it again on serialize.
pub fn optional(inner: ContractRef) -> ContractRef {
    Arc::new(OptionalContract { inner })
}

struct NullableContract {
    inner: ContractRef,
}

impl Contract for NullableContract {
    fn parse(&self, cx: &mut ParseCx<'_>, raw: &Json) -> Result<Value, SchemaError> {
        if raw.is_null() {
            Ok(Value::Null)
        } else {
            self.inner.parse(cx, raw)
        }
    }

    fn serialize(&self, value: &Value) -> Result<Json, SchemaError> {
        match value {
            Value::Null => Ok(Json::Null),
            other => self.inner.serialize(other),
        }
    }
}

/// Accept `null` in addition to the inner contract.
pub fn nullable(inner: ContractRef) -> ContractRef {
    Arc::new(NullableContract { inner })
}

// ── Containers ──────────────────────────────────────────────────────

struct ArrayContract {
    item: ContractRef,
}

impl Contract for ArrayContract {
    fn parse(&self, cx: &mut ParseCx<'_>, raw: &Json) -> Result<Value, SchemaError> {
        let items = raw.as_array().ok_or_else(|| cx.mismatch("array", raw))?;
        let mut parsed = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            parsed.push(cx.with_index(index, |cx| self.item.parse(cx, item))?);
        }
        Ok(Value::Array(parsed))
    }

    fn serialize(&self, value: &Value) -> Result<Json, SchemaError> {
        let items = value
            .as_array()
            .ok_or_else(|| serialize_mismatch("array", value))?;
        let mut raw = Vec::with_capacity(items.len());
        for item in items {
            raw.push(self.item.serialize(item)?);
        }
        Ok(Json::Array(raw))
    }
}

pub fn array(item: ContractRef) -> ContractRef {
    Arc::new(ArrayContract { item })
}

pub(crate) struct ObjectContract {
    props: Vec<(String, ContractRef)>,
}

impl Contract for ObjectContract {
    fn parse(&self, cx: &mut ParseCx<'_>, raw: &Json) -> Result<Value, SchemaError> {
        parse_props(cx, &self.props, raw).map(Value::Object)
    }

    fn serialize(&self, value: &Value) -> Result<Json, SchemaError> {
        match value {
            Value::Object(fields) => serialize_props(&self.props, fields),
            Value::Entity(instance) => {
                instance.with_fields(|fields| serialize_props(&self.props, fields))
            }
            other => Err(serialize_mismatch("object", other)),
        }
    }
}

/// Object with a fixed set of named fields.
pub fn object<I, K>(props: I) -> ContractRef
where
    I: IntoIterator<Item = (K, ContractRef)>,
    K: Into<String>,
{
    Arc::new(ObjectContract {
        props: props.into_iter().map(|(k, c)| (k.into(), c)).collect(),
    })
}

struct StringMapContract {
    value: ContractRef,
}

impl Contract for StringMapContract {
    fn parse(&self, cx: &mut ParseCx<'_>, raw: &Json) -> Result<Value, SchemaError> {
        let map = raw.as_object().ok_or_else(|| cx.mismatch("object", raw))?;
        let mut fields = Fields::with_capacity(map.len());
        for (key, item) in map {
            let parsed = cx.with_field(key, |cx| self.value.parse(cx, item))?;
            fields.insert(key.clone(), parsed);
        }
        Ok(Value::Object(fields))
    }

    fn serialize(&self, value: &Value) -> Result<Json, SchemaError> {
        let fields = value
            .as_object()
            .ok_or_else(|| serialize_mismatch("object", value))?;
        let mut raw = JsonMap::new();
        for (key, item) in fields {
            raw.insert(key.clone(), self.value.serialize(item)?);
        }
        Ok(Json::Object(raw))
    }
}

/// Object with arbitrary string keys and uniform values.
pub fn string_map(value: ContractRef) -> ContractRef {
    Arc::new(StringMapContract { value })
}

// ── Unions ──────────────────────────────────────────────────────────

struct UntaggedUnionContract {
    members: Vec<ContractRef>,
}

impl Contract for UntaggedUnionContract {
    fn parse(&self, cx: &mut ParseCx<'_>, raw: &Json) -> Result<Value, SchemaError> {
        for member in &self.members {
            if let Ok(value) = member.parse(cx, raw) {
                return Ok(value);
            }
        }
        Err(SchemaError::UnionMismatch { path: cx.path() })
    }

    fn serialize(&self, value: &Value) -> Result<Json, SchemaError> {
        for member in &self.members {
            if let Ok(raw) = member.serialize(value) {
                return Ok(raw);
            }
        }
        Err(SchemaError::UnionSerialize)
    }
}

/// Trial-based union for wire formats that carry no discriminant. Members
/// are tried in declaration order; prefer [`tagged_union`] whenever the
/// format has (or can grow) a tag field.
pub fn untagged_union<I>(members: I) -> ContractRef
where
    I: IntoIterator<Item = ContractRef>,
{
    Arc::new(UntaggedUnionContract {
        members: members.into_iter().collect(),
    })
}

struct TaggedUnionContract {
    tag: String,
    variants: Vec<(String, ContractRef)>,
}

impl Contract for TaggedUnionContract {
    fn parse(&self, cx: &mut ParseCx<'_>, raw: &Json) -> Result<Value, SchemaError> {
        let map = raw.as_object().ok_or_else(|| cx.mismatch("object", raw))?;
        let tag_raw = map.get(&self.tag);
        let Some(tag_value) = tag_raw.and_then(Json::as_str) else {
            return Err(cx.with_field(&self.tag, |cx| {
                cx.mismatch("string discriminant", tag_raw.unwrap_or(&Json::Null))
            }));
        };
        let Some((_, member)) = self.variants.iter().find(|(name, _)| name == tag_value) else {
            return Err(SchemaError::UnknownVariant {
                path: cx.path(),
                tag: tag_value.to_owned(),
            });
        };
        let mut value = member.parse(cx, raw)?;
        if let Value::Object(fields) = &mut value {
            fields.insert(self.tag.clone(), Value::String(tag_value.to_owned()));
        }
        Ok(value)
    }

    fn serialize(&self, value: &Value) -> Result<Json, SchemaError> {
        let tag_value = value
            .get(&self.tag)
            .and_then(|v| v.as_str().map(str::to_owned))
            .ok_or_else(|| serialize_mismatch(format!("object with `{}` tag", self.tag), value))?;
        let Some((_, member)) = self.variants.iter().find(|(name, _)| *name == tag_value) else {
            return Err(SchemaError::UnknownVariant {
                path: String::from("$"),
                tag: tag_value,
            });
        };
        let mut raw = member.serialize(value)?;
        if let Json::Object(map) = &mut raw {
            map.insert(self.tag.clone(), Json::String(tag_value));
        }
        Ok(raw)
    }
}

/// Discriminant-first union: the `tag` field selects the variant on both
/// parse and serialize.
pub fn tagged_union<I, K>(tag: impl Into<String>, variants: I) -> ContractRef
where
    I: IntoIterator<Item = (K, ContractRef)>,
    K: Into<String>,
{
    Arc::new(TaggedUnionContract {
        tag: tag.into(),
        variants: variants.into_iter().map(|(k, c)| (k.into(), c)).collect(),
    })
}

// ── Shared helpers ──────────────────────────────────────────────────

pub(crate) fn parse_props(
    cx: &mut ParseCx<'_>,
    props: &[(String, ContractRef)],
    raw: &Json,
) -> Result<Fields, SchemaError> {
    let map = raw.as_object().ok_or_else(|| cx.mismatch("object", raw))?;
    let mut fields = Fields::with_capacity(props.len());
    for (name, contract) in props {
        let parsed = cx.with_field(name, |cx| match map.get(name) {
            Some(raw_field) => contract.parse(cx, raw_field).map(Some),
            None if contract.is_optional() => Ok(None),
            None => Err(SchemaError::Parse {
                path: cx.path(),
                expected: "required field".to_owned(),
                found: "nothing".to_owned(),
            }),
        })?;
        if let Some(value) = parsed {
            fields.insert(name.clone(), value);
        }
    }
    Ok(fields)
}

pub(crate) fn serialize_props(
    props: &[(String, ContractRef)],
    fields: &Fields,
) -> Result<Json, SchemaError> {
    let mut raw = JsonMap::new();
    for (name, contract) in props {
        match fields.get(name) {
            Some(value) => {
                raw.insert(name.clone(), contract.serialize(value)?);
            }
            None if contract.is_optional() => {}
            None => {
                return Err(SchemaError::Serialize {
                    expected: format!("field `{name}`"),
                    found: "nothing".to_owned(),
                });
            }
        }
    }
    Ok(Json::Object(raw))
}

fn serialize_mismatch(expected: impl Into<String>, value: &Value) -> SchemaError {
    SchemaError::Serialize {
        expected: expected.into(),
        found: value.kind().to_owned(),
    }
}

fn scalar_from_json(raw: &Json) -> Option<Value> {
    match raw {
        Json::Null => Some(Value::Null),
        Json::Bool(b) => Some(Value::Bool(*b)),
        Json::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_f64().map(Value::Float)),
        Json::String(s) => Some(Value::String(s.clone())),
        _ => None,
    }
}

fn scalar_to_json(value: &Value) -> Option<Json> {
    match value {
        Value::Null => Some(Json::Null),
        Value::Bool(b) => Some(Json::Bool(*b)),
        Value::Int(n) => Some(Json::from(*n)),
        Value::Float(f) => serde_json::Number::from_f64(*f).map(Json::Number),
        Value::String(s) => Some(Json::String(s.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaError;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse(contract: &ContractRef, raw: &Json) -> Result<Value, SchemaError> {
        contract.parse(&mut ParseCx::detached(), raw)
    }

    #[test]
    fn object_round_trip() {
        let contract = object([
            ("id", integer()),
            ("name", string()),
            ("nickname", optional(string())),
            ("joined", iso_date()),
        ]);
        let raw = json!({"id": 7, "name": "ada", "joined": "2024-06-15"});

        let value = parse(&contract, &raw).expect("parses");
        assert_eq!(value.get("id"), Some(Value::Int(7)));
        assert_eq!(value.get("nickname"), None);
        assert_eq!(contract.serialize(&value).expect("serializes"), raw);
    }

    #[test]
    fn missing_required_field_reports_path() {
        let contract = object([("user", object([("id", integer())]))]);
        let err = parse(&contract, &json!({"user": {}})).expect_err("missing field");
        assert_eq!(
            err,
            SchemaError::Parse {
                path: "$.user.id".into(),
                expected: "required field".into(),
                found: "nothing".into(),
            }
        );
    }

    #[test]
    fn array_mismatch_reports_index() {
        let contract = array(integer());
        let err = parse(&contract, &json!([1, "two", 3])).expect_err("bad element");
        assert_eq!(
            err,
            SchemaError::Parse {
                path: "$[1]".into(),
                expected: "integer".into(),
                found: "string".into(),
            }
        );
    }

    #[test]
    fn nullable_accepts_null_and_inner() {
        let contract = nullable(integer());
        assert_eq!(parse(&contract, &json!(null)), Ok(Value::Null));
        assert_eq!(parse(&contract, &json!(3)), Ok(Value::Int(3)));
        assert_eq!(contract.serialize(&Value::Null), Ok(json!(null)));
    }

    #[test]
    fn iso_date_rejects_malformed_strings() {
        let contract = iso_date();
        assert!(parse(&contract, &json!("2024-6-15")).is_err());
        assert!(parse(&contract, &json!("2024-13-01")).is_err());

        let value = parse(&contract, &json!("2024-06-15")).expect("valid date");
        assert_eq!(contract.serialize(&value), Ok(json!("2024-06-15")));
    }

    #[test]
    fn tagged_union_dispatches_on_discriminant() {
        let contract = tagged_union(
            "kind",
            [
                ("circle", object([("radius", float())])),
                ("rect", object([("w", float()), ("h", float())])),
            ],
        );

        let value = parse(&contract, &json!({"kind": "circle", "radius": 2.0})).expect("parses");
        assert_eq!(value.get("kind"), Some(Value::from("circle")));
        assert_eq!(value.get("radius"), Some(Value::Float(2.0)));

        let raw = contract.serialize(&value).expect("serializes");
        assert_eq!(raw, json!({"kind": "circle", "radius": 2.0}));

        let err = parse(&contract, &json!({"kind": "blob"})).expect_err("unknown variant");
        assert!(matches!(err, SchemaError::UnknownVariant { tag, .. } if tag == "blob"));
    }

    #[test]
    fn untagged_union_tries_members_in_order() {
        let contract = untagged_union([integer(), string()]);
        assert_eq!(parse(&contract, &json!(5)), Ok(Value::Int(5)));
        assert_eq!(parse(&contract, &json!("five")), Ok(Value::from("five")));
        assert!(matches!(
            parse(&contract, &json!([])),
            Err(SchemaError::UnionMismatch { .. })
        ));
    }

    #[test]
    fn string_map_preserves_keys() {
        let contract = string_map(integer());
        let value = parse(&contract, &json!({"a": 1, "b": 2})).expect("parses");
        assert_eq!(value.get("b"), Some(Value::Int(2)));
        assert_eq!(
            contract.serialize(&value).expect("serializes"),
            json!({"a": 1, "b": 2})
        );
    }

    #[test]
    fn literal_and_string_enum() {
        let version = literal(json!(2));
        assert_eq!(parse(&version, &json!(2)), Ok(Value::Int(2)));
        assert!(parse(&version, &json!(3)).is_err());

        let role = string_enum(["admin", "member"]);
        assert_eq!(parse(&role, &json!("admin")), Ok(Value::from("admin")));
        assert!(parse(&role, &json!("guest")).is_err());
    }
}
