// ── Raw JSON helpers ──
//
// The external (wire) representation is `serde_json::Value`. With default
// serde_json features the object map is sorted by key, so `to_string` of a
// serialized value is deterministic regardless of field insertion order —
// that property is what makes fingerprints usable as cache keys.

/// External (wire) representation produced by `serialize` and consumed by
/// `parse`.
pub type Json = serde_json::Value;

/// Stable cache-key string for serialized request parameters.
///
/// Two parameter values that serialize to the same JSON produce the same
/// fingerprint, independent of object field order.
pub fn fingerprint(raw: &Json) -> String {
    raw.to_string()
}

/// Human-readable kind of a JSON value, used in validation errors.
pub fn json_kind(raw: &Json) -> &'static str {
    match raw {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
