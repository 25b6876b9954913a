//! The semantic value model.
//!
//! Every operator input and output in the engine is a [`Value`]. `Undefined`
//! and `Error` are first-class variants that flow through evaluation like any
//! other value -- no hidden exceptions escape an evaluator. All numbers are
//! `rust_decimal::Decimal`; never `f64` on the evaluation path.
//!
//! Two JSON forms exist:
//!
//! - the **plain form** ([`Value::from_json`] / [`Value::to_json`]) used for
//!   subscriptions and decisions arriving as ordinary JSON; it is lossy for
//!   `Undefined` and `Error`
//! - the **wire form** ([`Value::to_wire`] / [`Value::from_wire`]) which
//!   round-trips every variant losslessly

use std::hash::{Hash, Hasher};
use std::str::FromStr;

use indexmap::IndexMap;
use rust_decimal::Decimal;

/// Malformed value wire form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed value wire form: {0}")]
pub struct WireError(pub String);

// ──────────────────────────────────────────────
// Value
// ──────────────────────────────────────────────

/// A tagged semantic value.
///
/// Object entries preserve insertion order. Structural equality; number
/// equality ignores trailing-zero scale differences (`1.0 == 1.00`); two
/// errors are equal iff their messages are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Undefined,
    Bool(bool),
    Number(Decimal),
    Text(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    Error(String),
}

impl Value {
    /// Returns a human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Error(_) => "error",
        }
    }

    /// Shorthand constructor for numbers.
    pub fn number(n: impl Into<Decimal>) -> Value {
        Value::Number(n.into())
    }

    /// Shorthand constructor for text.
    pub fn text(s: impl Into<String>) -> Value {
        Value::Text(s.into())
    }

    /// Shorthand constructor for error values.
    pub fn error(message: impl Into<String>) -> Value {
        Value::Error(message.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, Value::Undefined | Value::Error(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&Decimal> {
        match self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Object(entries) => Some(entries),
            _ => None,
        }
    }

    // ── Plain JSON form ──────────────────────────────────────────────

    /// Convert plain JSON into a value.
    ///
    /// Numbers are parsed into `Decimal` at full precision; a number the
    /// decimal model cannot represent becomes an error value.
    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match Decimal::from_str(&n.to_string()) {
                Ok(d) => Value::Number(d),
                Err(_) => Value::error(format!("number out of decimal range: {}", n)),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to plain JSON. Lossy: `Undefined` becomes `null` (and is
    /// dropped from object entries), `Error` becomes a diagnostic string.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Undefined => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(d) => decimal_to_json(d),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    if v.is_undefined() {
                        continue;
                    }
                    map.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
            Value::Error(message) => serde_json::Value::String(format!("error: {}", message)),
        }
    }

    // ── Wire form ────────────────────────────────────────────────────

    /// Serialize to the lossless kind-tagged wire form.
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::json!({ "kind": "null_value" }),
            Value::Undefined => serde_json::json!({ "kind": "undefined_value" }),
            Value::Bool(b) => serde_json::json!({ "kind": "bool_value", "value": b }),
            Value::Number(d) => {
                serde_json::json!({ "kind": "number_value", "value": d.to_string() })
            }
            Value::Text(s) => serde_json::json!({ "kind": "text_value", "value": s }),
            Value::Array(items) => {
                let elements: Vec<serde_json::Value> = items.iter().map(Value::to_wire).collect();
                serde_json::json!({ "kind": "array_value", "elements": elements })
            }
            Value::Object(entries) => {
                // Entries as an array of pairs so insertion order survives
                // parsers that reorder JSON object keys.
                let pairs: Vec<serde_json::Value> = entries
                    .iter()
                    .map(|(k, v)| serde_json::json!([k, v.to_wire()]))
                    .collect();
                serde_json::json!({ "kind": "object_value", "entries": pairs })
            }
            Value::Error(message) => {
                serde_json::json!({ "kind": "error_value", "message": message })
            }
        }
    }

    /// Deserialize the wire form produced by [`Value::to_wire`].
    pub fn from_wire(v: &serde_json::Value) -> Result<Value, WireError> {
        let kind = v
            .get("kind")
            .and_then(|k| k.as_str())
            .ok_or_else(|| WireError("missing 'kind' field".to_string()))?;
        match kind {
            "null_value" => Ok(Value::Null),
            "undefined_value" => Ok(Value::Undefined),
            "bool_value" => {
                let b = v
                    .get("value")
                    .and_then(|b| b.as_bool())
                    .ok_or_else(|| WireError("bool_value missing 'value'".to_string()))?;
                Ok(Value::Bool(b))
            }
            "number_value" => {
                let s = v
                    .get("value")
                    .and_then(|s| s.as_str())
                    .ok_or_else(|| WireError("number_value missing 'value'".to_string()))?;
                let d = Decimal::from_str(s)
                    .map_err(|e| WireError(format!("invalid decimal '{}': {}", s, e)))?;
                Ok(Value::Number(d))
            }
            "text_value" => {
                let s = v
                    .get("value")
                    .and_then(|s| s.as_str())
                    .ok_or_else(|| WireError("text_value missing 'value'".to_string()))?;
                Ok(Value::Text(s.to_string()))
            }
            "array_value" => {
                let elements = v
                    .get("elements")
                    .and_then(|e| e.as_array())
                    .ok_or_else(|| WireError("array_value missing 'elements'".to_string()))?;
                let items: Result<Vec<Value>, WireError> =
                    elements.iter().map(Value::from_wire).collect();
                Ok(Value::Array(items?))
            }
            "object_value" => {
                let pairs = v
                    .get("entries")
                    .and_then(|e| e.as_array())
                    .ok_or_else(|| WireError("object_value missing 'entries'".to_string()))?;
                let mut entries = IndexMap::with_capacity(pairs.len());
                for pair in pairs {
                    let kv = pair
                        .as_array()
                        .filter(|kv| kv.len() == 2)
                        .ok_or_else(|| WireError("object entry must be a [key, value] pair".to_string()))?;
                    let key = kv[0]
                        .as_str()
                        .ok_or_else(|| WireError("object entry key must be text".to_string()))?;
                    entries.insert(key.to_string(), Value::from_wire(&kv[1])?);
                }
                Ok(Value::Object(entries))
            }
            "error_value" => {
                let message = v
                    .get("message")
                    .and_then(|m| m.as_str())
                    .ok_or_else(|| WireError("error_value missing 'message'".to_string()))?;
                Ok(Value::Error(message.to_string()))
            }
            other => Err(WireError(format!("unknown value kind '{}'", other))),
        }
    }
}

// Serde goes through the wire form so every variant survives, letting AST
// literals and persisted attributes embed values directly.
impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Value {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Value::from_wire(&raw).map_err(serde::de::Error::custom)
    }
}

fn decimal_to_json(d: &Decimal) -> serde_json::Value {
    match serde_json::Number::from_str(&d.to_string()) {
        Ok(n) => serde_json::Value::Number(n),
        Err(_) => serde_json::Value::String(d.to_string()),
    }
}

// Hash must agree with the order-insensitive object equality of `IndexMap`,
// so object entries are folded with a commutative accumulator.
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => state.write_u8(0),
            Value::Undefined => state.write_u8(1),
            Value::Bool(b) => {
                state.write_u8(2);
                b.hash(state);
            }
            Value::Number(d) => {
                state.write_u8(3);
                d.hash(state);
            }
            Value::Text(s) => {
                state.write_u8(4);
                s.hash(state);
            }
            Value::Array(items) => {
                state.write_u8(5);
                state.write_usize(items.len());
                for item in items {
                    item.hash(state);
                }
            }
            Value::Object(entries) => {
                state.write_u8(6);
                state.write_usize(entries.len());
                let mut acc: u64 = 0;
                for (k, v) in entries {
                    let mut entry_hasher = std::collections::hash_map::DefaultHasher::new();
                    k.hash(&mut entry_hasher);
                    v.hash(&mut entry_hasher);
                    acc = acc.wrapping_add(entry_hasher.finish());
                }
                state.write_u64(acc);
            }
            Value::Error(message) => {
                state.write_u8(7);
                message.hash(state);
            }
        }
    }
}

// ──────────────────────────────────────────────
// Builders
// ──────────────────────────────────────────────

/// Builder for array values.
#[derive(Debug, Default)]
pub struct ArrayBuilder {
    items: Vec<Value>,
}

impl ArrayBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item(mut self, value: Value) -> Self {
        self.items.push(value);
        self
    }

    pub fn build(self) -> Value {
        Value::Array(self.items)
    }
}

/// Builder for object values; entries keep insertion order.
#[derive(Debug, Default)]
pub struct ObjectBuilder {
    entries: IndexMap<String, Value>,
}

impl ObjectBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.entries.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.entries)
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn number_equality_ignores_scale() {
        assert_eq!(Value::Number(dec("1.0")), Value::Number(dec("1.00")));
        assert_eq!(Value::Number(dec("100")), Value::Number(dec("100.000")));
        assert_ne!(Value::Number(dec("1.0")), Value::Number(dec("1.01")));
    }

    #[test]
    fn undefined_is_distinct_from_null() {
        assert_ne!(Value::Null, Value::Undefined);
        assert!(Value::Undefined.is_undefined());
        assert!(!Value::Null.is_undefined());
    }

    #[test]
    fn errors_equal_iff_messages_equal() {
        assert_eq!(Value::error("boom"), Value::error("boom"));
        assert_ne!(Value::error("boom"), Value::error("bang"));
    }

    #[test]
    fn object_builder_preserves_insertion_order() {
        let obj = ObjectBuilder::new()
            .entry("z", Value::number(1))
            .entry("a", Value::number(2))
            .entry("m", Value::number(3))
            .build();
        let keys: Vec<&String> = obj.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn from_json_parses_numbers_as_decimal() {
        let v: serde_json::Value = serde_json::from_str("3.1415926535897932384626433832").unwrap();
        let parsed = Value::from_json(&v);
        assert_eq!(parsed, Value::Number(dec("3.1415926535897932384626433832")));
    }

    #[test]
    fn wire_round_trip_all_variants() {
        let value = ObjectBuilder::new()
            .entry("n", Value::Null)
            .entry("u", Value::Undefined)
            .entry("b", Value::Bool(true))
            .entry("num", Value::Number(dec("12.3400")))
            .entry("t", Value::text("hi"))
            .entry(
                "arr",
                ArrayBuilder::new()
                    .item(Value::error("division by zero"))
                    .item(Value::Array(vec![Value::Null, Value::Undefined]))
                    .build(),
            )
            .build();
        let wire = value.to_wire();
        assert_eq!(Value::from_wire(&wire).unwrap(), value);
    }

    #[test]
    fn wire_round_trip_preserves_object_order() {
        let value = ObjectBuilder::new()
            .entry("second", Value::number(2))
            .entry("first", Value::number(1))
            .build();
        let round = Value::from_wire(&value.to_wire()).unwrap();
        let keys: Vec<&String> = round.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["second", "first"]);
    }

    #[test]
    fn from_wire_rejects_unknown_kind() {
        let err = Value::from_wire(&serde_json::json!({ "kind": "mystery" })).unwrap_err();
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn to_json_drops_undefined_object_entries() {
        let obj = ObjectBuilder::new()
            .entry("kept", Value::number(1))
            .entry("gone", Value::Undefined)
            .build();
        let json = obj.to_json();
        assert_eq!(json, serde_json::json!({ "kept": 1 }));
    }

    #[test]
    fn hash_agrees_with_object_equality_across_entry_order() {
        use std::collections::hash_map::DefaultHasher;

        let a = ObjectBuilder::new()
            .entry("x", Value::number(1))
            .entry("y", Value::number(2))
            .build();
        let b = ObjectBuilder::new()
            .entry("y", Value::number(2))
            .entry("x", Value::number(1))
            .build();
        assert_eq!(a, b);

        let mut ha = DefaultHasher::new();
        a.hash(&mut ha);
        let mut hb = DefaultHasher::new();
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn type_names() {
        assert_eq!(Value::Null.type_name(), "null");
        assert_eq!(Value::Undefined.type_name(), "undefined");
        assert_eq!(Value::number(1).type_name(), "number");
        assert_eq!(Value::error("x").type_name(), "error");
    }
}
