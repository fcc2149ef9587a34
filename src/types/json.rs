//! JSON encoding of [`Value`].
//!
//! Primitives map to JSON primitives, arrays to sets and objects to
//! records. Three escapes are recognised inside objects:
//!
//! - `{"__entity": {"type": "User", "id": "alice"}}`
//! - `{"__extn": {"fn": "decimal", "arg": "0.455"}}`
//! - `{"__expr": "decimal(\"0.455\")"}` (older fixtures; also accepts an
//!   entity literal such as `User::"alice"`)
//!
//! All surface forms decode to the same canonical value.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value as JsonValue, json};

use crate::error::PolicyError;
use crate::extensions::ExtensionValue;

use super::{EntityUid, Value};

const ENTITY_ESCAPE: &str = "__entity";
const EXTENSION_ESCAPE: &str = "__extn";
const EXPR_ESCAPE: &str = "__expr";

static CALL_EXPR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*\(\s*"((?:[^"\\]|\\.)*)"\s*\)\s*$"#)
        .expect("call expression regex")
});

impl Value {
    /// Encode using the `__entity` and `__extn` escapes.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Long(n) => JsonValue::from(*n),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::EntityUid(uid) => json!({
                ENTITY_ESCAPE: { "type": uid.entity_type().name(), "id": uid.id() }
            }),
            Value::Set(values) => JsonValue::Array(values.iter().map(Value::to_json).collect()),
            Value::Record(attrs) => JsonValue::Object(
                attrs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<_, _>>(),
            ),
            Value::Extension(ext) => json!({
                EXTENSION_ESCAPE: { "fn": ext.constructor().to_string(), "arg": ext.argument() }
            }),
        }
    }

    /// Decode any of the accepted surface forms.
    pub fn from_json(json: &JsonValue) -> Result<Value, PolicyError> {
        match json {
            JsonValue::Null => Err(PolicyError::InvalidFormat(
                "null is not a valid value".to_string(),
            )),
            JsonValue::Bool(b) => Ok(Value::Bool(*b)),
            JsonValue::Number(n) => n.as_i64().map(Value::Long).ok_or_else(|| {
                PolicyError::InvalidFormat(format!("`{n}` is not a 64-bit integer"))
            }),
            JsonValue::String(s) => Ok(Value::String(s.clone())),
            JsonValue::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Result<BTreeSet<_>, _>>()
                .map(Value::Set),
            JsonValue::Object(map) => from_object(map),
        }
    }
}

fn from_object(map: &Map<String, JsonValue>) -> Result<Value, PolicyError> {
    if map.len() == 1 {
        if let Some(inner) = map.get(ENTITY_ESCAPE) {
            let uid: EntityUid = serde_json::from_value(inner.clone())?;
            return Ok(Value::EntityUid(uid));
        }
        if let Some(inner) = map.get(EXTENSION_ESCAPE) {
            return extension_escape(inner);
        }
        if let Some(inner) = map.get(EXPR_ESCAPE) {
            let text = inner.as_str().ok_or_else(|| {
                PolicyError::InvalidFormat(format!("`{EXPR_ESCAPE}` must hold a string"))
            })?;
            return expr_escape(text);
        }
    }

    map.iter()
        .map(|(k, v)| Ok((k.clone(), Value::from_json(v)?)))
        .collect::<Result<BTreeMap<_, _>, PolicyError>>()
        .map(Value::Record)
}

fn extension_escape(inner: &JsonValue) -> Result<Value, PolicyError> {
    let name = inner.get("fn").and_then(JsonValue::as_str);
    let arg = inner.get("arg");
    let (Some(name), Some(arg)) = (name, arg) else {
        return Err(PolicyError::InvalidFormat(format!(
            "`{EXTENSION_ESCAPE}` needs `fn` and `arg`, got {inner}"
        )));
    };

    // The argument is itself a value; older fixtures nest a `__expr` here.
    let arg = match Value::from_json(arg)? {
        Value::String(s) => s,
        Value::Extension(ext) => ext.argument(),
        other => {
            return Err(PolicyError::InvalidFormat(format!(
                "`{EXTENSION_ESCAPE}` argument must be a string, got {other}"
            )));
        }
    };

    construct(name, &arg)
}

fn expr_escape(text: &str) -> Result<Value, PolicyError> {
    if let Some(caps) = CALL_EXPR.captures(text) {
        let arg = caps[2].replace("\\\"", "\"").replace("\\\\", "\\");
        return construct(&caps[1], &arg);
    }
    text.parse::<EntityUid>()
        .map(Value::EntityUid)
        .map_err(|_| {
            PolicyError::InvalidFormat(format!(
                "`{EXPR_ESCAPE}` must be an extension call or an entity literal, got `{text}`"
            ))
        })
}

fn construct(name: &str, arg: &str) -> Result<Value, PolicyError> {
    ExtensionValue::construct(name, arg)
        .map(Value::Extension)
        .map_err(|e| PolicyError::InvalidFormat(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn decode(text: &str) -> Result<Value, PolicyError> {
        Value::from_json(&serde_json::from_str(text).unwrap())
    }

    #[parameterized(
        plain_extn = { r#"{"__extn": {"fn": "decimal", "arg": "0.455"}}"# },
        legacy_expr = { r#"{"__expr": "decimal(\"0.455\")"}"# },
        legacy_expr_spaces = { r#"{"__expr": " decimal( \"0.455\" ) "}"# },
        nested_expr_arg = { r#"{"__extn": {"fn": "decimal", "arg": {"__expr": "decimal(\"0.455\")"}}}"# },
    )]
    fn test_extension_surface_forms(text: &str) {
        let expected = Value::Extension(ExtensionValue::construct("decimal", "0.455").unwrap());
        assert_eq!(decode(text).unwrap(), expected);
    }

    #[parameterized(
        escape = { r#"{"__entity": {"type": "User", "id": "alice"}}"# },
        legacy_expr = { r#"{"__expr": "User::\"alice\""}"# },
    )]
    fn test_entity_surface_forms(text: &str) {
        assert_eq!(
            decode(text).unwrap(),
            Value::EntityUid(EntityUid::of("User", "alice"))
        );
    }

    #[test]
    fn test_records_and_sets() {
        let value = decode(r#"{"tags": ["a", "b", "a"], "level": 3, "ok": true}"#).unwrap();
        let expected = Value::record([
            ("tags", Value::set(["a".into(), "b".into()])),
            ("level", Value::Long(3)),
            ("ok", Value::Bool(true)),
        ]);
        assert_eq!(value, expected);
    }

    #[test]
    fn test_record_with_several_keys_is_not_an_escape() {
        let value = decode(r#"{"__entity": "x", "other": 1}"#).unwrap();
        assert!(matches!(value, Value::Record(ref attrs) if attrs.len() == 2));
    }

    #[parameterized(
        null = { "null" },
        float = { "1.5" },
        bad_decimal = { r#"{"__extn": {"fn": "decimal", "arg": "0.00001"}}"# },
        unknown_fn = { r#"{"__extn": {"fn": "datetime", "arg": "2024"}}"# },
        missing_arg = { r#"{"__extn": {"fn": "decimal"}}"# },
        garbage_expr = { r#"{"__expr": "1 + 1"}"# },
        u256_too_big = { r#"{"__extn": {"fn": "u256", "arg": "115792089237316195423570985008687907853269984665640564039457584007913129639936"}}"# },
    )]
    fn test_invalid(text: &str) {
        assert!(decode(text).is_err());
    }

    #[test]
    fn test_encode_uses_escapes() {
        let value = Value::record([
            ("who", Value::EntityUid(EntityUid::of("User", "alice"))),
            (
                "net",
                Value::Extension(ExtensionValue::construct("ip", "10.0.0.0/8").unwrap()),
            ),
        ]);
        assert_eq!(
            value.to_json(),
            json!({
                "who": {"__entity": {"type": "User", "id": "alice"}},
                "net": {"__extn": {"fn": "ip", "arg": "10.0.0.0/8"}}
            })
        );
        assert_eq!(Value::from_json(&value.to_json()).unwrap(), value);
    }
}
