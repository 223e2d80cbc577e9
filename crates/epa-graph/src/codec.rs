// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Property flattening for property-only backends.
//!
//! The backing store holds scalars only. Nested maps and lists are written
//! as JSON text tagged [`Scalar::Json`] and parsed back on read; plain
//! strings are never re-parsed. Everything above this module works with
//! structured [`serde_json::Value`]s.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::model::Properties;

/// A value the backend can hold directly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// Text.
    Str(String),
    /// A nested map or list, serialized.
    Json(String),
}

/// Flattened property row.
pub type ScalarMap = BTreeMap<String, Scalar>;

/// Flatten one value. `None` for nulls, which are not stored.
pub fn flatten_value(value: &Value) -> Option<Scalar> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(Scalar::Bool(*b)),
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => Scalar::Int(i),
            None => Scalar::Float(n.as_f64().unwrap_or_default()),
        }),
        Value::String(s) => Some(Scalar::Str(s.clone())),
        Value::Array(_) | Value::Object(_) => Some(Scalar::Json(value.to_string())),
    }
}

/// Flatten a property map.
pub fn flatten(properties: &Properties) -> ScalarMap {
    properties
        .iter()
        .filter_map(|(k, v)| flatten_value(v).map(|s| (k.clone(), s)))
        .collect()
}

/// Inflate one scalar. Only [`Scalar::Json`] is parsed; text that fails to
/// parse comes back as a string.
pub fn inflate_value(scalar: &Scalar) -> Value {
    match scalar {
        Scalar::Bool(b) => Value::Bool(*b),
        Scalar::Int(i) => Value::Number((*i).into()),
        Scalar::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        Scalar::Str(s) => Value::String(s.clone()),
        Scalar::Json(text) => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
        }
    }
}

/// Inflate a stored row back into properties.
pub fn inflate(row: &ScalarMap) -> Properties {
    row.iter()
        .map(|(k, v)| (k.clone(), inflate_value(v)))
        .collect()
}

/// Text form used for property lookups by string value.
pub fn scalar_text(scalar: &Scalar) -> String {
    match scalar {
        Scalar::Bool(b) => b.to_string(),
        Scalar::Int(i) => i.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::Str(s) | Scalar::Json(s) => s.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_values_become_json_text() {
        let props = json!({
            "attributes": {"depth": "1", "sriov": {"numvfs": "4"}},
            "type": "Cache",
            "dpdk": true,
            "gone": null
        });
        let row = flatten(props.as_object().unwrap());
        assert!(matches!(row.get("attributes"), Some(Scalar::Json(s)) if s.contains("\"depth\"")));
        assert_eq!(row.get("dpdk"), Some(&Scalar::Bool(true)));
        assert!(!row.contains_key("gone"));

        let back = inflate(&row);
        assert_eq!(back["attributes"]["sriov"]["numvfs"], json!("4"));
        assert_eq!(back["type"], json!("Cache"));
    }

    #[test]
    fn malformed_json_text_stays_a_string() {
        let v = inflate_value(&Scalar::Json("[not json".into()));
        assert_eq!(v, json!("[not json"));
    }

    #[test]
    fn json_looking_strings_stay_strings() {
        let props = json!({
            "name": "[1,2]",
            "description": "{}",
            "attributes": {"tags": "[a]"},
            "ports": ["p1"]
        });
        let row = flatten(props.as_object().unwrap());
        assert_eq!(row.get("name"), Some(&Scalar::Str("[1,2]".into())));

        let back = inflate(&row);
        assert_eq!(back["name"], json!("[1,2]"));
        assert_eq!(back["description"], json!("{}"));
        assert_eq!(back["attributes"]["tags"], json!("[a]"));
        assert_eq!(back["ports"], json!(["p1"]));
    }
}
