//! Boxing codec — reversible transform between wire JSON and the boxed form
//!
//! Executed logic distinguishes integral numbers and collections from plain
//! JSON by their wrappers:
//!
//! ```text
//! 7            ⇄  {"$nat": 7}
//! [1, 2.5]     ⇄  {"$coll": [{"$nat": 1}, 2.5], "$length": 2}
//! ```
//!
//! Objects are boxed field by field; every other value is left alone.
//! `unbox_value(box_value(v)) == v` for every JSON value `v`.

use serde_json::{Map, Value};

const NAT: &str = "$nat";
const COLL: &str = "$coll";
const LENGTH: &str = "$length";

/// Wire JSON → boxed form
pub fn box_value(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => {
            let mut object = Map::new();
            object.insert(NAT.to_string(), value.clone());
            Value::Object(object)
        }
        Value::Array(items) => {
            let mut object = Map::new();
            object.insert(
                COLL.to_string(),
                Value::Array(items.iter().map(box_value).collect()),
            );
            object.insert(LENGTH.to_string(), Value::from(items.len()));
            Value::Object(object)
        }
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), box_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Boxed form → wire JSON
pub fn unbox_value(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            if let Some(n) = nat(fields) {
                return n.clone();
            }
            if let Some(items) = coll(fields) {
                return Value::Array(items.iter().map(unbox_value).collect());
            }
            Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), unbox_value(v)))
                    .collect(),
            )
        }
        // Plain arrays only appear in hand-written boxed values
        Value::Array(items) => Value::Array(items.iter().map(unbox_value).collect()),
        other => other.clone(),
    }
}

fn nat(fields: &Map<String, Value>) -> Option<&Value> {
    if fields.len() != 1 {
        return None;
    }
    fields.get(NAT).filter(|v| v.is_number())
}

fn coll(fields: &Map<String, Value>) -> Option<&Vec<Value>> {
    if fields.len() != 2 || !fields.get(LENGTH).is_some_and(Value::is_number) {
        return None;
    }
    fields.get(COLL).and_then(Value::as_array)
}
