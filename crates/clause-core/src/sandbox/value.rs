//! Runtime values seen by executed logic
//!
//! Values enter the evaluator only from the boxed wire form and leave it only
//! through [`Value::to_boxed`], so integral numbers and collections keep their
//! identity across the sandbox boundary.

use std::collections::BTreeMap;

use serde_json::{Map, Number};

/// Runtime value for clause evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    /// Ordered map (BTreeMap for deterministic iteration)
    Object(BTreeMap<String, Value>),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Array(arr) => {
                write!(f, "[")?;
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Object(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\": {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl Value {
    /// Get the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Double",
            Value::String(_) => "String",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
        }
    }

    /// Like `Display`, but strings render without quotes
    pub fn to_text(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Convert from the boxed wire form
    ///
    /// `{"$nat": n}` becomes an integer and `{"$coll": [...], "$length": n}`
    /// an array; bare numbers and arrays are accepted as well.
    pub fn from_boxed(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Null
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(arr) => Value::Array(arr.iter().map(Value::from_boxed).collect()),
            serde_json::Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(serde_json::Value::Number(n)) = map.get("$nat") {
                        if let Some(i) = n.as_i64() {
                            return Value::Integer(i);
                        }
                    }
                }
                if map.len() == 2 && map.contains_key("$length") {
                    if let Some(serde_json::Value::Array(items)) = map.get("$coll") {
                        return Value::Array(items.iter().map(Value::from_boxed).collect());
                    }
                }
                Value::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), Value::from_boxed(v)))
                        .collect(),
                )
            }
        }
    }

    /// Convert to the boxed wire form
    pub fn to_boxed(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::json!({ "$nat": i }),
            Value::Float(f) => Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(arr) => serde_json::json!({
                "$coll": arr.iter().map(Value::to_boxed).collect::<Vec<_>>(),
                "$length": arr.len(),
            }),
            Value::Object(map) => {
                let obj: Map<String, serde_json::Value> =
                    map.iter().map(|(k, v)| (k.clone(), v.to_boxed())).collect();
                serde_json::Value::Object(obj)
            }
        }
    }

    /// The `$class` of an object value
    pub fn class(&self) -> Option<&str> {
        match self {
            Value::Object(map) => match map.get("$class") {
                Some(Value::String(class)) => Some(class),
                _ => None,
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_boxed_unwraps_markers() {
        let boxed = json!({
            "$class": "org.acme.test.Bag",
            "counts": {"$coll": [{"$nat": 1}, 2.5], "$length": 2},
            "n": {"$nat": 3}
        });
        let value = Value::from_boxed(&boxed);
        let Value::Object(map) = &value else {
            panic!("expected an object");
        };
        assert_eq!(map["n"], Value::Integer(3));
        assert_eq!(
            map["counts"],
            Value::Array(vec![Value::Integer(1), Value::Float(2.5)])
        );
        assert_eq!(value.class(), Some("org.acme.test.Bag"));
        assert_eq!(value.to_boxed(), boxed);
    }

    #[test]
    fn test_to_text() {
        assert_eq!(Value::String("hi".into()).to_text(), "hi");
        assert_eq!(Value::Integer(4).to_text(), "4");
        assert_eq!(Value::Null.to_text(), "nil");
    }
}
