//! JSON ⇄ typed value conversion
//!
//! [`from_json`] is the only way a wire value becomes a [`TypedValue`]; it
//! performs the full structural validation against the loaded model.
//! [`to_json`] renders a typed value back to wire JSON under a set of
//! [`Options`] and a UTC offset.
//!
//! Guarantees:
//! - Every rejection is a `ValidationError` naming the offending field path,
//!   e.g. `org.acme.Foo.amounts[2]`
//! - Rendering is deterministic: fields appear in sorted key order

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde_json::{Map, Value};

use super::{DeclKind, ModelManager, ResolvedField};
use crate::config::Options;
use crate::{Error, Result};

const RESOURCE_PREFIX: &str = "resource:";
const EPOCH: &str = "1970-01-01T00:00:00Z";

/// A value that has passed structural validation
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Boolean(bool),
    String(String),
    Double(f64),
    Integer(i64),
    DateTime(DateTime<FixedOffset>),
    Enum(String),
    Array(Vec<TypedValue>),
    /// A nested value of a declared class
    Resource(Resource),
    /// A reference to an identified resource
    Relationship { class: String, id: String },
    /// A full resource supplied where a relationship is declared
    Embedded(Resource),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    /// Fully-qualified class name
    pub class: String,
    /// Value of the identifying field, for identified classes
    pub identifier: Option<String>,
    pub fields: BTreeMap<String, TypedValue>,
}

impl TypedValue {
    pub fn as_resource(&self) -> Option<&Resource> {
        match self {
            TypedValue::Resource(r) | TypedValue::Embedded(r) => Some(r),
            _ => None,
        }
    }
}

// ── Deserialization ───────────────────────────────────────

/// Parse and validate a `$class`-tagged JSON object
///
/// When `expected` is given, the value's class must be that type or one of
/// its subtypes.
pub fn from_json(
    manager: &ModelManager,
    json: &Value,
    expected: Option<&str>,
    options: &Options,
) -> Result<TypedValue> {
    let object = json
        .as_object()
        .ok_or_else(|| Error::validation("$class", "expected an object with a $class"))?;
    let reader = Reader { manager, options };
    reader.object(object, expected, None).map(TypedValue::Resource)
}

struct Reader<'a> {
    manager: &'a ModelManager,
    options: &'a Options,
}

impl Reader<'_> {
    fn object(
        &self,
        object: &Map<String, Value>,
        expected: Option<&str>,
        path: Option<&str>,
    ) -> Result<Resource> {
        let class = self.class_of(object, path)?;
        let here = path.map(str::to_string).unwrap_or_else(|| class.clone());

        if let Some(expected) = expected {
            if !self.manager.is_subtype(&class, expected) {
                return Err(Error::validation(
                    &here,
                    format!("'{}' is not a subtype of '{}'", class, expected),
                ));
            }
        }
        let decl = self
            .manager
            .class(&class)
            .ok_or_else(|| Error::validation(&here, format!("unknown class '{}'", class)))?;
        if decl.is_abstract {
            return Err(Error::validation(
                &here,
                format!("cannot instantiate abstract type '{}'", class),
            ));
        }
        if decl.kind == DeclKind::Enum {
            return Err(Error::validation(
                &here,
                format!("enum '{}' cannot be given as an object", class),
            ));
        }

        let declared = self.manager.fields(&class);
        for key in object.keys() {
            if !key.starts_with('$') && !declared.iter().any(|f| &f.name == key) {
                return Err(Error::validation(
                    format!("{}.{}", here, key),
                    format!("field is not declared in '{}'", class),
                ));
            }
        }

        let mut fields = BTreeMap::new();
        for field in &declared {
            let field_path = format!("{}.{}", here, field.name);
            match object.get(&field.name) {
                None | Some(Value::Null) if field.optional => {}
                None | Some(Value::Null) => {
                    return Err(Error::validation(field_path, "missing required field"));
                }
                Some(value) => {
                    let typed = self.field(field, value, &field_path)?;
                    fields.insert(field.name.clone(), typed);
                }
            }
        }

        let identifier = self.manager.identifier_field(&class).and_then(|id| {
            match fields.get(&id) {
                Some(TypedValue::String(s)) => Some(s.clone()),
                _ => None,
            }
        });

        Ok(Resource {
            class,
            identifier,
            fields,
        })
    }

    /// `$class` may be a string or a list of candidates; the first one the
    /// model knows wins
    fn class_of(&self, object: &Map<String, Value>, path: Option<&str>) -> Result<String> {
        let at = path.unwrap_or("$class");
        let candidates: Vec<&str> = match object.get("$class") {
            Some(Value::String(s)) => vec![s.as_str()],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            Some(_) => return Err(Error::validation(at, "$class must be a string")),
            None => return Err(Error::validation(at, "missing $class")),
        };
        candidates
            .iter()
            .find(|c| self.manager.class(c).is_some())
            .map(|c| c.to_string())
            .ok_or_else(|| {
                Error::validation(at, format!("unknown class '{}'", candidates.join("', '")))
            })
    }

    fn field(&self, field: &ResolvedField, value: &Value, path: &str) -> Result<TypedValue> {
        if field.array {
            let items = value
                .as_array()
                .ok_or_else(|| Error::validation(path, "expected an array"))?;
            return items
                .iter()
                .enumerate()
                .map(|(i, item)| self.single(field, item, &format!("{}[{}]", path, i)))
                .collect::<Result<Vec<_>>>()
                .map(TypedValue::Array);
        }
        self.single(field, value, path)
    }

    fn single(&self, field: &ResolvedField, value: &Value, path: &str) -> Result<TypedValue> {
        if field.relationship {
            return self.relationship(&field.ty, value, path);
        }
        match field.ty.as_str() {
            "Boolean" => value
                .as_bool()
                .map(TypedValue::Boolean)
                .ok_or_else(|| Error::validation(path, "expected a Boolean")),
            "String" => value
                .as_str()
                .map(|s| TypedValue::String(s.to_string()))
                .ok_or_else(|| Error::validation(path, "expected a String")),
            "Double" => value
                .as_f64()
                .map(TypedValue::Double)
                .ok_or_else(|| Error::validation(path, "expected a Double")),
            "Integer" | "Long" => integral(value)
                .map(TypedValue::Integer)
                .ok_or_else(|| Error::validation(path, format!("expected an {}", field.ty))),
            "DateTime" => {
                let text = value
                    .as_str()
                    .ok_or_else(|| Error::validation(path, "expected a DateTime string"))?;
                DateTime::parse_from_rfc3339(text)
                    .map(TypedValue::DateTime)
                    .map_err(|e| Error::validation(path, format!("invalid DateTime: {}", e)))
            }
            class => self.class_value(class, value, path),
        }
    }

    fn class_value(&self, class: &str, value: &Value, path: &str) -> Result<TypedValue> {
        let decl = self
            .manager
            .class(class)
            .ok_or_else(|| Error::validation(path, format!("unknown type '{}'", class)))?;
        if decl.kind == DeclKind::Enum {
            let name = value
                .as_str()
                .ok_or_else(|| Error::validation(path, "expected an enum value"))?;
            if !decl.enum_values.iter().any(|v| v == name) {
                return Err(Error::validation(
                    path,
                    format!("'{}' is not a value of '{}'", name, class),
                ));
            }
            return Ok(TypedValue::Enum(name.to_string()));
        }
        let object = value
            .as_object()
            .ok_or_else(|| Error::validation(path, format!("expected a '{}' object", class)))?;
        self.object(object, Some(class), Some(path))
            .map(TypedValue::Resource)
    }

    fn relationship(&self, target: &str, value: &Value, path: &str) -> Result<TypedValue> {
        match value {
            Value::String(reference) => {
                let (class, id) = parse_reference(reference)
                    .ok_or_else(|| Error::validation(path, "malformed resource reference"))?;
                if !self.manager.is_subtype(class, target) {
                    return Err(Error::validation(
                        path,
                        format!("'{}' is not a subtype of '{}'", class, target),
                    ));
                }
                Ok(TypedValue::Relationship {
                    class: class.to_string(),
                    id: id.to_string(),
                })
            }
            Value::Object(object) if self.options.accept_resources_for_relationships => {
                let resource = self.object(object, Some(target), Some(path))?;
                if resource.identifier.is_none() {
                    return Err(Error::validation(path, "embedded resource has no identifier"));
                }
                Ok(TypedValue::Embedded(resource))
            }
            _ => Err(Error::validation(
                path,
                "expected a relationship reference 'resource:Type#id'",
            )),
        }
    }
}

fn integral(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    let f = value.as_f64()?;
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64).then_some(f as i64)
}

/// Split `resource:NS.Type#id` into its class and identifier
pub fn parse_reference(reference: &str) -> Option<(&str, &str)> {
    let (class, id) = reference.strip_prefix(RESOURCE_PREFIX)?.split_once('#')?;
    (!class.is_empty() && !id.is_empty()).then_some((class, id))
}

fn reference(class: &str, id: &str) -> String {
    format!("{}{}#{}", RESOURCE_PREFIX, class, id)
}

// ── Serialization ─────────────────────────────────────────

/// The fixed offset `utc_offset` minutes east of UTC
///
/// # Errors
/// `ValidationError` at `utcOffset` unless the offset is within ±1439 minutes.
pub fn fixed_offset(utc_offset: i32) -> Result<FixedOffset> {
    utc_offset
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| {
            Error::validation("utcOffset", format!("{} minutes is out of range", utc_offset))
        })
}

/// Render a typed value as wire JSON
///
/// DateTimes are rendered in `utc_offset` minutes east of UTC.
pub fn to_json(
    manager: &ModelManager,
    value: &TypedValue,
    options: &Options,
    utc_offset: i32,
) -> Result<Value> {
    let offset = fixed_offset(utc_offset)?;
    let writer = Writer {
        manager,
        options,
        offset,
    };
    Ok(writer.value(value, false))
}

struct Writer<'a> {
    manager: &'a ModelManager,
    options: &'a Options,
    offset: FixedOffset,
}

impl Writer<'_> {
    fn value(&self, value: &TypedValue, relationship: bool) -> Value {
        match value {
            TypedValue::Boolean(b) => Value::Bool(*b),
            TypedValue::String(s) | TypedValue::Enum(s) => Value::String(s.clone()),
            TypedValue::Double(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            TypedValue::Integer(i) => Value::from(*i),
            TypedValue::DateTime(dt) => Value::String(
                dt.with_timezone(&self.offset)
                    .to_rfc3339_opts(SecondsFormat::Millis, false),
            ),
            TypedValue::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.value(item, relationship))
                    .collect(),
            ),
            TypedValue::Resource(resource) => self.resource(resource),
            TypedValue::Relationship { class, id } => {
                if self.options.convert_resources_to_id {
                    Value::String(id.clone())
                } else {
                    Value::String(reference(class, id))
                }
            }
            TypedValue::Embedded(resource) if relationship => self.embedded(resource),
            TypedValue::Embedded(resource) => self.resource(resource),
        }
    }

    fn embedded(&self, resource: &Resource) -> Value {
        let id = resource.identifier.clone().unwrap_or_default();
        if self.options.convert_resources_to_id {
            Value::String(id)
        } else if self.options.convert_resources_to_relationships {
            Value::String(reference(&resource.class, &id))
        } else if self.options.permit_resources_for_relationships {
            self.resource(resource)
        } else {
            Value::String(reference(&resource.class, &id))
        }
    }

    fn resource(&self, resource: &Resource) -> Value {
        let mut object = Map::new();
        object.insert("$class".to_string(), Value::String(resource.class.clone()));
        for field in self.manager.fields(&resource.class) {
            if let Some(value) = resource.fields.get(&field.name) {
                object.insert(field.name.clone(), self.value(value, field.relationship));
            }
        }
        Value::Object(object)
    }
}

// ── Factory ───────────────────────────────────────────────

impl ModelManager {
    /// Build an instance of `class` with type defaults for required fields
    ///
    /// # Errors
    /// `ModelError` for unknown or abstract classes, and for classes with a
    /// required relationship or identified field that has no sensible default.
    pub fn new_instance(&self, class: &str) -> Result<TypedValue> {
        let decl = self
            .class(class)
            .ok_or_else(|| Error::Model(format!("unknown class '{}'", class)))?;
        if decl.is_abstract || decl.kind == DeclKind::Enum {
            return Err(Error::Model(format!("cannot instantiate '{}'", class)));
        }

        let mut fields = BTreeMap::new();
        for field in self.fields(class).iter().filter(|f| !f.optional) {
            let value = if field.array {
                TypedValue::Array(Vec::new())
            } else if field.relationship {
                return Err(Error::Model(format!(
                    "no default for relationship '{}.{}'",
                    class, field.name
                )));
            } else {
                self.default_value(&field.ty)?
            };
            fields.insert(field.name.clone(), value);
        }

        let identifier = self.identifier_field(class).map(|_| String::new());
        Ok(TypedValue::Resource(Resource {
            class: class.to_string(),
            identifier,
            fields,
        }))
    }

    fn default_value(&self, ty: &str) -> Result<TypedValue> {
        Ok(match ty {
            "Boolean" => TypedValue::Boolean(false),
            "String" => TypedValue::String(String::new()),
            "Double" => TypedValue::Double(0.0),
            "Integer" | "Long" => TypedValue::Integer(0),
            "DateTime" => DateTime::parse_from_rfc3339(EPOCH)
                .map(TypedValue::DateTime)
                .map_err(|e| Error::Model(e.to_string()))?,
            class => match self.class(class) {
                Some(decl) if decl.kind == DeclKind::Enum => decl
                    .enum_values
                    .first()
                    .cloned()
                    .map(TypedValue::Enum)
                    .ok_or_else(|| Error::Model(format!("enum '{}' has no values", class)))?,
                _ => self.new_instance(class)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_model_file;
    use serde_json::json;

    const MODEL: &str = r#"
namespace org.acme.test
concept Foo { o Double amount  o String note optional }
concept Bag { o Integer[] counts  o Color color }
enum Color { o RED o GREEN }
participant Person identified by email { o String email }
asset Loan identified by loanId {
  o String loanId
  --> Person borrower
  o DateTime due optional
}
abstract concept Shape { }
"#;

    fn manager() -> ModelManager {
        let mut manager = ModelManager::new();
        manager
            .add_model_file(parse_model_file(MODEL, "test.cto").unwrap())
            .unwrap();
        manager.validate_model_files().unwrap();
        manager
    }

    fn roundtrip(json: Value, options: &Options) -> Result<Value> {
        let m = manager();
        let typed = from_json(&m, &json, None, options)?;
        to_json(&m, &typed, options, 0)
    }

    #[test]
    fn test_simple_concept_roundtrip() {
        let out = roundtrip(json!({"$class": "org.acme.test.Foo", "amount": 3.5}), &Options::default())
            .unwrap();
        assert_eq!(out, json!({"$class": "org.acme.test.Foo", "amount": 3.5}));
    }

    #[test]
    fn test_missing_required_field_names_path() {
        let err = roundtrip(json!({"$class": "org.acme.test.Foo"}), &Options::default()).unwrap_err();
        assert_eq!(
            err,
            Error::validation("org.acme.test.Foo.amount", "missing required field")
        );
    }

    #[test]
    fn test_undeclared_field_rejected_but_dollar_keys_ignored() {
        let err = roundtrip(
            json!({"$class": "org.acme.test.Foo", "amount": 1.5, "extra": true}),
            &Options::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation { ref path, .. } if path == "org.acme.test.Foo.extra"));

        let ok = roundtrip(
            json!({"$class": "org.acme.test.Foo", "amount": 1.5, "$timestamp": "x"}),
            &Options::default(),
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_array_element_path() {
        let err = roundtrip(
            json!({"$class": "org.acme.test.Bag", "counts": [1, 2, 2.5], "color": "RED"}),
            &Options::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation { ref path, .. } if path == "org.acme.test.Bag.counts[2]"));
    }

    #[test]
    fn test_integer_accepts_whole_float() {
        let out = roundtrip(
            json!({"$class": "org.acme.test.Bag", "counts": [1.0, 2], "color": "GREEN"}),
            &Options::default(),
        )
        .unwrap();
        assert_eq!(out["counts"], json!([1, 2]));
    }

    #[test]
    fn test_unknown_enum_value() {
        let err = roundtrip(
            json!({"$class": "org.acme.test.Bag", "counts": [], "color": "BLUE"}),
            &Options::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("'BLUE' is not a value"));
    }

    #[test]
    fn test_class_list_first_known_wins() {
        let out = roundtrip(
            json!({"$class": ["org.nowhere.Foo", "org.acme.test.Foo"], "amount": 2.0}),
            &Options::default(),
        )
        .unwrap();
        assert_eq!(out["$class"], "org.acme.test.Foo");
    }

    #[test]
    fn test_abstract_class_rejected() {
        let err = roundtrip(json!({"$class": "org.acme.test.Shape"}), &Options::default()).unwrap_err();
        assert!(err.to_string().contains("abstract"));
    }

    #[test]
    fn test_expected_type_enforced() {
        let m = manager();
        let json = json!({"$class": "org.acme.test.Foo", "amount": 1.0});
        let err = from_json(&m, &json, Some("clause.runtime.Request"), &Options::default()).unwrap_err();
        assert!(err.to_string().contains("not a subtype"));
    }

    #[test]
    fn test_relationship_reference_rendering() {
        let loan = json!({
            "$class": "org.acme.test.Loan",
            "loanId": "L1",
            "borrower": "resource:org.acme.test.Person#ann@example.com"
        });
        let out = roundtrip(loan.clone(), &Options::default()).unwrap();
        assert_eq!(out["borrower"], "resource:org.acme.test.Person#ann@example.com");

        let by_id = Options {
            convert_resources_to_id: true,
            ..Options::default()
        };
        let out = roundtrip(loan, &by_id).unwrap();
        assert_eq!(out["borrower"], "ann@example.com");
    }

    #[test]
    fn test_embedded_resource_modes() {
        let loan = json!({
            "$class": "org.acme.test.Loan",
            "loanId": "L1",
            "borrower": {"$class": "org.acme.test.Person", "email": "ann@example.com"}
        });
        let err = roundtrip(loan.clone(), &Options::default()).unwrap_err();
        assert!(err.to_string().contains("relationship reference"));

        let input = Options::default().for_input();
        let kept = roundtrip(loan.clone(), &input).unwrap();
        assert_eq!(kept["borrower"]["email"], "ann@example.com");

        let out = roundtrip(loan, &Options::for_output()).unwrap();
        assert_eq!(out["borrower"], "resource:org.acme.test.Person#ann@example.com");
    }

    #[test]
    fn test_datetime_rendered_in_offset() {
        let m = manager();
        let loan = json!({
            "$class": "org.acme.test.Loan",
            "loanId": "L1",
            "borrower": "resource:org.acme.test.Person#p",
            "due": "2026-03-01T12:00:00Z"
        });
        let typed = from_json(&m, &loan, None, &Options::default()).unwrap();
        let utc = to_json(&m, &typed, &Options::default(), 0).unwrap();
        assert_eq!(utc["due"], "2026-03-01T12:00:00.000+00:00");
        let east = to_json(&m, &typed, &Options::default(), 120).unwrap();
        assert_eq!(east["due"], "2026-03-01T14:00:00.000+02:00");
    }

    #[test]
    fn test_out_of_range_offset_is_rejected() {
        let m = manager();
        let loan = json!({
            "$class": "org.acme.test.Loan",
            "loanId": "L1",
            "borrower": "resource:org.acme.test.Person#p",
            "due": "2026-01-01T00:00:00Z"
        });
        let typed = from_json(&m, &loan, None, &Options::default()).unwrap();
        assert!(to_json(&m, &typed, &Options::default(), -1439).is_ok());
        for offset in [1440, 2000, -2000, 40_000_000, i32::MIN] {
            let err = to_json(&m, &typed, &Options::default(), offset).unwrap_err();
            assert!(
                matches!(err, Error::Validation { ref path, .. } if path == "utcOffset"),
                "{}: {}",
                offset,
                err
            );
        }
    }

    #[test]
    fn test_bad_datetime() {
        let err = roundtrip(
            json!({
                "$class": "org.acme.test.Loan",
                "loanId": "L1",
                "borrower": "resource:org.acme.test.Person#p",
                "due": "yesterday"
            }),
            &Options::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation { ref path, .. } if path == "org.acme.test.Loan.due"));
    }

    #[test]
    fn test_parse_reference() {
        assert_eq!(parse_reference("resource:a.B#x#y"), Some(("a.B", "x#y")));
        assert_eq!(parse_reference("a.B#x"), None);
        assert_eq!(parse_reference("resource:a.B#"), None);
    }

    #[test]
    fn test_new_instance_defaults() {
        let m = manager();
        let state = m.new_instance("clause.runtime.State").unwrap();
        let json = to_json(&m, &state, &Options::default(), 0).unwrap();
        assert_eq!(json, json!({"$class": "clause.runtime.State"}));

        let bag = to_json(&m, &m.new_instance("org.acme.test.Bag").unwrap(), &Options::default(), 0)
            .unwrap();
        assert_eq!(bag, json!({"$class": "org.acme.test.Bag", "counts": [], "color": "RED"}));

        assert!(m.new_instance("org.acme.test.Loan").is_err());
        assert!(m.new_instance("org.acme.test.Shape").is_err());
    }
}
