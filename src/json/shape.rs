use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structural outline of a JSON value: kinds, and field names for objects.
///
/// `Null` matches anything, so optional fields may be absent or null in
/// some messages without breaking the stream's schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "fields")]
pub enum Shape {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object(BTreeMap<String, Shape>),
}

impl Shape {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Shape::Null,
            Value::Bool(_) => Shape::Bool,
            Value::Number(_) => Shape::Number,
            Value::String(_) => Shape::String,
            Value::Array(_) => Shape::Array,
            Value::Object(map) => Shape::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), Shape::of(value)))
                    .collect(),
            ),
        }
    }

    /// Checks `value` against this shape; the error names the first
    /// offending path.
    pub fn check(&self, value: &Value) -> std::result::Result<(), String> {
        self.check_at("$", value)
    }

    fn check_at(&self, path: &str, value: &Value) -> std::result::Result<(), String> {
        match (self, value) {
            (Shape::Null, _) | (_, Value::Null) => Ok(()),
            (Shape::Bool, Value::Bool(_))
            | (Shape::Number, Value::Number(_))
            | (Shape::String, Value::String(_))
            | (Shape::Array, Value::Array(_)) => Ok(()),
            (Shape::Object(fields), Value::Object(map)) => {
                if let Some(extra) = map.keys().find(|key| !fields.contains_key(*key)) {
                    return Err(format!("{}.{}: unexpected field", path, extra));
                }
                for (key, shape) in fields {
                    let field_path = format!("{}.{}", path, key);
                    match map.get(key) {
                        Some(field) => shape.check_at(&field_path, field)?,
                        None if *shape == Shape::Null => {}
                        None => return Err(format!("{}: missing field", field_path)),
                    }
                }
                Ok(())
            }
            (expected, _) => Err(format!(
                "{}: expected {}, found {}",
                path,
                expected,
                Shape::of(value)
            )),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shape::Null => "null",
            Shape::Bool => "bool",
            Shape::Number => "number",
            Shape::String => "string",
            Shape::Array => "array",
            Shape::Object(_) => "object",
        };
        f.write_str(name)
    }
}
