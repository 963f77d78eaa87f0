//! Input schema normalization and structural validation.
//!
//! Tools may declare either a full object schema
//! (`{"type": "object", "properties": {...}, "required": [...]}`) or a flat
//! field map (`{"path": {"type": "string"}}`). Both reduce to the same
//! field map; flat fields are required unless they carry `"optional": true`.

use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct InputSchema {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl InputSchema {
    pub fn normalize(schema: Value) -> Result<Self, String> {
        let Value::Object(mut obj) = schema else {
            return Err("schema must be a JSON object".to_string());
        };

        if obj.get("type").and_then(Value::as_str) == Some("object") {
            let properties = match obj.remove("properties") {
                None => Map::new(),
                Some(Value::Object(props)) => props,
                Some(_) => return Err("'properties' must be an object".to_string()),
            };
            let required = match obj.remove("required") {
                None => Vec::new(),
                Some(Value::Array(items)) => items
                    .into_iter()
                    .map(|v| match v {
                        Value::String(s) => Ok(s),
                        other => Err(format!("'required' entries must be strings, got {other}")),
                    })
                    .collect::<Result<_, _>>()?,
                Some(_) => return Err("'required' must be an array".to_string()),
            };
            for name in &required {
                if !properties.contains_key(name) {
                    return Err(format!("required field '{name}' is not declared"));
                }
            }
            return Ok(Self {
                properties,
                required,
            });
        }

        let mut properties = Map::new();
        let mut required = Vec::new();
        for (name, field) in obj {
            let Value::Object(mut field) = field else {
                return Err(format!("field '{name}' must map to a schema object"));
            };
            let optional = field
                .remove("optional")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if !optional {
                required.push(name.clone());
            }
            properties.insert(name, Value::Object(field));
        }
        Ok(Self {
            properties,
            required,
        })
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// The schema as advertised in `tools/list`.
    pub fn to_json_schema(&self) -> Value {
        let mut schema = json!({
            "type": "object",
            "properties": self.properties,
        });
        if !self.required.is_empty() {
            schema["required"] = json!(self.required);
        }
        schema
    }

    /// Check that `args` is an object carrying every required field with the declared type.
    pub fn validate(&self, args: &Value) -> Result<(), String> {
        let Value::Object(args) = args else {
            return Err("arguments must be a JSON object".to_string());
        };

        for name in &self.required {
            match args.get(name) {
                None | Some(Value::Null) => return Err(format!("missing required field '{name}'")),
                Some(_) => {}
            }
        }

        for (name, value) in args {
            if value.is_null() {
                continue;
            }
            let Some(declared) = self.properties.get(name).and_then(|p| p.get("type")) else {
                continue;
            };
            if !type_matches(declared, value) {
                return Err(format!("field '{name}' must be of type {declared}"));
            }
        }
        Ok(())
    }
}

fn type_matches(declared: &Value, value: &Value) -> bool {
    match declared {
        Value::String(t) => primitive_matches(t, value),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| primitive_matches(t, value)),
        _ => true,
    }
}

fn primitive_matches(declared: &str, value: &Value) -> bool {
    match declared {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}
