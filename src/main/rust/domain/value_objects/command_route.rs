use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::QualityOfDelivery;
use crate::domain::errors::{DomainError, Result};

/// JSON type a request field must carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Number,
    Integer,
    String,
    Bool,
    Array,
}

impl FieldKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::String => value.is_string(),
            Self::Bool => value.is_boolean(),
            Self::Array => value.is_array(),
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            Self::Number => "expected a number",
            Self::Integer => "expected an integer",
            Self::String => "expected a string",
            Self::Bool => "expected a boolean",
            Self::Array => "expected an array",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Filled in when an optional field is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn default_required() -> bool {
    true
}

impl FieldSpec {
    pub fn required(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            default: None,
        }
    }

    /// Optional field that falls back to `default`
    pub fn defaulted(name: &str, kind: FieldKind, default: Value) -> Self {
        Self {
            default: Some(default),
            ..Self::optional(name, kind)
        }
    }
}

/// How a validated payload is laid out on the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// Object holding exactly the declared fields
    #[default]
    Flat,
    /// `geometry_msgs/Twist` built from `linear` and `angular`
    Twist,
    /// `std_msgs/String` whose `data` is the fields serialized as JSON
    String,
}

/// Static mapping of one request kind onto a bridge topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRoute {
    pub topic: String,
    #[serde(default)]
    pub qos: QualityOfDelivery,
    #[serde(default)]
    pub format: PayloadFormat,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl CommandRoute {
    pub fn new(topic: &str, qos: QualityOfDelivery, format: PayloadFormat) -> Self {
        Self {
            topic: topic.to_string(),
            qos,
            format,
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Check the route itself is usable; run once when the profile loads
    pub fn check(&self, kind: &str) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(DomainError::InvalidProfile(format!(
                "command '{}' has an empty topic",
                kind
            )));
        }

        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(DomainError::InvalidProfile(format!(
                    "command '{}' declares field '{}' twice",
                    kind, field.name
                )));
            }
        }

        for field in &self.fields {
            let Some(default) = &field.default else {
                continue;
            };
            if field.required {
                return Err(DomainError::InvalidProfile(format!(
                    "command '{}' gives required field '{}' a default",
                    kind, field.name
                )));
            }
            if !field.kind.accepts(default) {
                return Err(DomainError::InvalidProfile(format!(
                    "command '{}' default for '{}': {}",
                    kind,
                    field.name,
                    field.kind.expected()
                )));
            }
        }

        if self.format == PayloadFormat::Twist {
            for axis in ["linear", "angular"] {
                let declared = self
                    .fields
                    .iter()
                    .any(|f| f.name == axis && f.kind == FieldKind::Number && f.required);
                if !declared {
                    return Err(DomainError::InvalidProfile(format!(
                        "twist command '{}' must declare a required number field '{}'",
                        kind, axis
                    )));
                }
            }
        }

        Ok(())
    }

    /// Validate a request body against the declared fields.
    ///
    /// Returns the declared fields that were present plus defaults for the
    /// absent ones. Nothing is translated when any field is missing or has
    /// the wrong type.
    pub fn validate(&self, payload: &Value) -> Result<Map<String, Value>> {
        let empty = Map::new();
        let body = match payload {
            Value::Object(body) => body,
            Value::Null if self.fields.iter().all(|f| !f.required) => &empty,
            _ => return Err(DomainError::validation("body", "expected a JSON object")),
        };

        let mut validated = Map::new();
        for field in &self.fields {
            match body.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(DomainError::validation(
                        &field.name,
                        "missing required field",
                    ));
                }
                None | Some(Value::Null) => {
                    if let Some(default) = &field.default {
                        validated.insert(field.name.clone(), default.clone());
                    }
                }
                Some(value) if field.kind.accepts(value) => {
                    validated.insert(field.name.clone(), value.clone());
                }
                Some(_) => return Err(DomainError::validation(&field.name, field.kind.expected())),
            }
        }

        Ok(validated)
    }

    /// Serialize validated fields into the bridge message body
    pub fn encode(&self, fields: &Map<String, Value>) -> Result<Vec<u8>> {
        let message = match self.format {
            PayloadFormat::Flat => Value::Object(fields.clone()),
            PayloadFormat::Twist => {
                let linear = fields.get("linear").cloned().unwrap_or(json!(0.0));
                let angular = fields.get("angular").cloned().unwrap_or(json!(0.0));
                json!({
                    "linear": { "x": linear, "y": 0.0, "z": 0.0 },
                    "angular": { "x": 0.0, "y": 0.0, "z": angular },
                })
            }
            PayloadFormat::String => json!({ "data": Value::Object(fields.clone()).to_string() }),
        };

        serde_json::to_vec(&message)
            .map_err(|e| DomainError::validation("body", format!("not serializable: {}", e)))
    }
}
