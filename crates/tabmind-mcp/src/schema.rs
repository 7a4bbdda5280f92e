//! Tool input-schema conversion.
//!
//! MCP servers describe tool inputs with a JSON-Schema subset; the
//! function-calling layer needs a validator per tool. The conversion
//! maps the types it understands and falls back to a permissive
//! accept-anything validator for unrecognized shapes: a tool with an
//! exotic schema is still callable, it just isn't pre-validated.

use serde_json::Value;

/// Validator for one parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
    /// Array, optionally with a validated item type.
    Array(Option<Box<ParamKind>>),
    /// Nested object with its own parameter set.
    Object(Box<ToolParams>),
    /// Unrecognized schema shape; accepts anything.
    Any,
}

impl ParamKind {
    fn from_schema(schema: &Value) -> Self {
        match schema.get("type").and_then(|t| t.as_str()) {
            Some("string") => Self::String,
            Some("number") => Self::Number,
            Some("integer") => Self::Integer,
            Some("boolean") => Self::Boolean,
            Some("array") => Self::Array(
                schema
                    .get("items")
                    .map(|items| Box::new(Self::from_schema(items))),
            ),
            Some("object") => Self::Object(Box::new(ToolParams::from_object_schema(schema))),
            _ => Self::Any,
        }
    }

    fn check(&self, value: &Value, name: &str) -> Result<(), String> {
        let ok = match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            Self::Boolean => value.is_boolean(),
            Self::Array(item) => match value.as_array() {
                Some(items) => {
                    if let Some(item_kind) = item {
                        for (i, v) in items.iter().enumerate() {
                            item_kind.check(v, &format!("{name}[{i}]"))?;
                        }
                    }
                    true
                }
                None => false,
            },
            Self::Object(inner) => return inner.validate(value),
            Self::Any => true,
        };

        if ok {
            Ok(())
        } else {
            Err(format!(
                "parameter '{name}' must be {}",
                self.expected_description()
            ))
        }
    }

    fn expected_description(&self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Number => "a number",
            Self::Integer => "an integer",
            Self::Boolean => "a boolean",
            Self::Array(_) => "an array",
            Self::Object(_) => "an object",
            Self::Any => "anything",
        }
    }
}

/// One named parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub description: Option<String>,
}

/// Validator built from a tool's `inputSchema`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolParams {
    /// Set when the root schema was missing or unrecognized; the
    /// validator then accepts any arguments.
    permissive: bool,
    specs: Vec<ParamSpec>,
}

impl ToolParams {
    /// Convert a tool's input schema into a validator.
    ///
    /// Anything that is not a recognizable object schema produces the
    /// permissive validator rather than rejecting the tool outright.
    pub fn from_schema(schema: Option<&Value>) -> Self {
        match schema {
            Some(value) if value.get("type").and_then(|t| t.as_str()) == Some("object") => {
                Self::from_object_schema(value)
            }
            _ => Self {
                permissive: true,
                specs: Vec::new(),
            },
        }
    }

    fn from_object_schema(schema: &Value) -> Self {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        let specs = schema
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|props| {
                props
                    .iter()
                    .map(|(name, prop)| ParamSpec {
                        name: name.clone(),
                        kind: ParamKind::from_schema(prop),
                        required: required.contains(&name.as_str()),
                        description: prop
                            .get("description")
                            .and_then(|d| d.as_str())
                            .map(String::from),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            permissive: false,
            specs,
        }
    }

    /// Whether the conversion fell back to accept-anything.
    pub fn is_permissive(&self) -> bool {
        self.permissive
    }

    /// The named parameters, in schema order.
    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }

    /// Validate a set of arguments.
    ///
    /// `null` arguments are treated as an empty object, matching how
    /// tool calls omit the field entirely.
    pub fn validate(&self, arguments: &Value) -> Result<(), String> {
        if self.permissive {
            return Ok(());
        }

        let empty = serde_json::Map::new();
        let args = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return Err("arguments must be an object".to_string()),
        };

        for spec in &self.specs {
            match args.get(&spec.name) {
                Some(value) => spec.kind.check(value, &spec.name)?,
                None if spec.required => {
                    return Err(format!("missing required parameter '{}'", spec.name))
                }
                None => {}
            }
        }

        Ok(())
    }
}
