//! Parameter tables and the request validator.
//!
//! Each service declares a static, ordered `&[ParamSpec]` describing its
//! parameters. [`validate`] checks a raw JSON argument map against that table
//! and yields normalized [`Arguments`] (defaults applied, values coerced) or
//! the first [`ValidationError`]. The same table produces the JSON Schema
//! advertised to MCP clients.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::ValidationError;

/// Host name, IPv4 or IPv6 literal. Must not start with `-`.
pub static HOST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9\[][A-Za-z0-9.\-:_\[\]%]*$").expect("valid regex")
});

/// A single token without whitespace that cannot be read as a flag.
pub static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s\-]\S*$").expect("valid regex"));

/// Port list such as `22,80,443`, `1-1024` or `T:80,U:53`.
pub static PORTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z:,\-]+$").expect("valid regex"));

/// How a list parameter's string form is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Comma,
    Semicolon,
    Whitespace,
}

impl Delimiter {
    fn split(self, raw: &str) -> Vec<String> {
        let parts: Vec<&str> = match self {
            Delimiter::Comma => raw.split(',').collect(),
            Delimiter::Semicolon => raw.split(';').collect(),
            Delimiter::Whitespace => raw.split_whitespace().collect(),
        };
        parts
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn describe(self) -> &'static str {
        match self {
            Delimiter::Comma => "comma-separated",
            Delimiter::Semicolon => "semicolon-separated",
            Delimiter::Whitespace => "space-separated",
        }
    }
}

/// Declared type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Float,
    Boolean,
    /// Ordered sequence of strings. Accepts a JSON array or a delimited string.
    List(Delimiter),
}

/// Value constraint checked after coercion. For lists it applies per item.
#[derive(Debug, Clone, Copy)]
pub enum Constraint {
    None,
    IntRange(i64, i64),
    FloatRange(f64, f64),
    OneOf(&'static [&'static str]),
    Pattern(&'static LazyLock<Regex>),
}

/// Default applied when an optional parameter is absent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamDefault {
    None,
    Str(&'static str),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Static declaration of one service parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub default: ParamDefault,
    pub constraint: Constraint,
    /// Applied to string values (and list items) before the constraint.
    pub normalize: Option<fn(&str) -> String>,
    pub description: &'static str,
}

impl ParamSpec {
    const fn new(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: ParamDefault::None,
            constraint: Constraint::None,
            normalize: None,
            description,
        }
    }

    pub const fn string(name: &'static str, description: &'static str) -> Self {
        Self::new(name, ParamKind::String, description)
    }

    pub const fn integer(name: &'static str, description: &'static str) -> Self {
        Self::new(name, ParamKind::Integer, description)
    }

    pub const fn float(name: &'static str, description: &'static str) -> Self {
        Self::new(name, ParamKind::Float, description)
    }

    pub const fn boolean(name: &'static str, description: &'static str) -> Self {
        Self::new(name, ParamKind::Boolean, description).default(ParamDefault::Bool(false))
    }

    pub const fn list(name: &'static str, delimiter: Delimiter, description: &'static str) -> Self {
        Self::new(name, ParamKind::List(delimiter), description)
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn default(mut self, default: ParamDefault) -> Self {
        self.default = default;
        self
    }

    pub const fn range(mut self, min: i64, max: i64) -> Self {
        self.constraint = Constraint::IntRange(min, max);
        self
    }

    pub const fn float_range(mut self, min: f64, max: f64) -> Self {
        self.constraint = Constraint::FloatRange(min, max);
        self
    }

    pub const fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.constraint = Constraint::OneOf(allowed);
        self
    }

    pub const fn pattern(mut self, re: &'static LazyLock<Regex>) -> Self {
        self.constraint = Constraint::Pattern(re);
        self
    }

    pub const fn normalize(mut self, f: fn(&str) -> String) -> Self {
        self.normalize = Some(f);
        self
    }

    fn default_value(&self) -> Option<Value> {
        match self.default {
            ParamDefault::None => None,
            ParamDefault::Str(s) => Some(match self.kind {
                ParamKind::List(delim) => self.list_value(delim.split(s)),
                _ => Value::String(s.to_string()),
            }),
            ParamDefault::Int(i) => Some(Value::from(i)),
            ParamDefault::Float(f) => Number::from_f64(f).map(Value::Number),
            ParamDefault::Bool(b) => Some(Value::Bool(b)),
        }
    }

    fn list_value(&self, items: Vec<String>) -> Value {
        Value::Array(
            items
                .into_iter()
                .map(|item| Value::String(self.apply_normalize(&item)))
                .collect(),
        )
    }

    fn apply_normalize(&self, s: &str) -> String {
        match self.normalize {
            Some(f) => f(s),
            None => s.to_string(),
        }
    }

    fn mismatch(&self, expected: &'static str, value: &Value) -> ValidationError {
        ValidationError::TypeMismatch {
            name: self.name.to_string(),
            expected,
            value: match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        }
    }

    /// Coerce a present raw value to the declared kind. `Ok(None)` means the
    /// value is effectively absent (blank string, empty list).
    fn coerce(&self, raw: &Value) -> Result<Option<Value>, ValidationError> {
        match self.kind {
            ParamKind::String => {
                let s = match raw {
                    Value::String(s) => s.trim().to_string(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    other => return Err(self.mismatch("a string", other)),
                };
                if s.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Value::String(self.apply_normalize(&s))))
            }
            ParamKind::Integer => {
                let parsed = match raw {
                    Value::Number(n) => n
                        .as_i64()
                        .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
                    Value::String(s) if s.trim().is_empty() => return Ok(None),
                    Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                };
                parsed
                    .map(|i| Some(Value::from(i)))
                    .ok_or_else(|| self.mismatch("an integer", raw))
            }
            ParamKind::Float => {
                let parsed = match raw {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) if s.trim().is_empty() => return Ok(None),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                parsed
                    .filter(|f| f.is_finite())
                    .and_then(Number::from_f64)
                    .map(|n| Some(Value::Number(n)))
                    .ok_or_else(|| self.mismatch("a number", raw))
            }
            ParamKind::Boolean => match raw {
                Value::Bool(b) => Ok(Some(Value::Bool(*b))),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Ok(Some(Value::Bool(false))),
                    Some(1) => Ok(Some(Value::Bool(true))),
                    _ => Err(self.mismatch("a boolean", raw)),
                },
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "" => Ok(None),
                    "true" | "yes" | "y" | "on" | "1" => Ok(Some(Value::Bool(true))),
                    "false" | "no" | "n" | "off" | "0" => Ok(Some(Value::Bool(false))),
                    _ => Err(self.mismatch("a boolean", raw)),
                },
                other => Err(self.mismatch("a boolean", other)),
            },
            ParamKind::List(delim) => {
                let items = match raw {
                    Value::String(s) => delim.split(s),
                    Value::Array(values) => {
                        let mut items = Vec::with_capacity(values.len());
                        for v in values {
                            match v {
                                Value::String(s) if s.trim().is_empty() => {}
                                Value::String(s) => items.push(s.trim().to_string()),
                                Value::Number(n) => items.push(n.to_string()),
                                other => return Err(self.mismatch("a list of strings", other)),
                            }
                        }
                        items
                    }
                    other => return Err(self.mismatch("a list of strings", other)),
                };
                if items.is_empty() {
                    return Ok(None);
                }
                Ok(Some(self.list_value(items)))
            }
        }
    }

    fn check(&self, value: &Value) -> Result<(), ValidationError> {
        match (self.constraint, value) {
            (Constraint::None, _) => Ok(()),
            (Constraint::IntRange(min, max), Value::Number(n)) => match n.as_i64() {
                Some(i) if i >= min && i <= max => Ok(()),
                _ => Err(ValidationError::OutOfRange {
                    name: self.name.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                }),
            },
            (Constraint::FloatRange(min, max), Value::Number(n)) => match n.as_f64() {
                Some(f) if f >= min && f <= max => Ok(()),
                _ => Err(ValidationError::OutOfRange {
                    name: self.name.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                }),
            },
            (Constraint::OneOf(_) | Constraint::Pattern(_), Value::Array(items)) => {
                items.iter().try_for_each(|item| self.check(item))
            }
            (Constraint::OneOf(allowed), Value::String(s)) => {
                if allowed.contains(&s.as_str()) {
                    Ok(())
                } else {
                    Err(ValidationError::NotInEnum {
                        name: self.name.to_string(),
                        value: s.clone(),
                        allowed: allowed.iter().map(|a| a.to_string()).collect(),
                    })
                }
            }
            (Constraint::Pattern(re), Value::String(s)) => {
                if re.is_match(s) {
                    Ok(())
                } else {
                    Err(ValidationError::PatternMismatch {
                        name: self.name.to_string(),
                        value: s.clone(),
                    })
                }
            }
            _ => Ok(()),
        }
    }

    /// JSON Schema fragment for this parameter.
    fn to_json_schema(&self) -> Value {
        let mut schema = match self.kind {
            ParamKind::String => serde_json::json!({ "type": "string" }),
            ParamKind::Integer => serde_json::json!({ "type": "integer" }),
            ParamKind::Float => serde_json::json!({ "type": "number" }),
            ParamKind::Boolean => serde_json::json!({ "type": "boolean" }),
            // Delimited string or JSON array; `validate` accepts both.
            ParamKind::List(_) => serde_json::json!({
                "type": ["string", "array"],
                "items": { "type": "string" },
            }),
        };
        let description = match self.kind {
            ParamKind::List(delim) => format!("{} ({} list)", self.description, delim.describe()),
            _ => self.description.to_string(),
        };
        schema["description"] = Value::String(description);

        match self.default {
            ParamDefault::None => {}
            ParamDefault::Str(s) => schema["default"] = Value::String(s.to_string()),
            ParamDefault::Int(i) => schema["default"] = Value::from(i),
            ParamDefault::Float(f) => schema["default"] = Value::from(f),
            ParamDefault::Bool(b) => schema["default"] = Value::Bool(b),
        }

        match self.constraint {
            Constraint::IntRange(min, max) => {
                schema["minimum"] = Value::from(min);
                schema["maximum"] = Value::from(max);
            }
            Constraint::FloatRange(min, max) => {
                schema["minimum"] = Value::from(min);
                schema["maximum"] = Value::from(max);
            }
            Constraint::OneOf(allowed) if !matches!(self.kind, ParamKind::List(_)) => {
                schema["enum"] = Value::from(allowed.to_vec());
            }
            Constraint::OneOf(allowed) => {
                schema["items"]["enum"] = Value::from(allowed.to_vec());
            }
            _ => {}
        }
        schema
    }
}

/// Normalized argument set produced by [`validate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arguments(Map<String, Value>);

impl Arguments {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Decode into a service's typed argument record.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ValidationError> {
        serde_json::from_value(Value::Object(self.0.clone())).map_err(|e| {
            ValidationError::TypeMismatch {
                name: "arguments".to_string(),
                expected: "a valid argument set",
                value: e.to_string(),
            }
        })
    }
}

impl From<Map<String, Value>> for Arguments {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Validate a raw argument map against an ordered parameter table.
///
/// Unknown keys are ignored. Returns the first violation in table order.
pub fn validate(specs: &[ParamSpec], raw: &Map<String, Value>) -> Result<Arguments, ValidationError> {
    let mut out = Map::new();
    for spec in specs {
        let present = match raw.get(spec.name) {
            None | Some(Value::Null) => None,
            Some(value) => spec.coerce(value)?,
        };
        let value = match present {
            Some(value) => value,
            None if spec.required => return Err(ValidationError::Missing(spec.name.to_string())),
            None => match spec.default_value() {
                Some(default) => default,
                None => continue,
            },
        };
        spec.check(&value)?;
        out.insert(spec.name.to_string(), value);
    }
    Ok(Arguments(out))
}

/// Build the JSON Schema object for a parameter table.
pub fn to_json_schema(specs: &[ParamSpec]) -> Value {
    let mut props = Map::new();
    let mut required = Vec::new();
    for spec in specs {
        props.insert(spec.name.to_string(), spec.to_json_schema());
        if spec.required {
            required.push(Value::String(spec.name.to_string()));
        }
    }

    let mut schema = serde_json::json!({
        "type": "object",
        "properties": props,
    });
    if !required.is_empty() {
        schema["required"] = Value::Array(required);
    }
    schema
}

pub fn lowercase(s: &str) -> String {
    s.to_ascii_lowercase()
}

pub fn uppercase(s: &str) -> String {
    s.to_ascii_uppercase()
}
