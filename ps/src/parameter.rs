//! Typed flag and positional argument declarations
//!
//! A [`Parameter`] declares one flag or argument of a program: its type, an
//! optional default, and the current value (typed or raw). Typed values are
//! coerced to the declared type when set, raw values are trusted verbatim.
//!
//! Serialization into argument tokens follows fixed rules:
//!
//! | value      | flag                         | argument          |
//! |------------|------------------------------|-------------------|
//! | scalar     | `--name value`               | `value`           |
//! | bool       | `--name` if true, else none  | `true` / `false`  |
//! | list       | `--name a --name b`          | `a b`             |
//! | key-value  | `--name k=v` per entry       | `k=v` per entry   |
//! | raw        | `--name raw`                 | `raw`             |

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ProgramError;

/// Semantic type of a flag or argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParameterType {
    #[default]
    String,
    #[serde(alias = "int")]
    Integer,
    Float,
    #[serde(alias = "boolean")]
    Bool,
    #[serde(alias = "string_list", alias = "stringList")]
    StringList,
    #[serde(alias = "int-list", alias = "int_list", alias = "integer_list")]
    IntegerList,
    #[serde(alias = "key_value", alias = "keyValue", alias = "map")]
    KeyValue,
    Choice,
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::StringList => "string-list",
            Self::IntegerList => "integer-list",
            Self::KeyValue => "key-value",
            Self::Choice => "choice",
        };
        write!(f, "{}", name)
    }
}

/// A value that has been coerced to its declared type
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    List(Vec<String>),
    KeyValue(BTreeMap<String, String>),
}

impl ParameterValue {
    /// Canonical JSON form, stored as the parameter's current value
    pub fn to_json(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Integer(i) => Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Bool(b) => Value::Bool(*b),
            Self::List(items) => Value::Array(items.iter().cloned().map(Value::String).collect()),
            Self::KeyValue(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        }
    }

    /// Tokens for this value when bound to a flag
    pub fn flag_tokens(&self, flag: &str) -> Vec<String> {
        match self {
            Self::Bool(true) => vec![flag.to_string()],
            Self::Bool(false) => Vec::new(),
            Self::List(items) => items
                .iter()
                .flat_map(|item| [flag.to_string(), item.clone()])
                .collect(),
            Self::KeyValue(map) => map
                .iter()
                .flat_map(|(k, v)| [flag.to_string(), format!("{}={}", k, v)])
                .collect(),
            scalar => vec![flag.to_string(), scalar.scalar_text()],
        }
    }

    /// Tokens for this value when bound to a positional argument
    pub fn arg_tokens(&self) -> Vec<String> {
        match self {
            Self::List(items) => items.clone(),
            Self::KeyValue(map) => map.iter().map(|(k, v)| format!("{}={}", k, v)).collect(),
            scalar => vec![scalar.scalar_text()],
        }
    }

    fn scalar_text(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::List(items) => items.join(","),
            Self::KeyValue(map) => map
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Textual form of a JSON scalar, `None` for arrays, objects and null
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A resolved value ready for serialization
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Raw(String),
    Value(ParameterValue),
}

/// Declaration of one flag or positional argument
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name; for flags declared as a mapping this is the key
    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default)]
    pub kind: ParameterType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub help: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,

    /// Short alias, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short: Option<String>,

    /// Literal flag token, defaults to `--<name>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,

    /// Allowed values for `choice` parameters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,

    /// Current typed value (already coerced)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Current raw value, emitted without type checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Parameter {
    /// Create a parameter with no default and no value
    pub fn new(name: impl Into<String>, kind: ParameterType) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Default::default()
        }
    }

    /// Builder: set the default value
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Builder: mark as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// The token used to introduce this parameter as a flag
    pub fn flag_token(&self) -> String {
        match &self.flag {
            Some(flag) => flag.clone(),
            None => format!("--{}", self.name),
        }
    }

    /// Coerce a value to this parameter's declared type
    pub fn coerce(&self, value: &Value) -> Result<ParameterValue, ProgramError> {
        let mismatch = || ProgramError::TypeMismatch {
            name: self.name.clone(),
            expected: self.kind,
            value: value.to_string(),
        };

        match self.kind {
            ParameterType::String => scalar_to_string(value).map(ParameterValue::String).ok_or_else(mismatch),
            ParameterType::Integer => coerce_integer(value).map(ParameterValue::Integer).ok_or_else(mismatch),
            ParameterType::Float => match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .filter(|f| f.is_finite())
            .map(ParameterValue::Float)
            .ok_or_else(mismatch),
            ParameterType::Bool => match value {
                Value::Bool(b) => Some(*b),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Some(true),
                    "false" => Some(false),
                    _ => None,
                },
                _ => None,
            }
            .map(ParameterValue::Bool)
            .ok_or_else(mismatch),
            ParameterType::StringList => match value {
                Value::Array(items) => items.iter().map(scalar_to_string).collect::<Option<Vec<_>>>(),
                scalar => scalar_to_string(scalar).map(|s| vec![s]),
            }
            .map(ParameterValue::List)
            .ok_or_else(mismatch),
            ParameterType::IntegerList => match value {
                Value::Array(items) => items
                    .iter()
                    .map(|item| coerce_integer(item).map(|i| i.to_string()))
                    .collect::<Option<Vec<_>>>(),
                scalar => coerce_integer(scalar).map(|i| vec![i.to_string()]),
            }
            .map(ParameterValue::List)
            .ok_or_else(mismatch),
            ParameterType::KeyValue => coerce_key_value(value).map(ParameterValue::KeyValue).ok_or_else(mismatch),
            ParameterType::Choice => scalar_to_string(value)
                .filter(|s| self.choices.contains(s))
                .map(ParameterValue::String)
                .ok_or_else(mismatch),
        }
    }

    /// Set the typed value, replacing any raw value
    pub fn set_value(&mut self, value: &Value) -> Result<(), ProgramError> {
        debug!(name = %self.name, %value, "Parameter::set_value: called");
        let coerced = self.coerce(value)?;
        self.value = Some(coerced.to_json());
        self.raw = None;
        Ok(())
    }

    /// Set the raw value, replacing any typed value
    pub fn set_raw(&mut self, raw: impl Into<String>) {
        self.raw = Some(raw.into());
        self.value = None;
    }

    /// Resolve the effective value: raw > override > current value > default
    ///
    /// Returns `None` when nothing is set; the caller decides whether that is
    /// an error.
    pub fn resolve(&self, override_value: Option<&Value>) -> Result<Option<Resolved>, ProgramError> {
        if let Some(raw) = &self.raw {
            return Ok(Some(Resolved::Raw(raw.clone())));
        }

        let candidate = [override_value, self.value.as_ref(), self.default.as_ref()]
            .into_iter()
            .flatten()
            .find(|value| !value.is_null());
        match candidate {
            None => {
                if self.required {
                    return Err(ProgramError::MissingValue { name: self.name.clone() });
                }
                Ok(None)
            }
            Some(value) => Ok(Some(Resolved::Value(self.coerce(value)?))),
        }
    }

    /// Check the declaration itself is consistent
    pub fn validate(&self) -> Result<(), ProgramError> {
        if self.name.is_empty() {
            return Err(ProgramError::Definition("parameter without a name".to_string()));
        }
        if self.kind == ParameterType::Choice && self.choices.is_empty() {
            return Err(ProgramError::Definition(format!(
                "choice parameter '{}' declares no choices",
                self.name
            )));
        }
        if let Some(default) = &self.default
            && !default.is_null()
        {
            self.coerce(default).map_err(|e| {
                ProgramError::Definition(format!("invalid default for '{}': {}", self.name, e))
            })?;
        }
        Ok(())
    }
}

fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn coerce_key_value(value: &Value) -> Option<BTreeMap<String, String>> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| scalar_to_string(v).map(|v| (k.clone(), v)))
            .collect(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.split_once('=').map(|(k, v)| (k.to_string(), v.to_string())),
                _ => None,
            })
            .collect(),
        Value::String(s) => s
            .split_once('=')
            .map(|(k, v)| BTreeMap::from([(k.to_string(), v.to_string())])),
        _ => None,
    }
}
