//! Argument schemas and validation.
//!
//! Every capability declares the arguments it accepts. Validation runs at
//! the dispatcher boundary before a handler executes: unknown names are
//! rejected, required arguments must be present, defaults are applied, and
//! column-typed arguments are checked against the loaded dataset's schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tabletalk_dataset::ColumnSchema;

use crate::error::CapabilityError;

// =============================================================================
// Arguments
// =============================================================================

/// Argument name to JSON value mapping carried by an invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arguments(pub Map<String, Value>);

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value.into());
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    /// A list of strings, e.g. a validated `column_list` argument.
    pub fn string_list(&self, name: &str) -> Option<Vec<String>> {
        self.get(name).and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for Arguments {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// =============================================================================
// Schema
// =============================================================================

/// Declared type of one argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArgType {
    String,
    Integer,
    Number,
    Boolean,
    /// A string naming a column of the loaded dataset.
    Column,
    /// A list of column names; a single name is accepted and wrapped.
    ColumnList,
    /// A string restricted to fixed options.
    Choice { options: Vec<String> },
}

impl ArgType {
    pub fn choice(options: &[&str]) -> Self {
        ArgType::Choice {
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }
}

/// One declared argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: ArgType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ArgSpec {
    pub fn required(name: &str, kind: ArgType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            default: None,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, kind: ArgType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self.required = false;
        self
    }
}

/// The full argument schema of a capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgumentSchema {
    pub args: Vec<ArgSpec>,
}

impl ArgumentSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, spec: ArgSpec) -> Self {
        self.args.push(spec);
        self
    }

    pub fn spec(&self, name: &str) -> Option<&ArgSpec> {
        self.args.iter().find(|a| a.name == name)
    }

    /// Validate `args` against this schema, returning them with defaults
    /// applied and values normalised.
    ///
    /// Column names are only checked when `columns` is supplied.
    pub fn validate(
        &self,
        args: &Arguments,
        columns: Option<&[ColumnSchema]>,
    ) -> Result<Arguments, CapabilityError> {
        if let Some(unknown) = args.0.keys().find(|name| self.spec(name).is_none()) {
            return Err(CapabilityError::invalid(unknown.as_str(), "unknown argument"));
        }

        let mut validated = Arguments::new();
        for spec in &self.args {
            match args.get(&spec.name) {
                Some(value) => {
                    let value = check_value(spec, value, columns)?;
                    validated.insert(spec.name.clone(), value);
                }
                None => {
                    if let Some(default) = &spec.default {
                        validated.insert(spec.name.clone(), default.clone());
                    } else if spec.required {
                        return Err(CapabilityError::invalid(
                            spec.name.as_str(),
                            "required argument missing",
                        ));
                    }
                }
            }
        }
        Ok(validated)
    }
}

fn check_value(
    spec: &ArgSpec,
    value: &Value,
    columns: Option<&[ColumnSchema]>,
) -> Result<Value, CapabilityError> {
    let mismatch = |expected: &str| {
        CapabilityError::invalid(spec.name.as_str(), format!("expected {}, got {}", expected, value))
    };

    match &spec.kind {
        ArgType::String => value
            .as_str()
            .map(|_| value.clone())
            .ok_or_else(|| mismatch("string")),
        ArgType::Integer => {
            if let Some(i) = value.as_i64() {
                return Ok(Value::from(i));
            }
            match value.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Ok(Value::from(f as i64))
                }
                _ => Err(mismatch("integer")),
            }
        }
        ArgType::Number => value
            .as_f64()
            .map(Value::from)
            .ok_or_else(|| mismatch("number")),
        ArgType::Boolean => value
            .as_bool()
            .map(Value::from)
            .ok_or_else(|| mismatch("boolean")),
        ArgType::Column => {
            let name = value.as_str().ok_or_else(|| mismatch("column name"))?;
            check_column(spec, name, columns)?;
            Ok(value.clone())
        }
        ArgType::ColumnList => {
            let names: Vec<&str> = match value {
                Value::String(s) => vec![s.as_str()],
                Value::Array(items) => items
                    .iter()
                    .map(|v| v.as_str().ok_or_else(|| mismatch("list of column names")))
                    .collect::<Result<_, _>>()?,
                _ => return Err(mismatch("list of column names")),
            };
            for name in &names {
                check_column(spec, name, columns)?;
            }
            Ok(Value::from(names))
        }
        ArgType::Choice { options } => {
            let chosen = value.as_str().ok_or_else(|| mismatch("string"))?;
            if options.iter().any(|o| o == chosen) {
                Ok(value.clone())
            } else {
                Err(CapabilityError::invalid(
                    spec.name.as_str(),
                    format!("'{}' is not one of: {}", chosen, options.join(", ")),
                ))
            }
        }
    }
}

fn check_column(
    spec: &ArgSpec,
    name: &str,
    columns: Option<&[ColumnSchema]>,
) -> Result<(), CapabilityError> {
    match columns {
        Some(columns) if !columns.iter().any(|c| c.name == name) => Err(CapabilityError::invalid(
            spec.name.as_str(),
            format!("unknown column '{}'", name),
        )),
        _ => Ok(()),
    }
}
