//! Argument checks against a cached input contract.
//!
//! Contracts are compiled once with `jsonschema` when a schema enters the
//! cache. Every schema error is mapped back to the argument path it concerns,
//! so a stale argument shape can be named field by field, nested ones
//! included.

use std::{fmt, sync::Arc};

use jsonschema::{error::ValidationErrorKind, Draft, ValidationError, Validator};
use serde_json::{Map, Value};
use tracing::warn;

/// Fields that do not fit the contract, each list sorted.
///
/// Nested fields are named by their dotted path, e.g. `filter.location`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractViolation {
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
    pub type_mismatches: Vec<TypeMismatch>,
    /// Values of the right type that break another constraint (enum,
    /// pattern, range).
    pub invalid_values: Vec<InvalidValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMismatch {
    pub field: String,
    pub expected: String,
    pub found: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidValue {
    pub field: String,
    pub reason: String,
}

impl ContractViolation {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
            && self.unexpected.is_empty()
            && self.type_mismatches.is_empty()
            && self.invalid_values.is_empty()
    }

    /// Every field named by this violation.
    pub fn fields(&self) -> Vec<&str> {
        self.missing
            .iter()
            .chain(self.unexpected.iter())
            .map(String::as_str)
            .chain(self.type_mismatches.iter().map(|m| m.field.as_str()))
            .chain(self.invalid_values.iter().map(|v| v.field.as_str()))
            .collect()
    }

    fn record(&mut self, contract: &Value, error: &ValidationError<'_>) {
        let at = pointer_to_field(&error.instance_path.to_string());
        match &error.kind {
            ValidationErrorKind::Required { property } => {
                let property = property
                    .as_str()
                    .map_or_else(|| property.to_string(), str::to_string);
                self.missing.push(join_field(&at, &property));
            }
            ValidationErrorKind::AdditionalProperties { unexpected } => {
                self.unexpected
                    .extend(unexpected.iter().map(|name| join_field(&at, name)));
            }
            ValidationErrorKind::Type { .. } => {
                let expected = contract
                    .pointer(&error.schema_path.to_string())
                    .map_or_else(|| "another type".to_string(), describe_type);
                self.type_mismatches.push(TypeMismatch {
                    field: at,
                    expected,
                    found: json_type_name(&error.instance),
                });
            }
            _ => self.invalid_values.push(InvalidValue {
                field: at,
                reason: error.to_string(),
            }),
        }
    }

    fn sort(&mut self) {
        self.missing.sort();
        self.missing.dedup();
        self.unexpected.sort();
        self.unexpected.dedup();
        self.type_mismatches.sort_by(|a, b| a.field.cmp(&b.field));
        self.invalid_values.sort_by(|a, b| a.field.cmp(&b.field));
    }
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("missing required field(s): {}", self.missing.join(", ")));
        }
        if !self.unexpected.is_empty() {
            parts.push(format!("unexpected field(s): {}", self.unexpected.join(", ")));
        }
        for m in &self.type_mismatches {
            parts.push(format!(
                "field '{}' expected {} but got {}",
                m.field, m.expected, m.found
            ));
        }
        for v in &self.invalid_values {
            parts.push(format!("field '{}' is invalid: {}", v.field, v.reason));
        }
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ContractViolation {}

/// A tool contract compiled for repeated validation.
///
/// A contract that does not compile is kept uncompiled; arguments for it are
/// passed through and the tool has the final say.
#[derive(Clone, Default)]
pub struct CompiledContract {
    validator: Option<Arc<Validator>>,
}

impl CompiledContract {
    pub fn compile(contract: &Value) -> Self {
        match jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(contract)
        {
            Ok(validator) => Self {
                validator: Some(Arc::new(validator)),
            },
            Err(e) => {
                warn!(error = %e, "Tool input contract does not compile, skipping validation");
                Self::default()
            }
        }
    }

    pub fn is_compiled(&self) -> bool {
        self.validator.is_some()
    }

    /// Check `arguments` against the compiled contract. `contract` must be the
    /// value this was compiled from.
    pub fn validate(
        &self,
        arguments: &Map<String, Value>,
        contract: &Value,
    ) -> Result<(), ContractViolation> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };

        let instance = Value::Object(arguments.clone());
        let mut violation = ContractViolation::default();
        for error in validator.iter_errors(&instance) {
            violation.record(contract, &error);
        }
        violation.sort();

        if violation.is_empty() {
            Ok(())
        } else {
            Err(violation)
        }
    }
}

impl fmt::Debug for CompiledContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledContract")
            .field("compiled", &self.is_compiled())
            .finish()
    }
}

/// Check `arguments` against `contract`, compiling it first.
///
/// Cached schemas carry a [`CompiledContract`]; this is for one-off checks.
pub fn validate_arguments(
    arguments: &Map<String, Value>,
    contract: &Value,
) -> Result<(), ContractViolation> {
    CompiledContract::compile(contract).validate(arguments, contract)
}

/// Convert numeric strings for `number`/`integer` properties in place.
///
/// Models often emit `"5"` where the contract asks for `5`.
pub fn coerce_argument_types(arguments: &mut Map<String, Value>, contract: &Value) {
    let Some(props) = contract.get("properties").and_then(Value::as_object) else {
        return;
    };

    for (key, value) in arguments.iter_mut() {
        let Some(expected) = props.get(key).and_then(|p| p.get("type")) else {
            continue;
        };
        let Some(text) = value.as_str() else {
            continue;
        };
        let text = text.trim();

        if accepts(expected, "integer") {
            if let Ok(n) = text.parse::<i64>() {
                *value = Value::from(n);
                continue;
            }
        }
        if accepts(expected, "number") {
            if let Some(n) = text
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
            {
                *value = Value::Number(n);
            }
        }
    }
}

fn accepts(expected: &Value, name: &str) -> bool {
    match expected {
        Value::String(t) => t == name,
        Value::Array(types) => types.iter().any(|t| t.as_str() == Some(name)),
        _ => false,
    }
}

/// `/filter/location` -> `filter.location`, root -> empty.
fn pointer_to_field(pointer: &str) -> String {
    pointer
        .split('/')
        .skip(1)
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .collect::<Vec<_>>()
        .join(".")
}

fn join_field(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::String(t) => t.clone(),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" | "),
        other => other.to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
