//! Declarative field schemas for experiment inputs, outputs and parameters,
//! and the generic validator which checks a set of values against them.
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::{IndexMap, JsonValue};

/// Field values of one section of an experiment, keyed by field name.
pub type Values = IndexMap<String, JsonValue>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Number,
    Boolean,
    String,
    Path,
}

impl FieldType {
    pub fn matches(self, v: &JsonValue) -> bool {
        match self {
            FieldType::Integer => v.is_i64() || v.is_u64(),
            FieldType::Number => v.is_number(),
            FieldType::Boolean => v.is_boolean(),
            FieldType::String | FieldType::Path => v.is_string(),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::String => "string",
            FieldType::Path => "path",
        }
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_true() -> bool {
    true
}

/// Declaration of a single field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
    #[serde(default = "default_true")]
    pub required: bool,
    /// Derived fields are computed from the other fields once those have
    /// been validated, and may not be supplied by the caller.
    #[serde(default)]
    pub derived: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        FieldSpec {
            name: name.into(),
            ty,
            min: None,
            max: None,
            default: None,
            required: true,
            derived: false,
        }
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn default_value(mut self, v: impl Into<JsonValue>) -> Self {
        self.default = Some(v.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn derived(mut self) -> Self {
        self.derived = true;
        self
    }

    fn check(&self, v: &JsonValue) -> Option<ViolationKind> {
        if !self.ty.matches(v) {
            return Some(ViolationKind::TypeMismatch {
                expected: self.ty,
                found: json_kind(v),
            });
        }
        if let Some(x) = v.as_f64() {
            if let Some(min) = self.min {
                if x < min {
                    return Some(ViolationKind::BelowMinimum { value: x, min });
                }
            }
            if let Some(max) = self.max {
                if x > max {
                    return Some(ViolationKind::AboveMaximum { value: x, max });
                }
            }
        }
        None
    }

    /// Convert command-line text into a value of this field's type.
    pub fn coerce(&self, text: &str) -> Result<JsonValue, ViolationKind> {
        let invalid = || ViolationKind::InvalidLiteral {
            expected: self.ty,
            text: text.to_string(),
        };
        let v = match self.ty {
            FieldType::Integer => text
                .parse::<i64>()
                .map(JsonValue::from)
                .map_err(|_| invalid())?,
            // Integral text stays an integer, matching what the JSON literal would give.
            FieldType::Number => match text.parse::<i64>() {
                Ok(i) => JsonValue::from(i),
                Err(_) => text
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(JsonValue::Number)
                    .ok_or_else(invalid)?,
            },
            FieldType::Boolean => match text.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => JsonValue::Bool(true),
                "false" | "0" | "no" => JsonValue::Bool(false),
                _ => return Err(invalid()),
            },
            FieldType::String | FieldType::Path => JsonValue::String(text.to_string()),
        };
        Ok(v)
    }
}

fn json_kind(v: &JsonValue) -> &'static str {
    match v {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(n) if n.is_f64() => "number",
        JsonValue::Number(_) => "integer",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// An ordered list of field declarations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new(fields: impl IntoIterator<Item = FieldSpec>) -> Self {
        Schema {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn is_derived(&self, name: &str) -> bool {
        self.field(name).map_or(false, |f| f.derived)
    }
}

/// Which part of an experiment a field belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Inputs,
    Outputs,
    Parameters,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Inputs, Section::Outputs, Section::Parameters];

    pub const fn as_str(self) -> &'static str {
        match self {
            Section::Inputs => "inputs",
            Section::Outputs => "outputs",
            Section::Parameters => "parameters",
        }
    }
}

impl Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ViolationKind {
    Missing,
    Unknown,
    TypeMismatch {
        expected: FieldType,
        found: &'static str,
    },
    BelowMinimum {
        value: f64,
        min: f64,
    },
    AboveMaximum {
        value: f64,
        max: f64,
    },
    /// A derived field was given a value before derivation.
    DerivedSupplied,
    /// Derivation tried to set a field that is not declared derived.
    NotDerived,
    InvalidLiteral {
        expected: FieldType,
        text: String,
    },
}

impl Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ViolationKind::*;
        match self {
            Missing => write!(f, "required field is missing"),
            Unknown => write!(f, "field is not declared in the schema"),
            TypeMismatch { expected, found } => {
                write!(f, "expected {}, found {}", expected, found)
            }
            BelowMinimum { value, min } => write!(f, "{} is less than minimum {}", value, min),
            AboveMaximum { value, max } => write!(f, "{} is greater than maximum {}", value, max),
            DerivedSupplied => write!(f, "derived field cannot be supplied directly"),
            NotDerived => write!(f, "field is not derived and cannot be set during derivation"),
            InvalidLiteral { expected, text } => write!(f, "cannot parse {:?} as {}", text, expected),
        }
    }
}

/// A single field-level validation failure.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldViolation {
    pub section: Section,
    pub field: String,
    pub kind: ViolationKind,
}

impl Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.section, self.field, self.kind)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationStage {
    /// Derived fields are skipped and must not be present.
    Initial,
    /// Every declared field is checked.
    Full,
}

/// Check `values` against `schema`, filling in declared defaults.
///
/// All violations are collected rather than stopping at the first.
pub fn validate(
    schema: &Schema,
    section: Section,
    values: &mut Values,
    stage: ValidationStage,
) -> Vec<FieldViolation> {
    let mut violations = vec![];
    let mut violation = |field: &str, kind| {
        violations.push(FieldViolation {
            section,
            field: field.to_string(),
            kind,
        })
    };

    for spec in schema.fields() {
        if stage == ValidationStage::Initial && spec.derived {
            if values.contains_key(&spec.name) {
                violation(&spec.name, ViolationKind::DerivedSupplied);
            }
            continue;
        }

        match values.get(&spec.name) {
            Some(v) => {
                if let Some(kind) = spec.check(v) {
                    violation(&spec.name, kind);
                }
            }
            None => match spec.default {
                Some(ref d) => {
                    values.insert(spec.name.clone(), d.clone());
                }
                None if spec.required => violation(&spec.name, ViolationKind::Missing),
                None => {}
            },
        }
    }

    for key in values.keys() {
        if schema.field(key).is_none() {
            violation(key, ViolationKind::Unknown);
        }
    }

    violations
}
