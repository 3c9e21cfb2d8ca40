use std::fmt::{self, Display};
use std::process::ExitStatus;

use thiserror::Error;

use crate::schema::FieldViolation;

/// Malformed textual input: durations, array ranges and script templates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("unable to parse duration ({0}), expected [D-]HH:MM:SS")]
    Duration(String),
    #[error("invalid array index token ({0})")]
    ArrayToken(String),
    #[error("array range step must be positive ({0})")]
    ZeroStep(String),
    #[error("array range {0} expands to more than {max} indices", max = crate::array_range::MAX_ARRAY_INDICES)]
    TooManyIndices(String),
    #[error("unknown placeholder {{{0}}} in job script template")]
    UnknownPlaceholder(String),
    #[error("unbalanced brace at byte {0} of job script template")]
    UnbalancedBrace(usize),
}

/// A resource payload that does not conform to the field catalog.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("resource info is not valid JSON")]
    Json(#[from] serde_json::Error),
    #[error("resource info must be {expected}, found {found}")]
    Shape {
        expected: &'static str,
        found: &'static str,
    },
    #[error("{}", FieldSetDisplay(.missing, .unknown))]
    Fields {
        missing: Vec<String>,
        unknown: Vec<String>,
    },
    #[error("field `{field}` must be a string or number, found {found}")]
    InvalidValue { field: String, found: &'static str },
    #[error("field `time` is malformed")]
    Time(#[source] FormatError),
}

struct FieldSetDisplay<'a>(&'a [String], &'a [String]);

impl Display for FieldSetDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let FieldSetDisplay(missing, unknown) = *self;
        if !missing.is_empty() {
            write!(f, "missing required fields: {}", missing.join(", "))?;
            if !unknown.is_empty() {
                f.write_str("; ")?;
            }
        }
        if !unknown.is_empty() {
            write!(f, "unknown fields: {}", unknown.join(", "))?;
        }
        Ok(())
    }
}

impl SchemaError {
    pub fn missing_fields(&self) -> &[String] {
        match self {
            SchemaError::Fields { missing, .. } => missing,
            _ => &[],
        }
    }

    pub fn unknown_fields(&self) -> &[String] {
        match self {
            SchemaError::Fields { unknown, .. } => unknown,
            _ => &[],
        }
    }
}

/// Experiment inputs, outputs or parameters violate their declared schema.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("experiment validation failed:{}", ViolationList(.violations))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

struct ViolationList<'a>(&'a [FieldViolation]);

impl Display for ViolationList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for v in self.0 {
            write!(f, "\n\t{}", v)?;
        }
        Ok(())
    }
}

impl ValidationError {
    pub fn new(violations: Vec<FieldViolation>) -> Self {
        ValidationError { violations }
    }

    pub fn single(v: FieldViolation) -> Self {
        ValidationError {
            violations: vec![v],
        }
    }
}

/// A required resource field resolved to nothing.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("resource policy does not provide required field `{0}`")]
pub struct UnimplementedResourceError(pub &'static str);

/// A child process (target or submission executable) exited unsuccessfully.
#[derive(Error, Debug, Clone)]
#[error("command `{command}` exited with {status}")]
pub struct SubprocessFailure {
    pub command: String,
    pub status: ExitStatus,
}

impl SubprocessFailure {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}
