//! Schema-checked description of a single experiment run, and the results
//! directory layout derived from it.
//!
//! Construction goes through [`DescriptorBuilder`], whose type parameter
//! tracks how far validation has progressed:
//!
//! ```text
//! Constructed --validate_initial--> FirstValidated --define_derived--> DerivedPopulated
//!     --validate_full--> ExperimentDescriptor
//! ```
//!
//! The first pass ignores derived fields so that [`Experiment::define_derived`]
//! can compute them from already-validated inputs; the second pass checks
//! the complete schema.
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anyhow::Context;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::ValidationError;
use crate::schema::{
    validate, FieldViolation, Schema, Section, ValidationStage, Values, ViolationKind,
};
use crate::{JsonValue, Result, StdResult};

/// Separator between components of an output file name.
pub const PATH_SEP: &str = "_";
/// Snapshot of the parameters, written once into each results directory.
pub const PARAMETERS_FILE: &str = "parameters.json";
/// Name of the integer input holding the job array index.
pub const INDEX_INPUT: &str = "index";
/// Number of digest bytes kept for [`ExperimentDescriptor::parameter_string`].
pub const PARAMETER_DIGEST_BYTES: usize = 8;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSchema {
    #[serde(default)]
    pub inputs: Schema,
    #[serde(default)]
    pub outputs: Schema,
    #[serde(default)]
    pub parameters: Schema,
}

impl ExperimentSchema {
    pub fn section(&self, s: Section) -> &Schema {
        match s {
            Section::Inputs => &self.inputs,
            Section::Outputs => &self.outputs,
            Section::Parameters => &self.parameters,
        }
    }
}

/// Raw or validated field values of an experiment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentFields {
    #[serde(default)]
    pub inputs: Values,
    #[serde(default)]
    pub outputs: Values,
    #[serde(default)]
    pub parameters: Values,
}

impl ExperimentFields {
    pub fn section(&self, s: Section) -> &Values {
        match s {
            Section::Inputs => &self.inputs,
            Section::Outputs => &self.outputs,
            Section::Parameters => &self.parameters,
        }
    }

    pub fn section_mut(&mut self, s: Section) -> &mut Values {
        match s {
            Section::Inputs => &mut self.inputs,
            Section::Outputs => &mut self.outputs,
            Section::Parameters => &mut self.parameters,
        }
    }

    /// Set a field from command-line text, converting it to the declared type.
    pub fn set_raw(
        &mut self,
        schema: &ExperimentSchema,
        section: Section,
        name: &str,
        text: &str,
    ) -> StdResult<(), ValidationError> {
        let violation = |kind| {
            ValidationError::single(FieldViolation {
                section,
                field: name.to_string(),
                kind,
            })
        };
        let spec = schema
            .section(section)
            .field(name)
            .ok_or_else(|| violation(ViolationKind::Unknown))?;
        let value = spec.coerce(text).map_err(violation)?;
        self.section_mut(section).insert(name.to_string(), value);
        Ok(())
    }
}

/// An experiment definition: its schema, where results go, and how derived
/// fields are computed.
pub trait Experiment {
    fn schema(&self) -> &ExperimentSchema;

    /// Directory under which one subdirectory per parameter set is created.
    fn results_root(&self) -> &Path;

    fn define_derived(
        &self,
        _fields: &mut DerivedFields<'_>,
    ) -> StdResult<(), ValidationError> {
        Ok(())
    }
}

/// Write access to derived fields during the derivation stage.  Non-derived
/// fields are read-only.
pub struct DerivedFields<'a> {
    schema: &'a ExperimentSchema,
    fields: &'a mut ExperimentFields,
}

impl<'a> DerivedFields<'a> {
    pub fn get(&self, section: Section, name: &str) -> Option<&JsonValue> {
        self.fields.section(section).get(name)
    }

    pub fn input(&self, name: &str) -> Option<&JsonValue> {
        self.get(Section::Inputs, name)
    }

    pub fn parameter(&self, name: &str) -> Option<&JsonValue> {
        self.get(Section::Parameters, name)
    }

    pub fn set(
        &mut self,
        section: Section,
        name: &str,
        value: impl Into<JsonValue>,
    ) -> StdResult<(), ValidationError> {
        let kind = match self.schema.section(section).field(name) {
            None => ViolationKind::Unknown,
            Some(spec) if !spec.derived => ViolationKind::NotDerived,
            Some(_) => {
                self.fields
                    .section_mut(section)
                    .insert(name.to_string(), value.into());
                return Ok(());
            }
        };
        Err(ValidationError::single(FieldViolation {
            section,
            field: name.to_string(),
            kind,
        }))
    }
}

pub struct Constructed;
pub struct FirstValidated;
pub struct DerivedPopulated;

pub struct DescriptorBuilder<'s, S> {
    schema: &'s ExperimentSchema,
    root: PathBuf,
    fields: ExperimentFields,
    _state: PhantomData<S>,
}

impl<'s, S> DescriptorBuilder<'s, S> {
    pub fn fields(&self) -> &ExperimentFields {
        &self.fields
    }

    fn advance<T>(self) -> DescriptorBuilder<'s, T> {
        DescriptorBuilder {
            schema: self.schema,
            root: self.root,
            fields: self.fields,
            _state: PhantomData,
        }
    }

    fn validate(&mut self, stage: ValidationStage) -> StdResult<(), ValidationError> {
        let mut violations = vec![];
        for section in Section::ALL {
            violations.extend(validate(
                self.schema.section(section),
                section,
                self.fields.section_mut(section),
                stage,
            ));
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(violations))
        }
    }
}

impl<'s> DescriptorBuilder<'s, Constructed> {
    pub fn new(schema: &'s ExperimentSchema, root: impl Into<PathBuf>, fields: ExperimentFields) -> Self {
        DescriptorBuilder {
            schema,
            root: root.into(),
            fields,
            _state: PhantomData,
        }
    }

    pub fn validate_initial(
        mut self,
    ) -> StdResult<DescriptorBuilder<'s, FirstValidated>, ValidationError> {
        self.validate(ValidationStage::Initial)?;
        Ok(self.advance())
    }
}

impl<'s> DescriptorBuilder<'s, FirstValidated> {
    pub fn define_derived<F>(
        mut self,
        derive: F,
    ) -> StdResult<DescriptorBuilder<'s, DerivedPopulated>, ValidationError>
    where
        F: FnOnce(&mut DerivedFields<'_>) -> StdResult<(), ValidationError>,
    {
        derive(&mut DerivedFields {
            schema: self.schema,
            fields: &mut self.fields,
        })?;
        Ok(self.advance())
    }
}

impl<'s> DescriptorBuilder<'s, DerivedPopulated> {
    pub fn validate_full(mut self) -> StdResult<ExperimentDescriptor, ValidationError> {
        self.validate(ValidationStage::Full)?;
        Ok(ExperimentDescriptor {
            fields: self.fields,
            root: self.root,
            parameter_string: OnceCell::new(),
            input_string: OnceCell::new(),
            directory: OnceCell::new(),
        })
    }
}

/// A fully validated experiment.  Read-only apart from lazily computed,
/// memoised identifiers and the results directory.
#[derive(Clone, Debug)]
pub struct ExperimentDescriptor {
    fields: ExperimentFields,
    root: PathBuf,
    parameter_string: OnceCell<String>,
    input_string: OnceCell<String>,
    directory: OnceCell<PathBuf>,
}

impl ExperimentDescriptor {
    /// Run every construction stage for `experiment`.
    pub fn new<E: Experiment + ?Sized>(
        experiment: &E,
        fields: ExperimentFields,
    ) -> StdResult<Self, ValidationError> {
        DescriptorBuilder::new(experiment.schema(), experiment.results_root(), fields)
            .validate_initial()?
            .define_derived(|d| experiment.define_derived(d))?
            .validate_full()
    }

    pub fn fields(&self) -> &ExperimentFields {
        &self.fields
    }

    pub fn input(&self, name: &str) -> Option<&JsonValue> {
        self.fields.inputs.get(name)
    }

    pub fn output(&self, name: &str) -> Option<&JsonValue> {
        self.fields.outputs.get(name)
    }

    pub fn parameter(&self, name: &str) -> Option<&JsonValue> {
        self.fields.parameters.get(name)
    }

    /// The job array index, if the experiment declares an integer `index` input.
    pub fn index(&self) -> Option<usize> {
        self.input(INDEX_INPUT)
            .and_then(JsonValue::as_u64)
            .and_then(|i| usize::try_from(i).ok())
    }

    /// Hex digest identifying the parameter set.  Independent of the order
    /// in which parameters were inserted.
    pub fn parameter_string(&self) -> &str {
        self.parameter_string
            .get_or_init(|| parameter_digest(&self.fields.parameters))
    }

    /// Input values ordered by input name and joined with [`PATH_SEP`].
    pub fn input_string(&self) -> &str {
        self.input_string.get_or_init(|| {
            let mut inputs: Vec<_> = self.fields.inputs.iter().collect();
            inputs.sort_by(|a, b| a.0.cmp(b.0));
            inputs
                .into_iter()
                .map(|(_, v)| value_to_path_component(v))
                .collect::<Vec<_>>()
                .join(PATH_SEP)
        })
    }

    /// `<root>/<parameter_string>`, created on first access together with a
    /// [`PARAMETERS_FILE`] snapshot if none exists yet.
    pub fn directory(&self) -> Result<&Path> {
        self.directory
            .get_or_try_init(|| -> Result<PathBuf> {
                let dir = self.root.join(self.parameter_string());
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("failed to create results directory {:?}", &dir))?;
                write_parameters_snapshot(&dir, &self.fields.parameters)?;
                Ok(dir)
            })
            .map(PathBuf::as_path)
    }

    /// File name of an output inside the results directory.  Suffixes
    /// starting with `.` are appended directly, others after [`PATH_SEP`].
    pub fn output_file_name(&self, suffix: &str) -> String {
        if suffix.starts_with('.') {
            format!("{}{}", self.input_string(), suffix)
        } else {
            format!("{}{}{}", self.input_string(), PATH_SEP, suffix)
        }
    }

    pub fn get_output_path(&self, suffix: &str) -> Result<PathBuf> {
        Ok(self.directory()?.join(self.output_file_name(suffix)))
    }
}

fn value_to_path_component(v: &JsonValue) -> String {
    match v {
        JsonValue::String(s) => s.clone(),
        v => v.to_string(),
    }
}

/// Serialise `v` with object keys sorted at every level.
///
/// Sorts explicitly rather than relying on `serde_json::Map` ordering, which
/// changes if any crate in the build enables serde_json's `preserve_order`.
pub fn canonical_json(v: &JsonValue) -> String {
    fn write(v: &JsonValue, out: &mut String) {
        match v {
            JsonValue::Object(m) => {
                let mut entries: Vec<_> = m.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                out.push('{');
                for (i, (k, v)) in entries.into_iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&JsonValue::String(k.clone()).to_string());
                    out.push(':');
                    write(v, out);
                }
                out.push('}');
            }
            JsonValue::Array(items) => {
                out.push('[');
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(v, out);
                }
                out.push(']');
            }
            v => out.push_str(&v.to_string()),
        }
    }

    let mut out = String::new();
    write(v, &mut out);
    out
}

/// Truncated SHA-256 of the canonical JSON encoding of `parameters`.
///
/// Eight bytes leave collisions negligible for batches of a few thousand
/// parameter sets.
pub fn parameter_digest(parameters: &Values) -> String {
    let obj = JsonValue::Object(
        parameters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    );
    let digest = Sha256::digest(canonical_json(&obj).as_bytes());
    hex::encode(&digest[..PARAMETER_DIGEST_BYTES])
}

/// Several jobs with identical parameters may race to create the same
/// directory.  The snapshot is written to a temporary file and linked into
/// place without clobbering, so the first writer wins and later ones skip.
fn write_parameters_snapshot(dir: &Path, parameters: &Values) -> Result<()> {
    let path = dir.join(PARAMETERS_FILE);
    if path.exists() {
        return Ok(());
    }

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {:?}", dir))?;
    serde_json::to_writer_pretty(tmp.as_file_mut(), parameters).context("serialization failed")?;
    tmp.as_file_mut().flush()?;

    match tmp.persist_noclobber(&path) {
        Ok(_) => {
            tracing::debug!(path = %path.display(), "wrote parameter snapshot");
            Ok(())
        }
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => {
            Err(e.error).with_context(|| format!("failed to write parameter snapshot {:?}", &path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSpec, FieldType};
    use serde_json::json;

    struct Sweep {
        schema: ExperimentSchema,
        root: PathBuf,
    }

    impl Sweep {
        fn new(root: &Path) -> Self {
            Sweep {
                schema: ExperimentSchema {
                    inputs: Schema::new([
                        FieldSpec::new("index", FieldType::Integer).min(0.),
                        FieldSpec::new("instance", FieldType::String),
                    ]),
                    outputs: Schema::new([FieldSpec::new("solution", FieldType::Path).derived()]),
                    parameters: Schema::new([
                        FieldSpec::new("gap", FieldType::Number).min(0.).default_value(0.01),
                        FieldSpec::new("threads", FieldType::Integer).min(1.).default_value(1),
                        FieldSpec::new("cuts", FieldType::Boolean).default_value(true),
                    ]),
                },
                root: root.to_path_buf(),
            }
        }
    }

    impl Experiment for Sweep {
        fn schema(&self) -> &ExperimentSchema {
            &self.schema
        }

        fn results_root(&self) -> &Path {
            &self.root
        }

        fn define_derived(
            &self,
            d: &mut DerivedFields<'_>,
        ) -> StdResult<(), ValidationError> {
            let name = format!(
                "{}.sol",
                d.input("instance").and_then(JsonValue::as_str).unwrap_or("")
            );
            d.set(Section::Outputs, "solution", name)
        }
    }

    fn fields(v: JsonValue) -> ExperimentFields {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn two_stage_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let sweep = Sweep::new(tmp.path());
        let d = ExperimentDescriptor::new(
            &sweep,
            fields(json!({"inputs": {"index": 3, "instance": "a280"}})),
        )
        .unwrap();
        assert_eq!(d.output("solution"), Some(&json!("a280.sol")));
        assert_eq!(d.parameter("threads"), Some(&json!(1)));
        assert_eq!(d.index(), Some(3));
    }

    #[test]
    fn derived_field_cannot_be_supplied() {
        let tmp = tempfile::tempdir().unwrap();
        let sweep = Sweep::new(tmp.path());
        let err = ExperimentDescriptor::new(
            &sweep,
            fields(json!({
                "inputs": {"index": -2, "instance": "a280"},
                "outputs": {"solution": "x"},
                "parameters": {"threads": 0}
            })),
        )
        .unwrap_err();
        let fields: Vec<_> = err
            .violations
            .iter()
            .map(|v| (v.section, v.field.as_str()))
            .collect();
        assert_eq!(
            fields,
            [
                (Section::Inputs, "index"),
                (Section::Outputs, "solution"),
                (Section::Parameters, "threads"),
            ]
        );
    }

    #[test]
    fn derivation_only_sets_derived_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let sweep = Sweep::new(tmp.path());
        let err = DescriptorBuilder::new(
            sweep.schema(),
            tmp.path(),
            fields(json!({"inputs": {"index": 0, "instance": "a"}})),
        )
        .validate_initial()
        .unwrap()
        .define_derived(|d| d.set(Section::Parameters, "threads", 8))
        .err()
        .unwrap();
        assert_eq!(err.violations[0].kind, ViolationKind::NotDerived);
    }

    #[test]
    fn missing_derived_field_fails_full_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let sweep = Sweep::new(tmp.path());
        let err = DescriptorBuilder::new(
            sweep.schema(),
            tmp.path(),
            fields(json!({"inputs": {"index": 0, "instance": "a"}})),
        )
        .validate_initial()
        .unwrap()
        .define_derived(|_| Ok(()))
        .unwrap()
        .validate_full()
        .unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert_eq!(err.violations[0].field, "solution");
        assert_eq!(err.violations[0].kind, ViolationKind::Missing);
    }

    #[test]
    fn parameter_string_is_order_independent() {
        let tmp = tempfile::tempdir().unwrap();
        let sweep = Sweep::new(tmp.path());
        let mut a = ExperimentFields::default();
        a.inputs = fields(json!({"inputs": {"index": 0, "instance": "a"}})).inputs;
        let mut b = a.clone();
        a.parameters.insert("gap".into(), json!(0.1));
        a.parameters.insert("threads".into(), json!(4));
        b.parameters.insert("threads".into(), json!(4));
        b.parameters.insert("gap".into(), json!(0.1));
        let mut c = a.clone();
        c.parameters.insert("threads".into(), json!(2));

        let a = ExperimentDescriptor::new(&sweep, a).unwrap();
        let b = ExperimentDescriptor::new(&sweep, b).unwrap();
        let c = ExperimentDescriptor::new(&sweep, c).unwrap();
        assert_eq!(a.parameter_string(), b.parameter_string());
        assert_ne!(a.parameter_string(), c.parameter_string());
        assert_eq!(a.parameter_string().len(), 2 * PARAMETER_DIGEST_BYTES);
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        assert_eq!(
            canonical_json(&json!({"b": [1, {"d": 1, "c": "x"}], "a": null})),
            r#"{"a":null,"b":[1,{"c":"x","d":1}]}"#
        );
    }

    #[test]
    fn directory_is_created_once() {
        let tmp = tempfile::tempdir().unwrap();
        let sweep = Sweep::new(tmp.path());
        let f = fields(json!({"inputs": {"index": 7, "instance": "berlin52"}}));
        let d = ExperimentDescriptor::new(&sweep, f.clone()).unwrap();

        let dir = d.directory().unwrap().to_path_buf();
        assert_eq!(dir, tmp.path().join(d.parameter_string()));
        let snapshot = dir.join(PARAMETERS_FILE);
        let written: Values =
            serde_json::from_reader(std::fs::File::open(&snapshot).unwrap()).unwrap();
        assert_eq!(&written, &d.fields().parameters);

        std::fs::write(&snapshot, "sentinel").unwrap();
        assert_eq!(d.directory().unwrap(), dir);

        // A second descriptor with the same parameters reuses the directory
        // and leaves the existing snapshot alone.
        let other = ExperimentDescriptor::new(&sweep, f).unwrap();
        assert_eq!(other.directory().unwrap(), dir);
        assert_eq!(std::fs::read_to_string(&snapshot).unwrap(), "sentinel");
        let entries = std::fs::read_dir(&dir).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn output_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let sweep = Sweep::new(tmp.path());
        let d = ExperimentDescriptor::new(
            &sweep,
            fields(json!({"inputs": {"instance": "berlin52", "index": 7}})),
        )
        .unwrap();
        assert_eq!(d.input_string(), "7_berlin52");
        assert_eq!(d.output_file_name(".out"), "7_berlin52.out");
        assert_eq!(d.output_file_name("foo"), "7_berlin52_foo");
        assert_eq!(
            d.get_output_path("log.txt").unwrap(),
            tmp.path().join(d.parameter_string()).join("7_berlin52_log.txt")
        );
    }

    #[test]
    fn set_raw_coerces_cli_text() {
        let tmp = tempfile::tempdir().unwrap();
        let sweep = Sweep::new(tmp.path());
        let mut f = ExperimentFields::default();
        f.set_raw(sweep.schema(), Section::Inputs, "index", "12").unwrap();
        f.set_raw(sweep.schema(), Section::Inputs, "instance", "pr76").unwrap();
        f.set_raw(sweep.schema(), Section::Parameters, "cuts", "false").unwrap();
        assert!(f.set_raw(sweep.schema(), Section::Parameters, "threads", "many").is_err());
        assert!(f.set_raw(sweep.schema(), Section::Inputs, "bogus", "1").is_err());

        let d = ExperimentDescriptor::new(&sweep, f).unwrap();
        assert_eq!(d.index(), Some(12));
        assert_eq!(d.parameter("cuts"), Some(&json!(false)));
    }

    #[test]
    fn cli_integer_text_hashes_like_json_integer() {
        let tmp = tempfile::tempdir().unwrap();
        let sweep = Sweep::new(tmp.path());
        let mut cli = ExperimentFields::default();
        cli.set_raw(sweep.schema(), Section::Inputs, "index", "0").unwrap();
        cli.set_raw(sweep.schema(), Section::Inputs, "instance", "a").unwrap();
        cli.set_raw(sweep.schema(), Section::Parameters, "gap", "1").unwrap();
        let json = fields(json!({"inputs": {"index": 0, "instance": "a"}, "parameters": {"gap": 1}}));

        let cli = ExperimentDescriptor::new(&sweep, cli).unwrap();
        let json = ExperimentDescriptor::new(&sweep, json).unwrap();
        assert_eq!(cli.parameter("gap"), Some(&json!(1)));
        assert_eq!(cli.parameter_string(), json.parameter_string());
    }
}
