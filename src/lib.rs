//! Job-array submission to Slurm for experiment scripts.
//!
//! A *target* program knows how to run one job of an experiment and, when
//! asked with `--slurminfo`, which resources that job needs.  The
//! `sbatch-harray` launcher expands an array range, asks the target for each
//! index and submits one batch script per job.
use std::fmt::Display;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

pub use indexmap::IndexMap;
pub use serde_json::Value as JsonValue;

pub use anyhow::{anyhow, bail, Context, Result};
pub use std::result::Result as StdResult;

pub mod array_range;
pub mod builder;
pub mod codec;
mod config;
pub mod duration;
pub mod error;
pub mod experiment;
pub mod resource;
pub mod schema;
pub mod submit;
pub mod target;

pub use array_range::{format_array_indices, parse_array_range, ArrayRange};
pub use builder::{build_request, standard_job_name, JobContext, ResourcePolicy};
pub use codec::{encode, validate_and_decode, validate_and_decode_all};
pub use config::*;
pub use duration::{format_duration, parse_duration};
pub use error::{
    FormatError, SchemaError, SubprocessFailure, UnimplementedResourceError, ValidationError,
};
pub use experiment::{Experiment, ExperimentDescriptor, ExperimentFields, ExperimentSchema};
pub use resource::{ResourceField, ResourceRequest, SlurmProfile};
pub use target::{respond_slurminfo, serve_batch_query, SlurmArgs};

/// Attach the offending path to I/O errors.
pub trait IoContext<T> {
    fn context_read(self, path: impl AsRef<Path>) -> Result<T>;
    fn context_write(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T, E> IoContext<T> for StdResult<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context_read(self, path: impl AsRef<Path>) -> Result<T> {
        let path = path.as_ref();
        self.with_context(|| format!("failed to read {:?}", path))
    }

    fn context_write(self, path: impl AsRef<Path>) -> Result<T> {
        let path = path.as_ref();
        self.with_context(|| format!("failed to write {:?}", path))
    }
}

pub fn write_json<T, P>(val: T, path: P) -> Result<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let f = std::fs::File::create(path).context_write(path)?;
    serde_json::to_writer_pretty(f, &val).context("serialization failed")
}

pub fn read_json<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let f = std::fs::File::open(path).context_read(path)?;
    serde_json::from_reader(std::io::BufReader::new(f)).context("deserialization failed")
}

pub fn join_display<T: Display>(items: impl IntoIterator<Item = T>, sep: &str) -> String {
    use std::fmt::Write;
    let mut s = String::new();
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            s.push_str(sep);
        }
        let _ = write!(s, "{}", item);
    }
    s
}

/// Install the stderr log subscriber used by the binaries.  `RUST_LOG`
/// overrides the default level.
pub fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
