//! Helpers for target programs answering the launcher's resource queries.
//!
//! A target flattens [`SlurmArgs`] into its own command line.  When the
//! launcher passes `--slurminfo`, the target prints one resource object and
//! exits; with `--p-slurminfo CMDS OUT` it answers for a whole batch at once.
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Args;

use crate::builder::JobContext;
use crate::codec::{encode, to_json_string};
use crate::resource::{ResourceRequest, SlurmProfile};
use crate::*;

#[derive(Args, Clone, Debug, Default, PartialEq, Eq)]
pub struct SlurmArgs {
    /// Print this job's Slurm resource request as JSON and exit.
    #[clap(long)]
    pub slurminfo: bool,

    /// Resource policy to use when answering --slurminfo queries.
    #[clap(long, value_enum, default_value_t)]
    pub slurmprofile: SlurmProfile,

    /// Answer a batch of resource queries: read argument lists from CMDS, write resources to OUT.
    #[clap(long = "p-slurminfo", value_parser, number_of_values = 2, value_names = &["CMDS", "OUT"])]
    pub p_slurminfo: Option<Vec<PathBuf>>,
}

impl SlurmArgs {
    /// The `(commands, output)` file pair of a batch query.
    pub fn batch_query(&self) -> Option<(&Path, &Path)> {
        match self.p_slurminfo.as_deref() {
            Some([cmds, out]) => Some((cmds.as_path(), out.as_path())),
            _ => None,
        }
    }

    /// True if the target was launched only to report resources.
    pub fn is_query(&self) -> bool {
        self.slurminfo || self.p_slurminfo.is_some()
    }

    pub fn job_context<'a>(&self, index: usize) -> JobContext<'a> {
        JobContext::new(index, self.slurmprofile)
    }
}

/// If `--slurminfo` was given, write `request` to `out` as a single JSON
/// object and return `true`; the target should then exit successfully.
pub fn respond_slurminfo<W: Write>(
    args: &SlurmArgs,
    request: &ResourceRequest,
    mut out: W,
) -> Result<bool> {
    if !args.slurminfo {
        return Ok(false);
    }
    writeln!(out, "{}", to_json_string(request)).context("failed to write resource info")?;
    out.flush()?;
    Ok(true)
}

/// Answer a batch query.  `f` is called with each argument list from
/// `commands_path`, in order, and the results are written as a JSON array.
pub fn serve_batch_query<F>(commands_path: &Path, output_path: &Path, mut f: F) -> Result<()>
where
    F: FnMut(&[String]) -> Result<ResourceRequest>,
{
    let commands: Vec<Vec<String>> = read_json(commands_path)?;
    tracing::debug!(n = commands.len(), "answering batch resource query");
    let resources = commands
        .iter()
        .enumerate()
        .map(|(i, argv)| {
            f(argv)
                .map(|r| encode(&r))
                .with_context(|| format!("failed to build resources for command {} ({:?})", i, argv))
        })
        .collect::<Result<Vec<JsonValue>>>()?;
    write_json(&resources, output_path)
}
