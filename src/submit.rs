//! The submission loop behind `sbatch-harray`.
//!
//! For every index the target is asked for its resources, the job script is
//! rendered into a temporary file and `sbatch` is called with the resource
//! flags.  The first failure aborts the rest of the batch.
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::NamedTempFile;

use crate::array_range::ArrayRange;
use crate::codec::{validate_and_decode, validate_and_decode_all};
use crate::error::{FormatError, SubprocessFailure};
use crate::resource::{ResourceField, ResourceRequest, SlurmProfile};
use crate::*;

/// Stand-in submission executable shipped with this crate.
pub const FAKE_SBATCH: &str = "sbatch-fake";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Query targets and render scripts, but do not call `sbatch`.
    pub dry_run: bool,
    /// Print each command line and job script.
    pub verbose: bool,
    pub profile: SlurmProfile,
    /// Query all indices with a single `--p-slurminfo` call.
    pub batch_query: bool,
    pub sbatch: String,
    pub fake_fallback: bool,
    pub interpreter: Option<String>,
    pub script_dir: Option<PathBuf>,
}

impl SubmitOptions {
    pub fn from_config(config: &Config) -> Self {
        SubmitOptions {
            dry_run: false,
            verbose: false,
            profile: SlurmProfile::Default,
            batch_query: false,
            sbatch: config.sbatch.clone(),
            fake_fallback: config.fake_fallback,
            interpreter: config.interpreter.clone(),
            script_dir: config.script_dir.clone(),
        }
    }

    fn show_details(&self) -> bool {
        self.verbose || self.dry_run
    }
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// The program being submitted.  `args` come before the job index on its command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub program: String,
    pub args: Vec<String>,
}

impl Target {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Target {
            program: program.into(),
            args,
        }
    }

    fn command(&self, interpreter: Option<&str>) -> Command {
        match interpreter {
            Some(i) => {
                let mut cmd = Command::new(i);
                cmd.arg(&self.program);
                cmd
            }
            None => Command::new(&self.program),
        }
    }

    fn job_args(&self, index: usize) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(index.to_string());
        args
    }
}

/// One job handled by [`submit_all`].  `job_id` is `None` for dry runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submitted {
    pub index: usize,
    pub job_id: Option<u64>,
}

fn profile_args(profile: SlurmProfile) -> Vec<String> {
    match profile {
        SlurmProfile::Default => vec![],
        p => vec!["--slurmprofile".to_string(), p.to_string()],
    }
}

fn display_command(cmd: &Command) -> String {
    let mut s = cmd.get_program().to_string_lossy().into_owned();
    for arg in cmd.get_args() {
        s.push(' ');
        s.push_str(&arg.to_string_lossy());
    }
    s
}

/// Run `cmd` with stdout captured and stderr passed through.
fn run_checked(cmd: &mut Command) -> Result<Output> {
    let command = display_command(cmd);
    tracing::debug!("running {}", command);
    let output = cmd
        .stderr(Stdio::inherit())
        .output()
        .with_context(|| format!("failed to run `{}`", command))?;
    if !output.status.success() {
        return Err(SubprocessFailure {
            command,
            status: output.status,
        }
        .into());
    }
    Ok(output)
}

pub fn create_tmp_file(dir: Option<&Path>) -> Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("sbatch-harray-");
    if let Some(d) = dir {
        return builder
            .tempfile_in(d)
            .with_context(|| format!("failed to create temp file in {:?}", d));
    }
    let d = format!("/run/user/{}", unsafe { libc::geteuid() });
    builder
        .tempfile_in(d)
        .or_else(|_| builder.tempfile())
        .context("failed to create temp file")
}

/// Ask the target for the resources of a single job.
pub fn query_target(opts: &SubmitOptions, target: &Target, index: usize) -> Result<ResourceRequest> {
    let mut cmd = target.command(opts.interpreter.as_deref());
    cmd.arg("--slurminfo")
        .args(profile_args(opts.profile))
        .args(target.job_args(index));
    let output = run_checked(&mut cmd)?;
    let text = String::from_utf8(output.stdout).context("target output is not valid UTF-8")?;
    validate_and_decode(&text)
        .with_context(|| format!("invalid resource info from target for index {}", index))
}

/// Ask the target for the resources of every job with one `--p-slurminfo` call.
pub fn query_target_batch(
    opts: &SubmitOptions,
    target: &Target,
    indices: &[usize],
) -> Result<Vec<ResourceRequest>> {
    let first = match indices.first() {
        Some(&i) => i,
        None => return Ok(vec![]),
    };
    let commands: Vec<Vec<String>> = indices.iter().map(|&i| target.job_args(i)).collect();

    let mut command_file = create_tmp_file(opts.script_dir.as_deref())?;
    let resource_file = create_tmp_file(opts.script_dir.as_deref())?;
    serde_json::to_writer(command_file.as_file_mut(), &commands)?;
    command_file.as_file_mut().flush()?;

    let mut cmd = target.command(opts.interpreter.as_deref());
    cmd.arg("--p-slurminfo")
        .arg(command_file.path())
        .arg(resource_file.path())
        .args(profile_args(opts.profile))
        .args(target.job_args(first));
    run_checked(&mut cmd)?;

    let text = std::fs::read_to_string(resource_file.path()).context_read(resource_file.path())?;
    let resources = validate_and_decode_all(&text).context("invalid resource info from batch query")?;
    if resources.len() != indices.len() {
        bail!(
            "target answered {} resource queries, expected {}",
            resources.len(),
            indices.len()
        )
    }
    Ok(resources)
}

/// Substitute `{python_script}` (or `{target}`), `{job_index}` and
/// `{time_limit}` into a job script template.  `{{` and `}}` are literal braces.
pub fn render_script(
    template: &str,
    target: &str,
    job_index: usize,
    time_limit: Option<&str>,
) -> StdResult<String, FormatError> {
    let is_brace = |c: char| c == '{' || c == '}';
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(i) = rest.find(is_brace) {
        let offset = template.len() - rest.len() + i;
        out.push_str(&rest[..i]);
        let tail = &rest[i..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            return Err(FormatError::UnbalancedBrace(offset));
        }

        let close = tail[1..]
            .find(is_brace)
            .filter(|&j| tail[1 + j..].starts_with('}'))
            .ok_or(FormatError::UnbalancedBrace(offset))?
            + 1;
        match &tail[1..close] {
            "python_script" | "target" => out.push_str(target),
            "job_index" => out.push_str(&job_index.to_string()),
            "time_limit" => out.push_str(time_limit.unwrap_or_default()),
            other => return Err(FormatError::UnknownPlaceholder(other.to_string())),
        }
        rest = &tail[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

pub fn sbatch_args(request: &ResourceRequest, script: &Path) -> Vec<String> {
    let mut args = vec!["--parsable".to_string()];
    request.extend_sbatch_args(&mut args);
    args.push(script.to_string_lossy().into_owned());
    args
}

pub fn parse_sbatch_output(bytes: &[u8]) -> Result<u64> {
    let s = std::str::from_utf8(bytes).context("failed to get sbatch output")?;
    let id = s.trim().split(';').next().unwrap_or_default();
    id.parse()
        .with_context(|| format!("failed to parse sbatch output:\n{}", s))
}

/// Locate the submission executable, falling back to `sbatch-fake` if allowed.
pub fn resolve_sbatch(opts: &SubmitOptions) -> Result<PathBuf> {
    let err = match which::which(&opts.sbatch) {
        Ok(p) => return Ok(p),
        Err(e) => e,
    };
    if !opts.fake_fallback {
        bail!("{} was not found on this system: {}", opts.sbatch, err)
    }
    tracing::warn!(
        "{} was not found on this system, falling back to {}.",
        opts.sbatch,
        FAKE_SBATCH
    );
    std::env::current_exe()
        .ok()
        .map(|p| p.with_file_name(FAKE_SBATCH))
        .and_then(|p| which::which(p).ok())
        .or_else(|| which::which(FAKE_SBATCH).ok())
        .ok_or_else(|| anyhow!("neither {} nor {} was found", opts.sbatch, FAKE_SBATCH))
}

/// Render and (unless `sbatch` is `None`) submit one job.  The script file
/// is removed before returning.
fn submit_one<W: Write>(
    opts: &SubmitOptions,
    sbatch: Option<&Path>,
    target: &Target,
    index: usize,
    request: &ResourceRequest,
    out: &mut W,
) -> Result<Option<u64>> {
    let time_limit = request.time_limit();
    if time_limit.is_none() && request.script().contains("{time_limit}") {
        tracing::warn!("index {}: no time limit given, {{time_limit}} left empty", index);
    }
    let script = render_script(request.script(), &target.program, index, time_limit.as_deref())?;

    let mut file = create_tmp_file(opts.script_dir.as_deref())?;
    file.write_all(script.as_bytes()).context_write(file.path())?;
    file.flush()?;

    let args = sbatch_args(request, file.path());
    let program = match sbatch {
        Some(p) => p.to_string_lossy().into_owned(),
        None => opts.sbatch.clone(),
    };
    let command_line = format!("{} {}", program, join_display(&args, " "));

    if opts.show_details() {
        writeln!(out, "# {:-^80}", " COMMAND ")?;
        writeln!(out, "{}", command_line)?;
        writeln!(out, "# {:-^80}", format!(" SCRIPT ({}) ", file.path().display()))?;
        write!(out, "{}", script)?;
        if !script.ends_with('\n') {
            writeln!(out)?;
        }
    }

    let sbatch = match sbatch {
        Some(p) => p,
        None => {
            file.close().context("failed to remove job script")?;
            return Ok(None);
        }
    };

    let output = Command::new(sbatch)
        .args(&args)
        .output()
        .with_context(|| format!("failed to run `{}`", command_line))?;
    if !output.status.success() {
        eprintln!("{}", String::from_utf8_lossy(&output.stderr).trim_end());
        return Err(SubprocessFailure {
            command: command_line,
            status: output.status,
        }
        .into());
    }
    file.close().context("failed to remove job script")?;
    parse_sbatch_output(&output.stdout).map(Some)
}

/// Index and aggregatable resources of each job, for display.
pub fn summary_table(requests: &[(usize, ResourceRequest)]) -> comfy_table::Table {
    use comfy_table::*;

    let columns: Vec<ResourceField> = ResourceField::ALL
        .into_iter()
        .filter(|&f| f.aggregatable() && f != ResourceField::Script)
        .filter(|&f| requests.iter().any(|(_, r)| r.get(f).is_some()))
        .collect();

    let mut t = Table::new();
    let mut header = vec![Cell::new("index")];
    header.extend(columns.iter().map(Cell::new));
    t.set_header(header);
    for (index, r) in requests {
        let mut row = vec![Cell::new(index)];
        row.extend(columns.iter().map(|&f| Cell::new(r.get(f).unwrap_or_default())));
        t.add_row(row);
    }
    t
}

/// Query, render and submit every index in order, stopping at the first failure.
pub fn submit_all<W: Write>(
    opts: &SubmitOptions,
    target: &Target,
    indices: &ArrayRange,
    out: &mut W,
) -> Result<Vec<Submitted>> {
    if indices.is_empty() {
        tracing::warn!("array range is empty, nothing to submit");
        return Ok(vec![]);
    }
    tracing::info!(
        "{} {} job(s) of {} for indices {}",
        if opts.dry_run { "dry run:" } else { "submitting" },
        indices.len(),
        target.program,
        indices
    );

    let sbatch = if opts.dry_run {
        None
    } else {
        Some(resolve_sbatch(opts)?)
    };

    let mut prefetched = if opts.batch_query {
        Some(query_target_batch(opts, target, indices.indices())?.into_iter())
    } else {
        None
    };

    let mut submitted = Vec::with_capacity(indices.len());
    let mut requests = Vec::with_capacity(indices.len());

    for index in indices.iter() {
        let request = match prefetched.as_mut() {
            Some(it) => it
                .next()
                .ok_or_else(|| anyhow!("no resource info for index {}", index))?,
            None => query_target(opts, target, index)?,
        };

        let job_id = submit_one(opts, sbatch.as_deref(), target, index, &request, out)
            .with_context(|| format!("failed to submit index {}", index))?;
        if let Some(id) = job_id {
            tracing::info!("Submitted job {} (index {})", id, index);
        }
        submitted.push(Submitted { index, job_id });
        requests.push((index, request));
    }

    let profiles: HashSet<_> = requests.iter().map(|(_, r)| r.aggregate_key()).collect();
    tracing::info!(
        "{} distinct resource profile(s) across {} job(s)",
        profiles.len(),
        requests.len()
    );
    if opts.show_details() {
        writeln!(out, "{}", summary_table(&requests))?;
    }
    Ok(submitted)
}
