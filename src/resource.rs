//! The closed catalog of resource fields and the per-job resource request.
use std::borrow::Cow;
use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::duration::format_duration;

/// Every resource field a target may report.  Variants are listed in the
/// order their flags are passed to `sbatch`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceField {
    Time,
    JobName,
    Name,
    MailUser,
    MailType,
    Nodes,
    Mem,
    CpusPerTask,
    Constraint,
    Script,
    Out,
    Err,
    Exclude,
    Nodelist,
}

impl ResourceField {
    pub const ALL: [ResourceField; 14] = [
        ResourceField::Time,
        ResourceField::JobName,
        ResourceField::Name,
        ResourceField::MailUser,
        ResourceField::MailType,
        ResourceField::Nodes,
        ResourceField::Mem,
        ResourceField::CpusPerTask,
        ResourceField::Constraint,
        ResourceField::Script,
        ResourceField::Out,
        ResourceField::Err,
        ResourceField::Exclude,
        ResourceField::Nodelist,
    ];

    /// Name of the field in the JSON wire format, which is also the `sbatch` long flag.
    pub const fn wire_name(self) -> &'static str {
        use ResourceField::*;
        match self {
            Time => "time",
            JobName => "job-name",
            Name => "name",
            MailUser => "mail-user",
            MailType => "mail-type",
            Nodes => "nodes",
            Mem => "mem",
            CpusPerTask => "cpus-per-task",
            Constraint => "constraint",
            Script => "script",
            Out => "out",
            Err => "err",
            Exclude => "exclude",
            Nodelist => "nodelist",
        }
    }

    pub const fn required(self) -> bool {
        matches!(
            self,
            ResourceField::Script | ResourceField::Out | ResourceField::Err
        )
    }

    /// Fields which are shared by jobs that could run as one array job.
    /// Log paths and the per-job name are unique to each job.
    pub const fn aggregatable(self) -> bool {
        !matches!(
            self,
            ResourceField::Out | ResourceField::Err | ResourceField::Name
        )
    }

    pub fn required_fields() -> impl Iterator<Item = ResourceField> {
        Self::ALL.into_iter().filter(|f| f.required())
    }
}

impl Display for ResourceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for ResourceField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        ResourceField::ALL
            .into_iter()
            .find(|f| f.wire_name() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Resource derivation policy selected by the launcher.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SlurmProfile {
    #[default]
    Default,
    /// Short, cheap runs used to check a batch before the real submission.
    Test,
    /// Follow-up runs with extra diagnostics for failed test runs.
    Trace,
}

impl SlurmProfile {
    pub const fn as_str(self) -> &'static str {
        match self {
            SlurmProfile::Default => "default",
            SlurmProfile::Test => "test",
            SlurmProfile::Trace => "trace",
        }
    }
}

impl Display for SlurmProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling hints for a single job.
///
/// Constructed by [`build_request`](crate::builder::build_request) on the
/// target side or by [`validate_and_decode`](crate::codec::validate_and_decode)
/// on the launcher side, and read-only afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceRequest {
    pub(crate) script: String,
    pub(crate) out: String,
    pub(crate) err: String,
    /// Time limit in seconds.
    pub(crate) time: Option<u64>,
    pub(crate) job_name: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) mail_user: Option<String>,
    pub(crate) mail_type: Option<String>,
    pub(crate) nodes: Option<String>,
    pub(crate) mem: Option<String>,
    pub(crate) cpus_per_task: Option<String>,
    pub(crate) constraint: Option<String>,
    pub(crate) exclude: Option<String>,
    pub(crate) nodelist: Option<String>,
}

impl ResourceRequest {
    pub(crate) fn with_required(script: String, out: String, err: String) -> Self {
        ResourceRequest {
            script,
            out,
            err,
            time: None,
            job_name: None,
            name: None,
            mail_user: None,
            mail_type: None,
            nodes: None,
            mem: None,
            cpus_per_task: None,
            constraint: None,
            exclude: None,
            nodelist: None,
        }
    }

    /// Drop fields that have no effect, so that stored and encoded state agree.
    pub(crate) fn normalize(mut self) -> Self {
        if self.mail_user.is_none() {
            self.mail_type = None;
        }
        self
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn time(&self) -> Option<u64> {
        self.time
    }

    /// The time limit in `D-HH:MM:SS` form.
    pub fn time_limit(&self) -> Option<String> {
        self.time.map(format_duration)
    }

    pub(crate) fn slot_mut(&mut self, field: ResourceField) -> Option<&mut Option<String>> {
        use ResourceField::*;
        match field {
            JobName => Some(&mut self.job_name),
            Name => Some(&mut self.name),
            MailUser => Some(&mut self.mail_user),
            MailType => Some(&mut self.mail_type),
            Nodes => Some(&mut self.nodes),
            Mem => Some(&mut self.mem),
            CpusPerTask => Some(&mut self.cpus_per_task),
            Constraint => Some(&mut self.constraint),
            Exclude => Some(&mut self.exclude),
            Nodelist => Some(&mut self.nodelist),
            Time | Script | Out | Err => None,
        }
    }

    /// The value of `field` as it appears on the wire, or `None` if absent.
    ///
    /// `mail-type` is reported absent whenever `mail-user` is, since it has
    /// no effect without a recipient.
    pub fn get(&self, field: ResourceField) -> Option<Cow<'_, str>> {
        use ResourceField::*;
        fn opt(v: &Option<String>) -> Option<Cow<'_, str>> {
            v.as_deref().map(Cow::Borrowed)
        }
        match field {
            Time => self.time_limit().map(Cow::Owned),
            Script => Some(Cow::Borrowed(&self.script)),
            Out => Some(Cow::Borrowed(&self.out)),
            Err => Some(Cow::Borrowed(&self.err)),
            JobName => opt(&self.job_name),
            Name => opt(&self.name),
            MailUser => opt(&self.mail_user),
            MailType => self.mail_user.as_ref().and(opt(&self.mail_type)),
            Nodes => opt(&self.nodes),
            Mem => opt(&self.mem),
            CpusPerTask => opt(&self.cpus_per_task),
            Constraint => opt(&self.constraint),
            Exclude => opt(&self.exclude),
            Nodelist => opt(&self.nodelist),
        }
    }

    /// All present fields, in catalog order.
    pub fn fields(&self) -> impl Iterator<Item = (ResourceField, Cow<'_, str>)> + '_ {
        ResourceField::ALL
            .into_iter()
            .filter_map(move |f| self.get(f).map(|v| (f, v)))
    }

    /// The aggregatable subset of this request, used to compare jobs within a batch.
    pub fn aggregate_key(&self) -> Vec<(ResourceField, String)> {
        self.fields()
            .filter(|(f, _)| f.aggregatable())
            .map(|(f, v)| (f, v.into_owned()))
            .collect()
    }

    /// Append `--field value` pairs for every field except the script body.
    pub fn extend_sbatch_args(&self, sbatch_args: &mut Vec<String>) {
        // Exhaustive so that a new field cannot be silently left out.
        let ResourceRequest {
            script: _,
            out: _,
            err: _,
            time: _,
            job_name: _,
            name: _,
            mail_user: _,
            mail_type: _,
            nodes: _,
            mem: _,
            cpus_per_task: _,
            constraint: _,
            exclude: _,
            nodelist: _,
        } = self;

        for (field, value) in self.fields() {
            if field == ResourceField::Script {
                continue;
            }
            sbatch_args.push(format!("--{}", field));
            sbatch_args.push(value.into_owned());
        }
    }
}
