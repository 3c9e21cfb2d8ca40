//! Deriving a [`ResourceRequest`] for one job from an experiment's resource policy.
use std::path::PathBuf;

use crate::error::UnimplementedResourceError;
use crate::experiment::ExperimentDescriptor;
use crate::resource::{ResourceField, ResourceRequest, SlurmProfile};
use crate::{Context, Result};

/// Everything a policy may consult when choosing resources for one job.
#[derive(Clone, Copy, Debug)]
pub struct JobContext<'a> {
    pub index: usize,
    pub profile: SlurmProfile,
    pub descriptor: Option<&'a ExperimentDescriptor>,
}

impl<'a> JobContext<'a> {
    pub fn new(index: usize, profile: SlurmProfile) -> Self {
        JobContext {
            index,
            profile,
            descriptor: None,
        }
    }

    /// Context for a descriptor, taking the job index from its `index` input.
    pub fn from_descriptor(descriptor: &'a ExperimentDescriptor, profile: SlurmProfile) -> Option<Self> {
        Some(JobContext {
            index: descriptor.index()?,
            profile,
            descriptor: Some(descriptor),
        })
    }
}

/// Slurm job name with the scheduler's job id left for Slurm to fill in.
pub fn standard_job_name(index: usize) -> String {
    format!("%j-{}", index)
}

/// Per-field resource choices for an experiment.  Every method has a
/// default; at minimum [`script`](ResourcePolicy::script) must be provided.
pub trait ResourcePolicy {
    /// Time limit in seconds.
    fn time(&self, _ctx: &JobContext<'_>) -> Option<u64> {
        None
    }

    fn job_name(&self, ctx: &JobContext<'_>) -> Option<String> {
        Some(standard_job_name(ctx.index))
    }

    fn name(&self, _ctx: &JobContext<'_>) -> Option<String> {
        None
    }

    fn mail_user(&self, _ctx: &JobContext<'_>) -> Option<String> {
        None
    }

    fn mail_type(&self, _ctx: &JobContext<'_>) -> Option<String> {
        Some("FAIL".to_string())
    }

    fn nodes(&self, _ctx: &JobContext<'_>) -> Option<String> {
        Some("1".to_string())
    }

    /// Memory in Slurm's notation, eg `4G` or `2000` (megabytes).
    fn mem(&self, _ctx: &JobContext<'_>) -> Option<String> {
        None
    }

    fn cpus_per_task(&self, _ctx: &JobContext<'_>) -> Option<String> {
        None
    }

    fn constraint(&self, _ctx: &JobContext<'_>) -> Option<String> {
        None
    }

    fn exclude(&self, _ctx: &JobContext<'_>) -> Option<String> {
        None
    }

    fn nodelist(&self, _ctx: &JobContext<'_>) -> Option<String> {
        None
    }

    /// Directory for log files of jobs without a descriptor.
    fn log_directory(&self, _ctx: &JobContext<'_>) -> PathBuf {
        PathBuf::from(".")
    }

    /// Path of the job's stdout log.  Fails if the results directory cannot be created.
    fn out(&self, ctx: &JobContext<'_>) -> Result<Option<String>> {
        default_log_path(self, ctx, ".out")
    }

    fn err(&self, ctx: &JobContext<'_>) -> Result<Option<String>> {
        default_log_path(self, ctx, ".err")
    }

    /// Body of the batch script.  May contain the `{python_script}`,
    /// `{job_index}` and `{time_limit}` placeholders.
    fn script(&self, _ctx: &JobContext<'_>) -> Option<String> {
        None
    }
}

/// Logs go into the descriptor's results directory when there is one,
/// otherwise into the policy's log directory, named after the job.
fn default_log_path<P: ResourcePolicy + ?Sized>(
    policy: &P,
    ctx: &JobContext<'_>,
    suffix: &str,
) -> Result<Option<String>> {
    let path = match ctx.descriptor {
        Some(d) => d
            .get_output_path(suffix)
            .with_context(|| format!("cannot place {} log of index {}", suffix, ctx.index))?,
        None => {
            let name = policy
                .job_name(ctx)
                .unwrap_or_else(|| standard_job_name(ctx.index));
            policy
                .log_directory(ctx)
                .join(format!("{}{}", name, suffix))
        }
    };
    Ok(Some(path.to_string_lossy().into_owned()))
}

/// Query every field of `policy` and assemble the request.
///
/// A required field resolving to nothing is an [`UnimplementedResourceError`];
/// I/O failures while placing log files are passed through.
pub fn build_request<P: ResourcePolicy + ?Sized>(
    policy: &P,
    ctx: &JobContext<'_>,
) -> Result<ResourceRequest> {
    let required = |v: Option<String>, f: ResourceField| {
        v.ok_or(UnimplementedResourceError(f.wire_name()))
    };
    let script = required(policy.script(ctx), ResourceField::Script)?;
    let out = required(policy.out(ctx)?, ResourceField::Out)?;
    let err = required(policy.err(ctx)?, ResourceField::Err)?;

    let mut r = ResourceRequest::with_required(script, out, err);
    r.time = policy.time(ctx);
    r.job_name = policy.job_name(ctx);
    r.name = policy.name(ctx);
    r.mail_user = policy.mail_user(ctx);
    r.mail_type = policy.mail_type(ctx);
    r.nodes = policy.nodes(ctx);
    r.mem = policy.mem(ctx);
    r.cpus_per_task = policy.cpus_per_task(ctx);
    r.constraint = policy.constraint(ctx);
    r.exclude = policy.exclude(ctx);
    r.nodelist = policy.nodelist(ctx);

    tracing::trace!(index = ctx.index, profile = %ctx.profile, "built resource request");
    Ok(r.normalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode, to_json_string, validate_and_decode};
    use crate::experiment::{Experiment, ExperimentFields, ExperimentSchema};
    use crate::schema::{FieldSpec, FieldType, Schema};
    use serde_json::json;
    use std::path::Path;

    struct ScriptOnly;

    impl ResourcePolicy for ScriptOnly {
        fn script(&self, _: &JobContext<'_>) -> Option<String> {
            Some("#!/bin/bash\npython {python_script} {job_index}\n".to_string())
        }
    }

    struct NoScript;
    impl ResourcePolicy for NoScript {}

    struct NoLogs;
    impl ResourcePolicy for NoLogs {
        fn script(&self, _: &JobContext<'_>) -> Option<String> {
            Some(String::new())
        }
        fn err(&self, _: &JobContext<'_>) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[test]
    fn defaults() {
        let r = build_request(&ScriptOnly, &JobContext::new(3, SlurmProfile::Default)).unwrap();
        assert_eq!(
            encode(&r),
            json!({
                "script": "#!/bin/bash\npython {python_script} {job_index}\n",
                "job-name": "%j-3",
                "nodes": "1",
                "out": "./%j-3.out",
                "err": "./%j-3.err"
            })
        );
        assert_eq!(r.get(ResourceField::MailType), None);
        assert_eq!(r.mail_type, None);
        assert_eq!(validate_and_decode(&to_json_string(&r)).unwrap(), r);
    }

    fn unimplemented_field(policy: &dyn ResourcePolicy) -> Option<&'static str> {
        let err = build_request(policy, &JobContext::new(0, SlurmProfile::Default)).unwrap_err();
        err.downcast_ref::<UnimplementedResourceError>().map(|e| e.0)
    }

    #[test]
    fn missing_required_fields() {
        assert_eq!(unimplemented_field(&NoScript), Some("script"));
        assert_eq!(unimplemented_field(&NoLogs), Some("err"));
    }

    struct Solve {
        schema: ExperimentSchema,
        root: PathBuf,
    }

    impl Experiment for Solve {
        fn schema(&self) -> &ExperimentSchema {
            &self.schema
        }
        fn results_root(&self) -> &Path {
            &self.root
        }
    }

    impl ResourcePolicy for Solve {
        fn time(&self, ctx: &JobContext<'_>) -> Option<u64> {
            match ctx.profile {
                SlurmProfile::Test => Some(60),
                _ => Some(2 * 3600),
            }
        }
        fn mem(&self, ctx: &JobContext<'_>) -> Option<String> {
            let threads = ctx.descriptor?.parameter("threads")?.as_u64()?;
            Some(format!("{}G", 2 * threads))
        }
        fn mail_user(&self, _: &JobContext<'_>) -> Option<String> {
            Some("me@example.com".to_string())
        }
        fn script(&self, _: &JobContext<'_>) -> Option<String> {
            Some("#!/bin/bash\n".to_string())
        }
    }

    #[test]
    fn descriptor_driven_policy() {
        let tmp = tempfile::tempdir().unwrap();
        let solve = Solve {
            schema: ExperimentSchema {
                inputs: Schema::new([FieldSpec::new("index", FieldType::Integer)]),
                parameters: Schema::new([FieldSpec::new("threads", FieldType::Integer)]),
                ..Default::default()
            },
            root: tmp.path().to_path_buf(),
        };
        let fields: ExperimentFields =
            serde_json::from_value(json!({"inputs": {"index": 5}, "parameters": {"threads": 4}}))
                .unwrap();
        let d = ExperimentDescriptor::new(&solve, fields).unwrap();

        let ctx = JobContext::from_descriptor(&d, SlurmProfile::Test).unwrap();
        assert_eq!(ctx.index, 5);
        let r = build_request(&solve, &ctx).unwrap();
        assert_eq!(r.time_limit().as_deref(), Some("0-00:01:00"));
        assert_eq!(r.get(ResourceField::Mem).as_deref(), Some("8G"));
        assert_eq!(r.get(ResourceField::MailType).as_deref(), Some("FAIL"));
        let out = d.get_output_path(".out").unwrap();
        assert_eq!(r.get(ResourceField::Out).as_deref(), out.to_str());

        let ctx = JobContext::new(5, SlurmProfile::Default);
        let r = build_request(&solve, &ctx).unwrap();
        assert_eq!(r.time(), Some(7200));
        assert_eq!(r.get(ResourceField::Mem), None);
    }

    #[test]
    fn uncreatable_results_directory_is_an_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-directory");
        std::fs::write(&blocker, "").unwrap();
        let solve = Solve {
            schema: ExperimentSchema {
                inputs: Schema::new([FieldSpec::new("index", FieldType::Integer)]),
                ..Default::default()
            },
            root: blocker,
        };
        let fields: ExperimentFields = serde_json::from_value(json!({"inputs": {"index": 1}})).unwrap();
        let d = ExperimentDescriptor::new(&solve, fields).unwrap();

        let ctx = JobContext::from_descriptor(&d, SlurmProfile::Default).unwrap();
        let err = build_request(&solve, &ctx).unwrap_err();
        assert!(err.downcast_ref::<UnimplementedResourceError>().is_none());
        let msg = format!("{:#}", err);
        assert!(msg.contains("cannot place .out log of index 1"), "{}", msg);
        assert!(msg.contains("failed to create results directory"), "{}", msg);
    }
}
