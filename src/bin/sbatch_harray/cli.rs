use super::*;

/// Submit one Slurm job per array index, asking TARGET for each job's resources.
#[derive(Parser, Debug, Clone)]
#[clap(version, trailing_var_arg(true))]
pub struct ClArgs {
    /// Print the sbatch command line and job script of every job.
    #[clap(short, long)]
    pub verbose: bool,

    /// Query the target and render job scripts, but do not submit anything.
    #[clap(long)]
    pub dry_run: bool,

    /// Resource profile passed to the target as --slurmprofile.
    #[clap(long, value_enum, default_value_t)]
    pub profile: SlurmProfile,

    /// Query resources for all indices with one --p-slurminfo call to the target.
    #[clap(long)]
    pub batch_query: bool,

    /// Submission executable [default: from config, or sbatch]
    #[clap(long)]
    pub sbatch: Option<String>,

    /// Program used to run TARGET, eg python3 [default: from config, or none]
    #[clap(long)]
    pub interpreter: Option<String>,

    /// TARGET [TARGET_ARGS...] ARRAY_RANGE
    #[clap(
        required(true),
        min_values(2),
        allow_hyphen_values(true),
        value_name = "COMMAND"
    )]
    pub command: Vec<String>,
}

impl ClArgs {
    pub fn options(&self, config: &Config) -> SubmitOptions {
        let mut o = SubmitOptions::from_config(config);
        o.dry_run = self.dry_run;
        o.verbose = self.verbose;
        o.profile = self.profile;
        o.batch_query = self.batch_query;
        if let Some(s) = &self.sbatch {
            o.sbatch = s.clone();
        }
        if self.interpreter.is_some() {
            o.interpreter = self.interpreter.clone();
        }
        o
    }

    /// Split the trailing command into the target and the array range.
    pub fn target(&self) -> Result<(Target, ArrayRange)> {
        let (range, rest) = self
            .command
            .split_last()
            .ok_or_else(|| anyhow!("missing ARRAY_RANGE"))?;
        let (program, args) = rest
            .split_first()
            .ok_or_else(|| anyhow!("missing TARGET"))?;
        let indices: ArrayRange = range
            .parse()
            .with_context(|| format!("invalid array range {:?}", range))?;
        Ok((Target::new(program.as_str(), args.to_vec()), indices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ClArgs {
        ClArgs::try_parse_from(std::iter::once("sbatch-harray").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn target_and_range() {
        let cl = parse(&["-v", "--dry-run", "run.py", "--seed", "3", "0-4:2"]);
        assert!(cl.verbose && cl.dry_run);
        let (target, indices) = cl.target().unwrap();
        assert_eq!(target.program, "run.py");
        assert_eq!(target.args, ["--seed", "3"]);
        assert_eq!(indices.indices(), [0, 2, 4]);
    }

    #[test]
    fn options_override_config() {
        let cl = parse(&["--profile", "test", "--interpreter", "python3", "run.py", "1"]);
        let config = Config {
            sbatch: "/opt/slurm/bin/sbatch".to_string(),
            interpreter: Some("python2".to_string()),
            ..Config::default()
        };
        let o = cl.options(&config);
        assert_eq!(o.profile, SlurmProfile::Test);
        assert_eq!(o.interpreter.as_deref(), Some("python3"));
        assert_eq!(o.sbatch, "/opt/slurm/bin/sbatch");
        assert!(!o.dry_run);
    }

    #[test]
    fn bad_command_lines() {
        let prog = "sbatch-harray";
        assert!(ClArgs::try_parse_from([prog]).is_err());
        assert!(ClArgs::try_parse_from([prog, "run.py"]).is_err());
        assert!(parse(&["run.py", "1-x"]).target().is_err());
    }
}
