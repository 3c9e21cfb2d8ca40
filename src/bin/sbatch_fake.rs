//! Stand-in for `sbatch` on machines without Slurm.  Checks the job script
//! and the resource flags `sbatch-harray` passes, then prints a fake job id.
use std::time::SystemTime;

use clap::Parser;
use oru_slurm::*;

#[derive(Parser, Debug)]
#[clap(version, trailing_var_arg(true))]
struct Args {
    #[clap(long, short = 't')]
    time: Option<String>,

    #[clap(long, short = 'J')]
    job_name: Option<String>,

    #[clap(long)]
    name: Option<String>,

    #[clap(long)]
    mail_user: Option<String>,

    #[clap(long)]
    mail_type: Option<String>,

    #[clap(long, short = 'N')]
    nodes: Option<String>,

    #[clap(long)]
    mem: Option<String>,

    #[clap(long, short = 'c')]
    cpus_per_task: Option<String>,

    #[clap(long, short = 'C')]
    constraint: Option<String>,

    #[clap(long, short = 'o', alias = "output")]
    out: Option<String>,

    #[clap(long, short = 'e', alias = "error")]
    err: Option<String>,

    #[clap(long, short = 'x')]
    exclude: Option<String>,

    #[clap(long, short = 'w')]
    nodelist: Option<String>,

    #[clap(long)]
    parsable: bool,

    #[clap(long)]
    test_only: bool,

    script: String,
    script_args: Vec<String>,
}

fn get_fake_id() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

fn check_script(script: &str) -> Result<()> {
    if script.is_empty() {
        bail!("Batch script is empty!")
    }
    if script.chars().all(char::is_whitespace) {
        bail!("Batch script contains only whitespace!")
    }
    if !script.starts_with("#!") {
        bail!("This does not look like a batch script.  The first line must start with #! followed by the path to an interpreter")
    }
    Ok(())
}

fn check_args(args: &Args) -> Result<()> {
    if let Some(t) = &args.time {
        parse_duration(t).with_context(|| format!("invalid --time {:?}", t))?;
    }
    for (flag, v) in [("--nodes", &args.nodes), ("--cpus-per-task", &args.cpus_per_task)] {
        if let Some(v) = v {
            v.parse::<u32>()
                .with_context(|| format!("invalid {} {:?}", flag, v))?;
        }
    }
    if args.mail_type.is_some() && args.mail_user.is_none() {
        tracing::warn!("--mail-type given without --mail-user");
    }
    Ok(())
}

fn main() -> Result<()> {
    init_logging(false);
    let args = Args::parse();
    check_args(&args)?;
    let script = std::fs::read_to_string(&args.script).context_read(&args.script)?;
    check_script(&script)?;

    let id = get_fake_id();
    if args.test_only {
        eprintln!("sbatch: Job {} to start at now using 1 processors on nodes fake", id);
    } else if args.parsable {
        println!("{};fake", id);
    } else {
        println!("Submitted batch job {}", id);
    }
    Ok(())
}
