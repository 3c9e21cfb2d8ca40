use clap::Parser;
use oru_slurm::submit::{submit_all, SubmitOptions, Target};
use oru_slurm::*;

mod cli;
use cli::ClArgs;

fn run(args: &ClArgs) -> Result<()> {
    let config = Config::load()?;
    let options = args.options(&config);
    let (target, indices) = args.target()?;

    let stdout = std::io::stdout();
    let submitted = submit_all(&options, &target, &indices, &mut stdout.lock())?;
    if !options.dry_run {
        tracing::info!("{} job(s) submitted", submitted.len());
    }
    Ok(())
}

fn main() {
    let args = ClArgs::parse();
    init_logging(args.verbose);
    if let Err(e) = run(&args) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
