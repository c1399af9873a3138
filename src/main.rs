use clap::Parser;
use log::{Level, error, info};
use simple_logger::init_with_level;

use single_vtest::cli::{ArgCheck, Cli, Command};
use single_vtest::pipeline::{run_filter_gtf, run_vtest};

fn main() {
    let start = std::time::Instant::now();
    let cli = Cli::parse();

    let level = if cli.verbose { Level::Debug } else { Level::Info };
    if let Err(e) = init_with_level(level) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    let result = match &cli.command {
        Command::VTest(args) => prepare(args).and_then(|_| run_vtest(args)),
        Command::FilterGtf(args) => prepare(args).and_then(|_| run_filter_gtf(args)),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }

    let elapsed = start.elapsed();
    info!("Elapsed time: {:?}", elapsed);
}

fn prepare<A: ArgCheck>(args: &A) -> anyhow::Result<()> {
    args.check()?;
    if let Some(threads) = args.threads() {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }
    Ok(())
}
