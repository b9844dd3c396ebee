use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use genpoi::config::Config;
use genpoi::filter::FilterRegistry;
use genpoi::pipeline::Pipeline;
use genpoi::players::{NameResolver, OfflineResolver, SessionServerResolver};

#[derive(Parser, Debug, Clone)]
#[command(name = "genpoi", version, about = "Generate map marker scripts from world POIs")]
struct Args {
    /// Path to the TOML run configuration.
    #[arg(short, long)]
    config: PathBuf,

    /// Log less; repeat to only show errors.
    #[arg(short, long, action = clap::ArgAction::Count)]
    quiet: u8,

    /// Skip chunk scanning; only manual and player POIs are used.
    #[arg(long, default_value_t = false)]
    skip_scan: bool,

    /// Do not look player names up online.
    #[arg(long, default_value_t = false)]
    offline: bool,
}

fn run(args: &Args) -> Result<()> {
    let started = Instant::now();

    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let filters = FilterRegistry::from_config(&config.filters);

    let resolver: Box<dyn NameResolver> = if args.offline {
        Box::new(OfflineResolver)
    } else {
        Box::new(SessionServerResolver::new().context("creating name lookup client")?)
    };

    let summary = Pipeline::new(&config, filters, resolver)
        .skip_scan(args.skip_scan)
        .run()?;

    info!(
        "Done: {} POIs into {} marker sets ({} records) in {:.1}s",
        summary.pois_classified,
        summary.marker_sets,
        summary.records,
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.quiet {
        0 => "info",
        1 => "warn",
        _ => "error",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
