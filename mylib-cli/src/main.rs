//! mylib CLI
//!
//! Loads the mylib shared library at runtime and walks through everything
//! it exports, the way a foreign host would:
//! - Greeting and dot products (array, critical and boxed-list variants)
//! - Synchronous callback delivery
//! - Counter lifecycle through opaque handles
//! - Background computation with progress from a worker thread

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

mod bindings;
mod callbacks;
mod config;
mod demos;
mod report;
mod state;

use bindings::MylibApi;
use config::AppConfig;
use demos::{Demo, DemoRunner};
use report::RunReport;

/// mylib CLI - Exercise the native bridge library over its C ABI
#[derive(Parser, Debug)]
#[command(name = "mylib-cli")]
#[command(about = "Load mylib and run its demonstration scenarios", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the mylib shared library (default: next to this executable)
    #[arg(short, long, value_name = "FILE")]
    lib: Option<PathBuf>,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Name to greet (overrides the config file)
    #[arg(short, long)]
    name: Option<String>,

    /// Run only these demos (comma separated or repeated)
    #[arg(long, value_enum, value_delimiter = ',')]
    only: Vec<Demo>,

    /// Milliseconds between async progress reports (overrides the config file)
    #[arg(long, value_name = "MS")]
    step_interval_ms: Option<u64>,

    /// Also exercise misuse: made-up handles, use after destroy, unequal lengths
    #[arg(long)]
    hazard: bool,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = log_level(args.verbose, args.quiet);
    init_logging(level);

    log::info!("mylib CLI v{}", env!("CARGO_PKG_VERSION"));

    let config = load_settings(&args)?;
    let library = match args.lib.clone().or_else(|| config.library.clone()) {
        Some(path) => path,
        None => bindings::default_library_path()?,
    };

    let api = MylibApi::load(&library)?;
    if let Err(e) = api.init_logging(level) {
        log::warn!("Library logging not initialized: {}", e);
    }

    let demos = selected_demos(&args.only);
    let runner = DemoRunner::new(&api, &config, !args.json, args.hazard);
    let mut report = RunReport::new(api.path(), api.version());

    for demo in demos {
        if !args.json {
            println!("\n── {} ───────────────────────────────", demo.title());
        }
        let result = runner.run(demo);
        if !args.json {
            match &result.error {
                None => println!("✓ {}", result.outcome.summary),
                Some(error) => println!("✗ {}", error),
            }
        }
        report.push(result);
    }
    report.finish();

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        report.print_summary();
    }

    let failures = report.failures();
    if failures > 0 {
        bail!("{} of {} demo(s) failed", failures, report.demos.len());
    }
    Ok(())
}

/// Load the config file (or defaults) and apply command line overrides
fn load_settings(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    if let Some(name) = &args.name {
        config.greeting.name = name.clone();
    }
    if let Some(interval) = args.step_interval_ms {
        config.async_computation.step_interval_ms = interval;
    }
    config.validate()?;

    log::debug!("Configuration: {:?}", config);
    Ok(config)
}

/// Demos to run in order, without duplicates; all of them by default
fn selected_demos(only: &[Demo]) -> Vec<Demo> {
    if only.is_empty() {
        return Demo::ALL.to_vec();
    }
    Demo::ALL
        .into_iter()
        .filter(|demo| only.contains(demo))
        .collect()
}

fn log_level(verbose: u8, quiet: bool) -> log::LevelFilter {
    use log::LevelFilter;

    if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

/// Initialize logging based on verbosity level
fn init_logging(level: log::LevelFilter) {
    use env_logger::Builder;
    use std::io::Write;

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
