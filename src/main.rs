//! Deferlight CLI
//!
//! Small driver for exercising the engine on the bundled event loop.

use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use deferlight::iter::{ITERATIONS_KEY, SLICES_KEY, YIELDS_KEY};
use deferlight::{helpers, Engine, EngineConfig, EventLoop, IterOptions, Speed, SpeedTable, Value, VERSION};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "deferlight")]
#[command(author, version, about = "Cooperative Deferred chains and time-sliced iteration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Map over a range of numbers and report how the work was sliced
    Bench {
        /// Number of elements to map
        #[arg(long, default_value_t = 100_000)]
        items: usize,

        /// Slice interval: a preset name or milliseconds
        #[arg(long, default_value = "normal")]
        interval: Speed,

        /// Use the synchronous fast path
        #[arg(long)]
        sync: bool,

        /// Seed for the yield draw
        #[arg(long)]
        seed: Option<u64>,

        /// Speed table overrides (JSON)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Print the effective speed table as JSON
    Speeds {
        /// Speed table overrides (JSON)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Bench {
            items,
            interval,
            sync,
            seed,
            config,
        } => run_bench(items, interval, sync, seed, config),
        Commands::Speeds { config } => {
            let table = load_speeds(config)?;
            println!("{}", table.to_json()?);
            Ok(())
        }
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_speeds(config: Option<PathBuf>) -> anyhow::Result<SpeedTable> {
    match config {
        Some(path) => SpeedTable::load(&path)
            .with_context(|| format!("failed to load speed table from {}", path.display())),
        None => Ok(SpeedTable::default()),
    }
}

fn increment(v: Value, _key: Value, _src: &Value) -> deferlight::Result<Value> {
    Ok(Value::Number(v.as_number().unwrap_or(0.0) + 1.0))
}

fn run_bench(
    items: usize,
    interval: Speed,
    sync: bool,
    seed: Option<u64>,
    config: Option<PathBuf>,
) -> anyhow::Result<()> {
    let source = Value::Array((0..items).map(Value::from).collect());
    println!("deferlight {} - mapping {} items", VERSION, items);

    if sync {
        let started = Instant::now();
        let out = helpers::map(source, increment)?;
        println!("  path:     sync");
        println!("  length:   {}", out.len().unwrap_or(0));
        println!("  elapsed:  {:.2?}", started.elapsed());
        return Ok(());
    }

    let speeds = load_speeds(config)?;
    let host = Rc::new(EventLoop::new());
    let engine = Engine::with_config(
        host.clone(),
        EngineConfig {
            speeds,
            ..EngineConfig::default()
        },
    );
    let mut options = IterOptions::new().interval(interval);
    options.seed = seed;

    let started = Instant::now();
    let d = engine.map(source, options, increment);
    let run = host.run_until_idle();

    let out = match d.reply() {
        Some(Ok(out)) => out,
        Some(Err(err)) => bail!("iteration failed: {}", err),
        None => bail!("iteration did not finish"),
    };
    let stat = |key: &str| d.data(key).and_then(|v| v.as_number()).unwrap_or(0.0);
    println!("  path:       sliced ({}, {}ms)", interval, engine.speeds().interval(interval));
    println!("  length:     {}", out.len().unwrap_or(0));
    println!("  slices:     {}", stat(SLICES_KEY));
    println!("  yields:     {}", stat(YIELDS_KEY));
    println!("  iterations: {}", stat(ITERATIONS_KEY));
    println!("  host tasks: {}", run.microtasks_processed + run.macrotasks_processed);
    println!("  virtual:    {}ms", run.final_time);
    println!("  elapsed:    {:.2?}", started.elapsed());
    Ok(())
}
