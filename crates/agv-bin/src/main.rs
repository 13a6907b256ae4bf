//! agvsim entrypoint: load the input bundle, run every floor to
//! completion, leave two CSV logs behind.

use anyhow::{Context, Result};
use clap::Parser;
use core_config::SimConfig;
use core_engine::{SimInput, SimulationEngine};
use core_events::CsvSink;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Once;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "agvsim", version, about = "Multi-floor AGV warehouse replay simulator")]
struct Args {
    /// Path to the prepared simulation input bundle (JSON).
    pub input: PathBuf,
    /// Directory for simulation_events.csv / simulation_kpi.csv.
    #[arg(long = "log-dir", default_value = "logs")]
    pub log_dir: PathBuf,
    /// Configuration file path (overrides discovery of `agvsim.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// RNG seed override (reruns with the same seed and input are
    /// bit-identical).
    #[arg(long = "seed")]
    pub seed: Option<u64>,
}

fn configure_logging() -> Option<WorkerGuard> {
    let file_appender = tracing_appender::rolling::never(Path::new("."), "agvsim.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    match tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(writer)
        .try_init()
    {
        Ok(()) => Some(guard),
        // A subscriber is already installed (tests); drop the guard so the
        // writer thread shuts down.
        Err(_) => None,
    }
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(target: "runtime.panic", ?info, "panic");
            default_panic(info);
        }));
    });
}

fn run(args: Args) -> Result<()> {
    let mut config: SimConfig = core_config::load_from(args.config.clone())?;
    if let Some(seed) = args.seed {
        config.engine.seed = seed;
    }

    let input = SimInput::load(&args.input)
        .with_context(|| format!("loading input bundle {}", args.input.display()))?;
    let sink = CsvSink::create(&args.log_dir)?;

    info!(
        target: "runtime",
        input = %args.input.display(),
        log_dir = %args.log_dir.display(),
        seed = config.engine.seed,
        floors = input.floors.len(),
        "startup"
    );

    let mut engine = SimulationEngine::new(&input, config, sink)?;
    let summary = engine.run()?;
    engine.into_sink().finish()?;

    info!(
        target: "runtime",
        completed = summary.completed_tasks,
        teleports = summary.force_teleports,
        "simulation complete"
    );
    Ok(())
}

fn main() -> ExitCode {
    let _log_guard = configure_logging();
    install_panic_hook();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(target: "runtime", error = %format!("{err:#}"), "fatal");
            eprintln!("agvsim: {err:#}");
            ExitCode::FAILURE
        }
    }
}
