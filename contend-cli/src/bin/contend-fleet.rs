//! Contend Fleet - discrete-event simulation of a sender fleet
//!
//! Runs N reliable senders over a lossy channel model and prints the
//! delivery metrics.

use clap::Parser;
use contend::FleetSimulation;
use contend_cli::{display_simulation_report, BackoffKind, Config, SimulationConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "contend-fleet")]
#[command(about = "Simulate a fleet of reliable senders", long_about = None)]
struct Args {
    /// TOML configuration file with a [simulation] table
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of senders
    #[arg(short = 'n', long)]
    senders: Option<usize>,

    /// Messages per sender
    #[arg(short, long)]
    messages: Option<u32>,

    /// Node density
    #[arg(short, long)]
    density: Option<f64>,

    /// Mean node speed
    #[arg(short, long)]
    speed: Option<f64>,

    /// Probability that an attempt is acknowledged
    #[arg(long)]
    delivery: Option<f64>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many simulated seconds, cancelling messages in flight
    #[arg(long)]
    duration: Option<f64>,

    /// Use exponential window growth instead of uniform draws
    #[arg(long)]
    exponential: bool,

    /// Print an example configuration file and exit
    #[arg(long)]
    example_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    if args.example_config {
        print!("{}", toml::to_string_pretty(&Config::example_simulation())?);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            match Config::from_file(path)?.simulation {
                Some(simulation) => simulation,
                None => anyhow::bail!("{} has no [simulation] table", path.display()),
            }
        }
        None => SimulationConfig::default(),
    };

    if let Some(senders) = args.senders {
        config.senders = senders;
    }
    if let Some(messages) = args.messages {
        config.messages = messages;
    }
    if let Some(density) = args.density {
        config.density = density;
    }
    if let Some(speed) = args.speed {
        config.speed = speed;
    }
    if let Some(delivery) = args.delivery {
        config.delivery = delivery;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.exponential {
        config.retry.mode = BackoffKind::Exponential;
    }

    let scenario = config.to_scenario()?;
    tracing::info!(
        "Contend Fleet starting: {} senders, density {}, speed {}, seed {}",
        scenario.senders,
        scenario.density,
        scenario.speed,
        scenario.seed
    );

    let simulation = FleetSimulation::new(scenario)?;
    let report = match args.duration {
        Some(secs) => {
            let limit = Duration::try_from_secs_f64(secs)
                .map_err(|e| anyhow::anyhow!("invalid --duration {}: {}", secs, e))?;
            simulation.run_for(limit)?
        }
        None => simulation.run()?,
    };
    display_simulation_report(&report);

    if report.abandoned > 0 {
        tracing::warn!("{} messages abandoned", report.abandoned);
    }

    Ok(())
}
