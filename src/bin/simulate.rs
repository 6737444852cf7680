//! Free-running CA3 network.
//!
//! Clamps the first `ceil(n * a)` neurons on for one step, then lets the
//! network run on recurrent activity alone, printing one firing line per
//! step on stdout.

use ca3net::record::FiringWriter;
use ca3net::{free_run, initial_cue, Network, RunConfig};
use clap::Parser;
use log::info;
use std::error::Error;
use std::io::{self, BufWriter};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "ca3-simulate",
    about = "Cue a CA3 network once and print its free-running firing"
)]
struct Args {
    /// YAML run file; only the network section is used
    #[arg(long, default_value = "levy.yaml")]
    config: PathBuf,

    /// Seed for wiring and tie-breaks (random when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Free-running steps after the cue
    #[arg(long, default_value_t = 100)]
    steps: usize,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let network = RunConfig::load_network(&args.config)?;
    let seed = args.seed.unwrap_or_else(rand::random);
    info!("Initializing network (seed {})", seed);
    let mut net = Network::seeded(network, seed)?;

    let n = net.num_neurons();
    let cue = initial_cue(n, net.config().desired_activity);
    info!(
        "Activating {} neurons for the initial cue",
        cue.iter().filter(|&&on| on).count()
    );

    let stdout = io::stdout();
    let mut writer = FiringWriter::new(BufWriter::new(stdout.lock()));
    let summary = free_run(&mut net, &cue, args.steps, &mut writer)?;
    writer.flush()?;

    info!(
        "Mean activity {:.2}%, peak {:.2}%",
        100.0 * summary.mean_activity,
        100.0 * summary.max_activity
    );
    Ok(())
}
