//! CA3 sequence-learning binary.
//!
//! Trains a network on a stuttered, overlapping input sequence, then tests
//! recall from the first pattern. Writes the firing dumps of the run and
//! JSONL per-trial metrics.

use ca3net::record::{FiringFiles, ALL_STEPS_FILE};
use ca3net::{run_protocol, Network, Phase, RunConfig};
use clap::Parser;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::error::Error;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(
    name = "ca3-train",
    about = "Train a CA3 recurrent network on a sequence and test recall"
)]
struct Args {
    /// YAML run file (network and protocol parameters)
    #[arg(long, default_value = "levy.yaml")]
    config: PathBuf,

    /// Directory receiving the firing dumps
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Per-trial metrics file (JSONL)
    #[arg(long)]
    metrics_file: Option<PathBuf>,

    /// Seed for wiring, tie-breaks, initial firing and noise (random when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Override the number of training trials
    #[arg(long)]
    training_trials: Option<usize>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let started = Instant::now();

    let mut run = RunConfig::load(&args.config)?;
    if let Some(trials) = args.training_trials {
        run.protocol.training_trials = trials;
    }
    run.validate()?;

    let seed = args.seed.unwrap_or_else(rand::random);
    info!("CA3 sequence training");
    info!("  Run file: {}", args.config.display());
    info!("  Seed: {}", seed);
    info!(
        "  Network: n={} a={} K0={} Ki={} Kr={} w0={} synmodrate={} competitive={}",
        run.network.num_neurons,
        run.network.desired_activity,
        run.network.k0,
        run.network.ki,
        run.network.kr,
        run.network.w0,
        run.network.learning_rate,
        run.network.is_competitive
    );
    info!(
        "  Sequence: {} patterns of {} neurons, spacing {}, stutter {}",
        run.protocol.sequence_length,
        run.protocol.pattern_size,
        run.protocol.spacing,
        run.protocol.stutter
    );
    if run.protocol.training_trials <= run.protocol.early_trial_to_save {
        warn!(
            "earlyTrialToSave={} is past the last training trial; earlytrain dump will be empty",
            run.protocol.early_trial_to_save
        );
    }

    fs::create_dir_all(&args.output_dir)?;

    let mut net = Network::seeded(run.network.clone(), seed)?;
    let mut protocol_rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    let mut files = FiringFiles::create(&args.output_dir, &run.protocol)?;

    let metrics = run_protocol(&mut net, &run.protocol, &mut protocol_rng, &mut files)?;
    files.flush()?;

    if let Some(path) = &args.metrics_file {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(path)?);
        for m in &metrics {
            let event = serde_json::json!({
                "type": "trial",
                "phase": m.phase,
                "trial": m.trial,
                "mean_activity": m.mean_activity,
                "max_activity": m.max_activity,
                "mean_weight": m.mean_weight,
            });
            writeln!(out, "{}", event)?;
        }
        out.flush()?;
        info!("  Metrics: {}", path.display());
    }

    let final_test = metrics.iter().rev().find(|m| m.phase == Phase::Testing);
    if let Some(m) = final_test {
        info!(
            "Final test trial: activity {:.2}%, mean weight {:.4}",
            100.0 * m.mean_activity,
            m.mean_weight
        );
    }

    let (all, ..) = files.line_counts();
    info!(
        "Wrote {} steps to {}",
        all,
        args.output_dir.join(ALL_STEPS_FILE).display()
    );
    println!(
        "Total run time: {:.3} seconds.",
        started.elapsed().as_secs_f64()
    );
    Ok(())
}
