#![deny(unsafe_op_in_unsafe_fn)]

use std::io::{stdout, Write};

use anyhow::Context;
use clap::Parser;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use eviction_ring::{shuffle::shuffle, EvictionRing};
use prime_probe::stats::{aggregate, RunReport};
use prime_probe::{run_rounds, MeasurementConfig};

/// Per-set Prime+Probe latency measurement.
///
/// Builds a page-aligned eviction ring covering every cache set,
/// shuffles its traversal order, then reports the trimmed mean and
/// standard deviation of the probe latency for each set.
#[derive(Parser, Debug)]
#[command(name = "prime_probe")]
struct Args {
    /// Number of cache sets (S)
    #[arg(long, default_value_t = 80)]
    sets: usize,

    /// Associativity, lines per set (W)
    #[arg(long, default_value_t = 8)]
    ways: usize,

    /// Cache line size in bytes
    #[arg(long, default_value_t = 64)]
    line_size: usize,

    /// Measurement rounds (N)
    #[arg(long, default_value_t = 1000)]
    rounds: usize,

    /// High-latency samples discarded per set (K)
    #[arg(long, default_value_t = 200)]
    trim: usize,

    /// Shuffle seed; random when absent
    #[arg(long)]
    seed: Option<u64>,

    /// Busy-wait this many cycles before measuring so CPU clocking
    /// settles
    #[arg(long, default_value_t = 1_000_000_000)]
    warm_up_cycles: u64,

    /// Emit the report as JSON instead of text
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    run(&args)
}

#[cfg(target_arch = "x86_64")]
fn run(args: &Args) -> anyhow::Result<()> {
    let config = MeasurementConfig {
        sets: args.sets,
        ways: args.ways,
        line_size: args.line_size,
        rounds: args.rounds,
        trim: args.trim,
    };
    config.validate()?;

    let mut ring = EvictionRing::build(config.geometry()).context("building the eviction ring")?;

    let mut rng = match args.seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_entropy(),
    };
    shuffle(&mut ring, &mut rng);

    cache_timing::warm_up(args.warm_up_cycles);

    let mut clock = cache_timing::RdtscClock;
    let matrix = run_rounds(&mut ring, &mut clock, config.rounds);

    let report = RunReport {
        sets: config.sets,
        ways: config.ways,
        rounds: config.rounds,
        trimmed: config.trim,
        stats: aggregate(&matrix, config.trim),
    };

    let out = stdout();
    let mut out = out.lock();
    if args.json {
        serde_json::to_writer_pretty(&mut out, &report).context("serializing the report")?;
        writeln!(out)?;
    } else {
        report.write_text(&mut out).context("writing the report")?;
    }
    Ok(())
}

#[cfg(not(target_arch = "x86_64"))]
fn run(_args: &Args) -> anyhow::Result<()> {
    anyhow::bail!("the probe needs the x86_64 timestamp counter and cpuid serialization")
}
