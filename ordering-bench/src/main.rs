//! Sample Ordering Benchmark Driver
//!
//! This binary times the sample ordering pipeline, either one shuffler at a
//! time on synthetic shard layouts or end to end on a configured dataset.
//!
//! # Usage
//!
//! ```bash
//! # Time every shuffler on datasets of 2^10 to 2^20 samples
//! xtr-bench shuffle
//!
//! # Time only s1br, over 8 canonical nodes
//! xtr-bench shuffle --algo s1br --num-nodes 8
//!
//! # Time a full iteration of a configured dataset on 4 nodes of 8 ranks
//! xtr-bench iter --config order.toml --nodes 4 --ranks-per-node 8
//!
//! # Time a full iteration of a synthetic dataset of 10M samples
//! xtr-bench iter --dataset-size 10000000
//! ```

use std::time::{Duration, Instant};

use clap::{Args as ClapArgs, Parser, Subcommand};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ordering_core::config::ShufflerConfig;
use ordering_core::shuffle::ALGOS;
use ordering_core::{Dataset, OrderConfig, PhysicalTopology, Shuffler, Stream};

/// Sample Ordering Benchmark
#[derive(Parser, Debug)]
#[command(name = "xtr-bench")]
#[command(about = "Benchmarks for the sample ordering pipeline")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Time the shufflers over a range of synthetic dataset sizes
    Shuffle(ShuffleArgs),
    /// Time a full iteration of a dataset
    Iter(IterArgs),
}

#[derive(ClapArgs, Debug)]
struct ShuffleArgs {
    /// Shuffler to time (naive, s1n, s1b, s1br, s1s); all of them if unset
    #[arg(long)]
    algo: Option<String>,

    /// Number of canonical nodes
    #[arg(long, default_value = "1")]
    num_nodes: u64,

    /// Epoch to shuffle
    #[arg(long, default_value = "0")]
    epoch: u64,

    /// Smallest synthetic shard size
    #[arg(long, default_value = "5000")]
    min_shard_size: u64,

    /// Largest synthetic shard size
    #[arg(long, default_value = "10000")]
    max_shard_size: u64,

    /// Smallest dataset size, as a power of two
    #[arg(long, default_value = "10")]
    pow_min: u32,

    /// Largest dataset size, as a power of two
    #[arg(long, default_value = "20")]
    pow_max: u32,

    /// Dataset sizes per doubling
    #[arg(long, default_value = "4")]
    pow_step: u32,

    /// Stop timing a shuffler once one run takes longer than this many seconds
    #[arg(long, default_value = "10.0")]
    timeout: f64,

    /// Seed for the synthetic shard sizes
    #[arg(long, default_value = "0")]
    seed: u64,
}

#[derive(ClapArgs, Debug)]
struct IterArgs {
    /// Configuration file path; a synthetic single-stream dataset if unset
    #[arg(short, long)]
    config: Option<String>,

    /// Size of the synthetic dataset
    #[arg(long, default_value = "1048576")]
    dataset_size: u64,

    /// Smallest synthetic shard size
    #[arg(long, default_value = "5000")]
    min_shard_size: u64,

    /// Largest synthetic shard size
    #[arg(long, default_value = "10000")]
    max_shard_size: u64,

    /// Number of physical nodes
    #[arg(long, default_value = "1")]
    nodes: u64,

    /// Ranks per node
    #[arg(long, default_value = "8")]
    ranks_per_node: u64,

    /// Dataloader workers per rank
    #[arg(long, default_value = "4")]
    workers_per_rank: u64,

    /// Epoch to iterate
    #[arg(long, default_value = "0")]
    epoch: u64,

    /// Sample offset to resume the epoch from
    #[arg(long, default_value = "0")]
    sample_offset: u64,

    /// Number of epochs to time
    #[arg(long, default_value = "1")]
    epochs: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match args.command {
        Command::Shuffle(args) => bench_shufflers(&args),
        Command::Iter(args) => bench_iter(&args),
    }
}

/// Splits `dataset_size` samples into shards of random sizes in
/// `[min_shard_size, max_shard_size]`; the last shard takes what is left.
fn synthetic_shard_sizes(
    dataset_size: u64,
    min_shard_size: u64,
    max_shard_size: u64,
    rng: &mut ChaCha8Rng,
) -> Vec<u64> {
    let min_shard_size = min_shard_size.max(1);
    let max_shard_size = max_shard_size.max(min_shard_size);
    let mut sizes = Vec::new();
    let mut left = dataset_size;
    while left > 0 {
        let size = rng.gen_range(min_shard_size..=max_shard_size).min(left);
        sizes.push(size);
        left -= size;
    }
    sizes
}

fn bench_shufflers(args: &ShuffleArgs) -> Result<(), Box<dyn std::error::Error>> {
    let algos: Vec<&str> = match &args.algo {
        Some(algo) => vec![algo.as_str()],
        None => ALGOS.to_vec(),
    };
    let pow_step = args.pow_step.max(1);
    let timeout = Duration::from_secs_f64(args.timeout.max(0.0));

    tracing::info!("Timing shufflers");
    tracing::info!("  Algorithms: {}", algos.join(", "));
    tracing::info!("  Canonical nodes: {}", args.num_nodes);
    tracing::info!("  Dataset sizes: 2^{} to 2^{}", args.pow_min, args.pow_max);

    println!("{:>6} {:>12} {:>8} {:>12}", "algo", "samples", "shards", "seconds");
    for algo in algos {
        let shuffler = Shuffler::from_config(&ShufflerConfig {
            algo: algo.to_string(),
            ..Default::default()
        })?;
        let mut rng = ChaCha8Rng::seed_from_u64(args.seed);

        for i in args.pow_min * pow_step..=args.pow_max * pow_step {
            let exponent = f64::from(i) / f64::from(pow_step);
            let dataset_size = 2f64.powf(exponent) as u64;
            let shard_sizes = synthetic_shard_sizes(
                dataset_size,
                args.min_shard_size,
                args.max_shard_size,
                &mut rng,
            );

            let start = Instant::now();
            let ids = shuffler.shuffle(&shard_sizes, args.num_nodes, args.epoch)?;
            let elapsed = start.elapsed();

            println!(
                "{:>6} {:>12} {:>8} {:>12.6}",
                algo,
                ids.len(),
                shard_sizes.len(),
                elapsed.as_secs_f64()
            );

            if elapsed > timeout {
                tracing::warn!(
                    "{} took {:.3}s on {} samples, skipping larger sizes",
                    algo,
                    elapsed.as_secs_f64(),
                    dataset_size
                );
                break;
            }
        }
    }

    Ok(())
}

fn bench_iter(args: &IterArgs) -> Result<(), Box<dyn std::error::Error>> {
    let dataset = match &args.config {
        Some(path) => Dataset::from_config_file(path)?,
        None => {
            let mut config = OrderConfig::default().with_env_overrides();
            config.stream.local = Some("synthetic".to_string());
            let mut rng = ChaCha8Rng::seed_from_u64(config.sampler.seed);
            let shard_sizes = synthetic_shard_sizes(
                args.dataset_size,
                args.min_shard_size,
                args.max_shard_size,
                &mut rng,
            );
            let source =
                move |_: &Stream| -> ordering_core::Result<Vec<u64>> { Ok(shard_sizes.clone()) };
            Dataset::with_source(config, &source)?
        }
    };
    let physical = PhysicalTopology::new(args.nodes, args.ranks_per_node, args.workers_per_rank);

    tracing::info!("Timing iteration");
    tracing::info!("  Streams: {}", dataset.streams().len());
    tracing::info!("  Shards: {}", dataset.num_shards());
    tracing::info!("  Samples: {}", dataset.num_samples());
    tracing::info!("  Epoch size: {}", dataset.epoch_size());
    tracing::info!("  Topology: {:?}", physical);

    println!(
        "{:>6} {:>10} {:>10} {:>10} {:>10} {:>10} {:>12}",
        "epoch", "sample", "determine", "shuffle", "map", "total", "shape"
    );
    for epoch in args.epoch..args.epoch + args.epochs.max(1) {
        let (tensor, timings) = dataset.bench(epoch, &physical, args.sample_offset)?;
        println!(
            "{:>6} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>12}",
            epoch,
            timings.sample.as_secs_f64(),
            timings.determine.as_secs_f64(),
            timings.shuffle.as_secs_f64(),
            timings.map.as_secs_f64(),
            timings.total.as_secs_f64(),
            format!("{:?}", tensor.shape()),
        );
    }

    Ok(())
}
