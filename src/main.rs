use clap::Parser;
use stress_test::{run_stress_test, stress_test_scaling, BoxError, StressConfig};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;


#[derive(Parser, Debug)]
#[command(name = "spacetime")]
#[command(about = "Replicas of a shared counter committing and syncing under load")]
#[command(version)]
struct Args {
    /// Number of replicas in the mesh
    #[arg(short, long, default_value_t = 4)]
    replicas: usize,

    /// Commits per replica
    #[arg(short, long, default_value_t = 50)]
    ops: usize,

    /// Random pairwise syncs run while committing
    #[arg(short, long, default_value_t = 200)]
    syncs: usize,

    /// Syncs in flight at once
    #[arg(short, long, default_value_t = 4)]
    concurrency: usize,

    /// Seed for the commit and sync pattern; random when omitted
    #[arg(long)]
    seed: Option<u64>,

    /// Also run the scaling analysis up to this many replicas
    #[arg(long)]
    scale_to: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = StressConfig {
        replicas: args.replicas,
        ops_per_replica: args.ops,
        syncs: args.syncs,
        concurrency: args.concurrency,
        seed: args.seed.unwrap_or_else(rand::random),
    };
    println!("Seed: {}", config.seed);

    run_stress_test(&config).await?.print();

    if let Some(max_replicas) = args.scale_to {
        stress_test_scaling(&config, max_replicas, 2).await?;
    }

    println!("\n✓ All stress tests completed successfully!");
    Ok(())
}
