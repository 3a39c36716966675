use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

use autoseq::contracts::SequenceGenerator;
use autoseq::generator::{CounterSequenceGenerator, SequenceOptions, SequenceSettings};
use autoseq::storage::{DetectedApi, RetryConfig, RocksDbDatabase};

#[derive(StructOpt, Debug)]
#[structopt(name = "autoseq", about = "Issues sequence numbers from a RocksDB counter store")]
struct Opt {
    /// Sequence to increment
    sequence: String,
    /// Field the counter drives (default: AUTOSEQ_FIELD or _id)
    #[structopt(short, long)]
    field: Option<String>,
    /// Number of values to issue
    #[structopt(short = "n", long, default_value = "1")]
    count: usize,
    /// Print Prometheus metrics when done
    #[structopt(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("autoseq=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let opt = Opt::from_args();

    let data_dir = std::env::var("AUTOSEQ_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let db = RocksDbDatabase::open(&data_dir)?;

    let defaults = SequenceOptions::from_env();
    let retry = RetryConfig::from_env();
    tracing::info!(
        collection = %defaults.collection,
        field = %defaults.field,
        step = defaults.step,
        max_retries = ?retry.max_retries,
        "autoseq starting"
    );

    let generator = CounterSequenceGenerator::with_settings(
        DetectedApi::new(db),
        SequenceSettings::with_defaults(defaults)?,
    )
    .with_retry(retry);

    for _ in 0..opt.count {
        let value = generator
            .get_next_sequence(&opt.sequence, opt.field.as_deref())
            .await?;
        println!("{}", value);
    }

    if opt.metrics {
        print!("{}", generator.metrics().format_prometheus());
    }

    Ok(())
}
