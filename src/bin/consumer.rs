use std::sync::Arc;

use clap::Parser;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use checkin_consumer::consumer::{CheckInProcessor, ProcessorSettings};
use checkin_consumer::db::schema::create_schema;
use checkin_consumer::server::config::ConsumerConfig;
use checkin_consumer::server::rate_limiter::InMemoryRateLimiter;
use checkin_consumer::server::source::pump_lines;
use checkin_consumer::server::worker_pool::WorkerPool;
use checkin_consumer::services::{ClockTicker, StaticDirectory, UnlimitedQuotas};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Newline-delimited JSON envelopes to consume. Reads stdin when omitted.
    #[arg(short, long)]
    input: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "consumer.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let config = match ConsumerConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load consumer configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&config.log_dir);
    info!(partitions = config.partitions, "Starting check-in consumer.");

    let mut opt = ConnectOptions::new(config.database_url.clone());
    opt.max_connections(u32::from(config.partitions) * 2 + 2);
    let db: DatabaseConnection = match Database::connect(opt).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to connect to the database: {}", e);
            return Err(e.into());
        }
    };
    create_schema(&db).await?;

    let processor = Arc::new(CheckInProcessor::new(
        db,
        Arc::new(StaticDirectory::from_config(&config.directory)),
        Arc::new(UnlimitedQuotas),
        Arc::new(InMemoryRateLimiter::new()),
        Arc::new(ClockTicker::new(config.task_trigger_url.clone())),
        ProcessorSettings::from_config(&config),
    ));
    let pool = WorkerPool::start(processor, config.partitions);

    let pumped = match args.input.as_deref() {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            tokio::select! {
                result = pump_lines(BufReader::new(file), &pool) => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, draining queued messages.");
                    Ok(0)
                }
            }
        }
        None => {
            tokio::select! {
                result = pump_lines(BufReader::new(tokio::io::stdin()), &pool) => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, draining queued messages.");
                    Ok(0)
                }
            }
        }
    };

    match pumped {
        Ok(count) => info!(count, "Input consumed."),
        Err(e) => e.log(),
    }

    for (partition, offset) in pool.shutdown().await {
        info!(partition, offset, "Committed offset.");
    }
    Ok(())
}
