//! adlab - operator tool for adlab stores
//!
//! Inspects and repairs the on-disk stores a service writes, and trains a
//! dataset offline from captured payload files.

use std::path::{Path, PathBuf};

use adlab_core::{Class, DatasetKey, Direction, Message, ResultStatus, TrainPacket};
use adlab_logging::{AdlabSubscriberBuilder, LogConfig};
use adlab_service::{Service, ServiceConfig};
use adlab_storage::{
    ByteFrequencyTable, LengthCounter, Reconciler, RecordLog, RecordLogConfig, StorageError,
};
use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Records in flight between the log reader and the byte table
const BYTEMAP_BUFFER: usize = 64;

#[derive(Parser)]
#[command(
    name = "adlab",
    about = "Inspect, repair and train adlab stores",
    version
)]
struct Cli {
    /// Directory holding the stores; overrides the config file's data_dir
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Service configuration file (TOML), including its `[log]` table
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Raise the log level to debug
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a record log and print its last index
    Verify { name: String },

    /// Append a UTF-8 value to a record log
    Add { name: String, value: String },

    /// Print one record as hex
    Get { name: String, index: i64 },

    /// Extract the majority byte sequence from a byte table
    Rule { name: String },

    /// Print the 256 counts following `prev` at `position`
    Bytes {
        name: String,
        position: usize,
        prev: u8,
    },

    /// Print one byte table cell
    Byte {
        name: String,
        position: usize,
        prev: u8,
        next: u8,
    },

    /// Fold records the byte table has not seen yet
    Bytemap { name: String },

    /// Refold every record into the byte table, counting duplicates again
    Forcebytemap { name: String },

    /// Print the reconciled length summary and per-class histograms
    Lengths { name: String },

    /// Train a dataset from payload files and print the resulting rule
    Train(TrainArgs),
}

#[derive(Args)]
struct TrainArgs {
    /// Dataset name
    dataset: String,

    /// Label the payloads as allowed
    #[arg(long, conflicts_with = "block", required_unless_present = "block")]
    allow: bool,

    /// Label the payloads as blocked
    #[arg(long)]
    block: bool,

    /// Train the outgoing direction instead of incoming
    #[arg(long)]
    outgoing: bool,

    /// Payload files, one packet each
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let _guard = AdlabSubscriberBuilder::new()
        .with_config(log_config(config.log.clone(), cli.verbose))
        .init();

    let dir = config.data_dir.as_path();
    match cli.command {
        Commands::Verify { name } => {
            let log = open_log(dir, &name).await?;
            let last = match log.verify().await {
                Ok(last) => last,
                Err(e) if e.is_corruption() => bail!("{name} is corrupt: {e}"),
                Err(e) => return Err(e.into()),
            };
            println!("{name}: {} records, last index {last}", log.len());
        }
        Commands::Add { name, value } => {
            let log = RecordLog::open(&name, RecordLogConfig::with_base_dir(dir))
                .await
                .with_context(|| format!("failed to open {name}"))?;
            let index = log.add(value.as_bytes()).await?;
            log.close().await?;
            println!("{index}");
        }
        Commands::Get { name, index } => {
            let log = open_log(dir, &name).await?;
            let record = log.get_record(index).await?;
            println!("{}", hex::encode(&record.data));
        }
        Commands::Rule { name } => {
            let mut table = open_table(dir, &name).await?;
            let sequence = table.extract().await?;
            println!("{} {}", sequence.len(), hex::encode(&sequence));
        }
        Commands::Bytes {
            name,
            position,
            prev,
        } => {
            let mut table = open_table(dir, &name).await?;
            let row = table.row(position, prev).await?;
            for (line, counts) in row.chunks(16).enumerate() {
                let counts: Vec<String> = counts.iter().map(|c| c.to_string()).collect();
                println!("{:02x}: {}", line * 16, counts.join(" "));
            }
        }
        Commands::Byte {
            name,
            position,
            prev,
            next,
        } => {
            let mut table = open_table(dir, &name).await?;
            println!("{}", table.get_count(position, prev, next).await?);
        }
        Commands::Bytemap { name } => {
            let log = open_log(dir, &name).await?;
            let mut table = ByteFrequencyTable::open(dir, &name).await?;
            let from = table.last_processed_index();

            let (tx, rx) = mpsc::channel(BYTEMAP_BUFFER);
            let fold = async {
                // Dropped on error, which stops the reader
                let mut rx = rx;
                let mut applied = 0;
                while let Some(record) = rx.recv().await {
                    if table.process_bytes(&record).await? {
                        applied += 1;
                    }
                }
                Ok::<_, StorageError>(applied)
            };
            let (_, applied) = tokio::join!(log.from_index_do(from, tx), fold);
            let applied = applied?;
            table.save().await?;
            println!(
                "{name}: applied {applied}, last processed {}",
                table.last_processed_index()
            );
        }
        Commands::Forcebytemap { name } => {
            let log = open_log(dir, &name).await?;
            let mut table = ByteFrequencyTable::open(dir, &name).await?;
            if table.last_processed_index() >= 0 {
                warn!(
                    store = %name,
                    last_processed = table.last_processed_index(),
                    "Table already holds counts; they will be counted again"
                );
            }
            let mut applied = 0;
            let mut cursor = log.cursor(-1);
            while let Some(record) = cursor.next().await {
                table.force_process_bytes(&record).await?;
                applied += 1;
            }
            table.save().await?;
            println!("{name}: applied {applied}");
        }
        Commands::Lengths { name } => print_lengths(dir, &name).await?,
        Commands::Train(args) => train(config, args).await?,
    }

    Ok(())
}

/// Settings from `--config`, or operator defaults without one
fn load_config(cli: &Cli) -> anyhow::Result<ServiceConfig> {
    let mut config = match &cli.config {
        Some(path) => ServiceConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ServiceConfig::default().with_log(LogConfig::operator()),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

/// `--verbose` raises the configured level to debug, never lowers it
fn log_config(mut log: LogConfig, verbose: bool) -> LogConfig {
    if verbose && !matches!(log.level.as_str(), "debug" | "trace") {
        log.level = "debug".to_string();
    }
    log
}

async fn open_log(dir: &Path, name: &str) -> anyhow::Result<RecordLog> {
    RecordLog::open_readonly(name, RecordLogConfig::with_base_dir(dir))
        .await
        .with_context(|| format!("failed to open {name} in {}", dir.display()))
}

async fn open_table(dir: &Path, name: &str) -> anyhow::Result<ByteFrequencyTable> {
    ByteFrequencyTable::open_readonly(dir, name)
        .await
        .with_context(|| format!("no byte table for {name}"))
}

async fn print_lengths(dir: &Path, name: &str) -> anyhow::Result<()> {
    let reconciler = Reconciler::open_readonly(dir, name).await?;
    match reconciler.value() {
        Some(value) => {
            println!("records {}..={}", value.first, value.last);
            print_buckets(&value.data);
        }
        None => println!("no records summarised"),
    }
    if reconciler.pending_len() > 0 {
        println!("{} fragments pending", reconciler.pending_len());
    }

    let mut lengths = LengthCounter::open_readonly(dir, name)
        .await
        .with_context(|| format!("no length histogram for {name}"))?;
    for class in [Class::Allow, Class::Block] {
        println!("{class}:");
        print_buckets(&lengths.histogram(class).await?);
    }
    Ok(())
}

fn print_buckets(buckets: &[i64]) {
    for (length, count) in buckets.iter().enumerate().filter(|(_, c)| **c > 0) {
        println!("  {length:>5} {count}");
    }
}

async fn train(config: ServiceConfig, args: TrainArgs) -> anyhow::Result<()> {
    let class = Class::from_allow_block(args.allow);
    let key = DatasetKey::new(args.dataset, Direction::from_incoming(!args.outgoing));
    let service = Service::start(config).await?;

    let mut trained = 0;
    for path in &args.files {
        let payload = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let reply = service
            .handle(TrainPacket::new(&key, class, payload).into())
            .await?;
        if reply == Some(Message::Status(ResultStatus::Success)) {
            trained += 1;
        } else {
            warn!(file = %path.display(), "Packet refused");
        }
    }
    service.sync(&key).await?;
    info!(dataset = %key, trained, "Training finished");

    let rule = service.rule(&key);
    service.shutdown().await?;

    match rule {
        Some(rule) => println!("{rule}"),
        None => bail!("no rule learned for {key} yet"),
    }
    Ok(())
}
