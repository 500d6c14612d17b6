//! IDEALEM command line - compress sensor series into a record store and back

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use idealem_core::compression::CompressorConfig;
use idealem_core::pipeline::{decompress_record, run_jobs, JobOutcome};
use idealem_core::storage::{CompressionStore, MemorySource, StoreConfig};
use idealem_core::{format_timestamp, parse_timestamp, Sample};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "idealem")]
#[command(version, about = "Adaptive buffer-based lossless compression for sensor series")]
struct Cli {
    /// Record store directory
    #[arg(short, long, global = true, default_value = "data")]
    store: PathBuf,

    /// Skip fsync when writing records
    #[arg(long, global = true)]
    no_sync: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compress JSON sample files into the store
    Compress {
        /// Files holding `[{"timestamp": ..., "value": ...}]`
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// Device id (defaults to each file's stem; only valid with one input)
        #[arg(short, long)]
        device: Option<String>,

        /// Compressor configuration as JSON
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Rebuild a device's samples from a stored record
    Decompress {
        #[arg(short, long)]
        device: String,

        /// Record id (defaults to the latest)
        #[arg(short, long)]
        record: Option<Uuid>,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List a device's records
    Inspect {
        #[arg(short, long)]
        device: String,
    },
}

/// Sample as read from and written to JSON files
#[derive(Serialize, Deserialize)]
struct SampleRow {
    timestamp: String,
    value: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("installing log subscriber")?;

    let cli = Cli::parse();
    let store = CompressionStore::open(StoreConfig {
        root: cli.store.clone(),
        sync: !cli.no_sync,
    })
    .with_context(|| format!("opening store {}", cli.store.display()))?;

    match cli.command {
        Command::Compress {
            input,
            device,
            config,
        } => compress(Arc::new(store), &input, device, config.as_deref()).await,
        Command::Decompress {
            device,
            record,
            output,
        } => decompress(&store, &device, record, output.as_deref()),
        Command::Inspect { device } => inspect(&store, &device),
    }
}

async fn compress(
    store: Arc<CompressionStore>,
    inputs: &[PathBuf],
    device: Option<String>,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<CompressorConfig>(&text)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => CompressorConfig::default(),
    };
    config.validate()?;

    let devices = device_ids(inputs, device)?;
    let source = Arc::new(MemorySource::new());
    for (path, device_id) in inputs.iter().zip(&devices) {
        let samples = read_samples(path)?;
        info!("Read {} samples for {} from {}", samples.len(), device_id, path.display());
        source.insert(device_id, samples);
    }

    let outcomes = run_jobs(devices, source, store, config).await;
    let mut failed = 0;
    for outcome in &outcomes {
        match outcome {
            JobOutcome::Stored {
                device_id,
                record_id,
                metadata,
            } => println!(
                "{}: stored {} ({} values, block_size={}, hit_ratio={:.4}, ratio={:.2})",
                device_id,
                record_id,
                metadata.original_length,
                metadata.block_size,
                metadata.hit_ratio,
                metadata.compression_ratio
            ),
            JobOutcome::Skipped { device_id, samples } => {
                println!("{}: skipped, only {} samples", device_id, samples)
            }
            JobOutcome::Failed { device_id, error } => {
                failed += 1;
                eprintln!("{}: failed: {}", device_id, error);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} jobs failed", failed, outcomes.len());
    }
    Ok(())
}

/// One distinct device id per input: `device` when given, else the file stem
fn device_ids(inputs: &[PathBuf], device: Option<String>) -> anyhow::Result<Vec<String>> {
    if device.is_some() && inputs.len() > 1 {
        bail!("--device needs exactly one input file");
    }

    let mut seen: HashMap<String, &Path> = HashMap::with_capacity(inputs.len());
    let mut ids = Vec::with_capacity(inputs.len());
    for path in inputs {
        let id = match &device {
            Some(id) => id.clone(),
            None => path
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .with_context(|| format!("no device id for {}", path.display()))?,
        };
        if let Some(earlier) = seen.insert(id.clone(), path) {
            bail!(
                "inputs {} and {} both map to device {}",
                earlier.display(),
                path.display(),
                id
            );
        }
        ids.push(id);
    }
    Ok(ids)
}

fn decompress(
    store: &CompressionStore,
    device: &str,
    record_id: Option<Uuid>,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let record = match record_id {
        Some(id) => store.load(device, id)?,
        None => store.latest(device)?,
    };
    let rows: Vec<SampleRow> = decompress_record(&record)?
        .iter()
        .map(|s| SampleRow {
            timestamp: format_timestamp(&s.timestamp),
            value: s.value,
        })
        .collect();

    let json = serde_json::to_string_pretty(&rows)?;
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            info!("Wrote {} samples to {}", rows.len(), path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn inspect(store: &CompressionStore, device: &str) -> anyhow::Result<()> {
    let records = store.list(device);
    if records.is_empty() {
        bail!("no records for {}", device);
    }

    for info in records {
        println!(
            "{}  created={}  range={}  values={}  block_size={}  buffers={}  hit_ratio={:.4}  ratio={:.2}",
            info.id,
            info.created_at.to_rfc3339(),
            info.time_range,
            info.metadata.original_length,
            info.metadata.block_size,
            info.metadata.num_buffers,
            info.metadata.hit_ratio,
            info.metadata.compression_ratio
        );
    }
    Ok(())
}

fn read_samples(path: &Path) -> anyhow::Result<Vec<Sample>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let rows: Vec<SampleRow> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;

    rows.into_iter()
        .map(|row| -> anyhow::Result<Sample> {
            Ok(Sample::new(parse_timestamp(&row.timestamp)?, row.value))
        })
        .collect()
}
