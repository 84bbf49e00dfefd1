//! vstore Simulator CLI
//!
//! Runs simulated uploads against a virtual storage network and prints
//! utilization and virtual-time figures.
//!
//! # Example
//!
//! ```bash
//! # Default two-node network, 100 MB upload within a 200 MB quota
//! vstore-sim
//!
//! # Several concurrent uploads from a config file
//! vstore-sim --config network.json --uploads 4 --file-size-mb 40
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vstore_core::network::{NetworkHandle, UploadRequest};
use vstore_core::storage::chunking::MIB;
use vstore_core::storage::User;
use vstore_core::{SimConfig, SimError};

/// vstore Simulator
///
/// Drives chunked uploads step by step. No real data moves; elapsed time
/// is virtual and derived from link bandwidth.
#[derive(Parser, Debug)]
#[command(name = "vstore-sim")]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON network configuration. Defaults to the built-in two-node network.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// User that owns the uploads
    #[arg(short, long, default_value = "user_max")]
    user: String,

    /// Quota for the user, in MB (only used if the config doesn't define the user)
    #[arg(long, default_value = "200")]
    quota_mb: u64,

    /// Size of each upload in MB
    #[arg(short = 's', long, default_value = "100")]
    file_size_mb: u64,

    /// Number of concurrent uploads
    #[arg(short = 'n', long, default_value = "1")]
    uploads: usize,

    /// Chunks advanced per step. Defaults to the config value.
    #[arg(long)]
    chunks_per_step: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SimConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => SimConfig::default(),
    };
    if let Some(per_step) = args.chunks_per_step {
        config.chunks_per_step = per_step.max(1);
    }

    let handle = NetworkHandle::from_config(&config).context("failed to build network")?;
    if handle.get_user(&args.user).is_none() {
        handle.register_user(User::new(&args.user, &args.user, args.quota_mb * MIB))?;
    }

    info!(
        user = %args.user,
        uploads = args.uploads,
        file_size_mb = args.file_size_mb,
        chunks_per_step = config.chunks_per_step,
        "Starting simulation"
    );

    let mut tasks = Vec::new();
    for i in 0..args.uploads {
        let handle = handle.clone();
        let request = UploadRequest::from_config(
            &config,
            format!("upload_{}.bin", i),
            args.file_size_mb * MIB,
            args.user.clone(),
        );
        tasks.push(tokio::spawn(async move { handle.upload(&request).await }));
    }

    for task in tasks {
        match task.await? {
            Ok(report) => {
                println!("Upload COMPLETE: {}", report.file_name);
                println!("  Total Size: {:.2} MB", report.file_size as f64 / MIB as f64);
                println!("  Chunks: {} in {} steps", report.chunks, report.steps);
                println!("  Virtual Time Taken: {:.4}s", report.virtual_secs);
                println!("  Simulated Speed: {:.2} Mibit/s", report.simulated_speed_mibps);
                println!(
                    "  User Quota: {:.2}MB / {:.2}MB",
                    report.quota_used as f64 / MIB as f64,
                    report.quota_total as f64 / MIB as f64
                );
            }
            Err(SimError::Network(e)) if e.is_admission_error() => {
                warn!(error = %e, "Upload rejected");
                println!("Upload rejected: {}", e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    println!("\n--- Network Status ---");
    println!("{}", handle.statistics());
    for node_id in [&config.source_node, &config.target_node] {
        let line = handle.with(|network| {
            network.node(node_id).map(|node| {
                let storage = node.storage_stats();
                let perf = node.performance();
                format!(
                    "{}: storage {:.4}%, {} files, {} chunks, {} failed",
                    node_id,
                    storage.utilization_percent,
                    storage.files_stored,
                    perf.chunks_processed,
                    perf.failed_chunks
                )
            })
        });
        if let Some(line) = line {
            println!("{}", line);
        }
    }

    Ok(())
}
