//! Batch runner entry point

use super::config::CliConfigBuilder;
use crate::{
    config::ExecutionProvider,
    pipeline::Pipeline,
    tracing_config::{init_cli_tracing, TracingFormat},
};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Restore player profile photos and publish them without background
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "profile-restore")]
pub struct Cli {
    /// Datastore host
    #[arg(long, env = "DB_HOST")]
    pub db_host: String,

    /// Datastore port
    #[arg(long, env = "DB_PORT", default_value_t = 3306)]
    pub db_port: u16,

    /// Datastore user
    #[arg(long, env = "DB_USER")]
    pub db_user: String,

    /// Datastore password
    #[arg(long, env = "DB_PASS", hide_env_values = true)]
    pub db_pass: String,

    /// Datastore schema name
    #[arg(long, env = "DB_NAME")]
    pub db_name: String,

    /// SFTP host
    #[arg(long, env = "SSH_HOST")]
    pub ssh_host: String,

    /// SFTP port
    #[arg(long, env = "SSH_PORT", default_value_t = 22)]
    pub ssh_port: u16,

    /// SFTP user
    #[arg(long, env = "SSH_USER")]
    pub ssh_user: String,

    /// Private key used for SFTP authentication (preferred over the password)
    #[arg(long, env = "SSH_PRIVATE_KEY_PATH", value_name = "PATH")]
    pub ssh_private_key_path: Option<PathBuf>,

    /// SFTP password, used when no private key is given
    #[arg(long, env = "SSH_PASSWORD", hide_env_values = true)]
    pub ssh_password: Option<String>,

    /// Remote directory holding the published images
    #[arg(long, env = "SSH_REMOTE_DIR")]
    pub ssh_remote_dir: String,

    /// Face detection model (path or https:// URL, optional #sha256=<hex>)
    #[arg(long, env = "DETECTOR_MODEL", default_value = "models/retinaface_resnet50.onnx")]
    pub detector_model: String,

    /// Face restoration model (path or https:// URL)
    #[arg(long, env = "RESTORATION_MODEL", default_value = "models/GFPGANv1.4.onnx")]
    pub restoration_model: String,

    /// Background upsampling model (path or https:// URL)
    #[arg(long, env = "UPSAMPLER_MODEL", default_value = "models/RealESRGAN_x4plus.onnx")]
    pub upsampler_model: String,

    /// Background segmentation model (path or https:// URL)
    #[arg(long, env = "SEGMENTATION_MODEL", default_value = "models/u2net.onnx")]
    pub segmentation_model: String,

    /// Execution provider (auto, cpu, cuda, coreml)
    #[arg(short, long, env = "EXECUTION_PROVIDER", default_value = "auto")]
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads (0 = auto-detect)
    #[arg(short, long, env = "INFERENCE_THREADS", default_value_t = 0)]
    pub threads: usize,

    /// Output magnification
    #[arg(long, default_value_t = 2)]
    pub upscale: u32,

    /// Weight of the restored face against the original crop (0.0-1.0)
    #[arg(long, default_value_t = 0.5)]
    pub blend_weight: f32,

    /// Restore every detected face instead of only the centre one
    #[arg(long)]
    pub all_faces: bool,

    /// Use the raw segmentation mask instead of alpha matting
    #[arg(long)]
    pub no_alpha_matting: bool,

    /// Timeout for source image downloads, in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 60)]
    pub http_timeout: u64,

    /// Log format (console, compact, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "console")]
    pub log_format: TracingFormat,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

pub async fn main() -> Result<()> {
    // Must run before parsing so `.env` values feed the `env` fallbacks
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    let session_id =
        init_cli_tracing(cli.verbose, cli.log_format).context("Failed to initialize tracing")?;
    match &dotenv {
        Ok(path) => debug!(path = %path.display(), "Loaded environment file"),
        Err(e) if e.not_found() => debug!("No .env file found"),
        Err(e) => warn!(error = %e, "Ignoring unreadable .env file"),
    }

    let config = CliConfigBuilder::from_cli(&cli).context("Invalid configuration")?;
    info!(
        session_id = %session_id,
        db_host = %config.database.host,
        sftp_host = %config.sftp.host,
        remote_dir = %config.sftp.remote_dir,
        provider = %config.models.execution_provider,
        "Starting profile restore"
    );

    let start_time = Instant::now();
    let mut pipeline = Pipeline::connect(&config)
        .await
        .context("Failed to set up the pipeline")?;
    let summary = pipeline.run().await.context("Batch run failed")?;

    info!(
        resynced = summary.resynced,
        processed = summary.processed.len(),
        gone = summary.gone.len(),
        skipped = summary.skipped.len(),
        elapsed_secs = format!("{:.1}", start_time.elapsed().as_secs_f64()),
        "Run finished"
    );
    if !summary.skipped.is_empty() {
        warn!(players = ?summary.skipped, "Some players were skipped and will be retried next run");
    }

    Ok(())
}
