#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Profile Restore
//!
//! Batch job that takes pending player profile photos from a MySQL
//! datastore, restores the faces in them, removes the background and
//! publishes the result as a transparent PNG over SFTP.
//!
//! ## Pipeline
//!
//! 1. List the remote directory; every `{id}_nobg.png` marks `id` as done.
//! 2. Resync the datastore: done identifiers get their output URL set.
//! 3. For each remaining pending player, in rank order:
//!    fetch the source photo (a non-2xx answer clears the source URL),
//!    restore faces ([`FaceRestorer`]), remove the background
//!    ([`BackgroundRemover`]), encode PNG and upload it.
//! 4. Commit the output URL of every uploaded player.
//!
//! ## Features
//!
//! - **Face restoration**: `RetinaFace` detection, five-point alignment,
//!   `GFPGAN` enhancement blended with the original crop, `Real-ESRGAN`
//!   background upsampling and feathered paste-back
//! - **Background removal**: `U2-Net` segmentation refined by trimap alpha
//!   matting
//! - **Hardware Acceleration**: CUDA, `CoreML`, and CPU execution providers
//! - **Model Management**: local model files or URLs downloaded once into
//!   a cache, optionally pinned to a SHA-256 digest
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use profile_restore::{DatabaseConfig, Pipeline, PipelineConfig, SftpAuth, SftpConfig};
//! use std::path::PathBuf;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let database = DatabaseConfig::new("db.internal", "wpt", "secret", "wpt");
//! let sftp = SftpConfig::new(
//!     "files.example.org",
//!     "deploy",
//!     SftpAuth::PrivateKey(PathBuf::from("/home/deploy/.ssh/id_ed25519")),
//!     "/var/www/players",
//! );
//! let config = PipelineConfig::builder(database, sftp).build()?;
//!
//! let mut pipeline = Pipeline::connect(&config).await?;
//! let summary = pipeline.run().await?;
//! println!("{} processed, {} skipped", summary.processed.len(), summary.skipped.len());
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime implementations of the model capabilities
//! - `cli` (default): the `profile-restore` binary, subscriber setup and
//!   download progress bars
//! - `tracing-json`: JSON log output for the binary
//!
//! Without `onnx`, the pipeline is assembled from custom implementations of
//! the traits in [`inference`] and [`store`] through [`Pipeline::builder`].

pub mod backends;
pub mod cache;
#[cfg(all(feature = "cli", feature = "onnx"))]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod removal;
pub mod restoration;
pub mod services;
pub mod store;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

// Public API exports
pub use cache::{format_size, ModelCache};
pub use config::{
    DatabaseConfig, ExecutionProvider, ModelConfig, ModelLocation, PipelineConfig,
    PipelineConfigBuilder, RemovalSettings, RestorationSettings, SftpAuth, SftpConfig,
    OUTPUT_SUFFIX,
};
pub use download::{validate_model_url, ModelDownloader};
pub use error::{PipelineError, Result};
pub use inference::{
    BackgroundRemoval, BackgroundUpsampler, FaceDetector, FaceEnhancer, ImageRestorer, Segmenter,
};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use removal::BackgroundRemover;
pub use restoration::FaceRestorer;
pub use services::ImageCodec;
pub use store::{
    FetchOutcome, HttpImageSource, ImageSource, MySqlPlayerStore, PlayerStore, RemoteStore,
    SftpStore,
};
pub use types::{
    FaceDetection, ItemOutcome, PlayerRecord, RemovalOutcome, RunSummary, SkipReason,
};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat};
