//! Model artifact downloading
//!
//! Streams a single ONNX file into the model cache with progress reporting,
//! optional SHA-256 verification and an atomic rename into place.

use crate::cache::{format_size, ModelCache};
use crate::error::{PipelineError, Result};
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

/// Model downloader with progress reporting
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {},
        }
    }

    pub fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {},
        }
    }

    pub fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {},
        }
    }

    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {},
        }
    }
}

impl ModelDownloader {
    /// Create a downloader writing into the default cache
    ///
    /// # Errors
    /// - Failed to create HTTP client
    /// - Failed to initialize model cache
    pub fn new() -> Result<Self> {
        Self::with_cache(ModelCache::new()?)
    }

    /// Create a downloader writing into `cache`
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn with_cache(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .map_err(|e| PipelineError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client, cache })
    }

    /// Return the cached path of the artifact at `url`, downloading it first
    /// if it is not cached yet
    ///
    /// # Errors
    /// - Invalid URL
    /// - Network errors during download
    /// - File system errors during caching
    /// - Digest mismatch
    pub async fn ensure_artifact(
        &self,
        url: &str,
        expected_sha256: Option<&str>,
        show_progress: bool,
    ) -> Result<PathBuf> {
        validate_model_url(url)?;
        let final_path = self.cache.artifact_path(url);

        if self.cache.is_cached(url) {
            log::debug!("Using cached model artifact {}", final_path.display());
            return Ok(final_path);
        }

        log::info!("⬇️ Downloading model artifact {}", url);
        let partial_path = final_path.with_extension("part");

        let progress = if show_progress {
            Some(Self::create_progress_indicator())
        } else {
            None
        };

        let result = self
            .download_file(url, &partial_path, progress.as_ref())
            .await
            .and_then(|size| {
                if Self::verify_file_integrity(&partial_path, expected_sha256)? {
                    Ok(size)
                } else {
                    Err(PipelineError::model_error_with_context(
                        "verify",
                        &partial_path,
                        "SHA-256 digest mismatch",
                        &["check the pinned digest", "delete the cache and retry"],
                    ))
                }
            });

        let size = match result {
            Ok(size) => size,
            Err(e) => {
                let _ = fs::remove_file(&partial_path);
                if let Some(pb) = &progress {
                    pb.finish_with_message("❌ Download failed".to_string());
                }
                return Err(e);
            },
        };

        fs::rename(&partial_path, &final_path)
            .map_err(|e| PipelineError::file_io_error("move downloaded model", &final_path, &e))?;

        if let Some(pb) = &progress {
            pb.finish_with_message(format!("✅ Downloaded {}", format_size(size)));
        }
        log::info!(
            "Cached model artifact {} ({})",
            final_path.display(),
            format_size(size)
        );
        Ok(final_path)
    }

    fn create_progress_indicator() -> ProgressIndicator {
        #[cfg(feature = "cli")]
        {
            let pb = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            ProgressIndicator::Indicatif(pb)
        }
        #[cfg(not(feature = "cli"))]
        {
            ProgressIndicator::NoOp
        }
    }

    /// Download a single file, returning its size
    async fn download_file(
        &self,
        url: &str,
        local_path: &Path,
        progress: Option<&ProgressIndicator>,
    ) -> Result<u64> {
        log::debug!("Downloading: {} -> {}", url, local_path.display());

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PipelineError::file_io_error("create directory", parent, &e))?;
        }

        let response =
            self.client.get(url).send().await.map_err(|e| {
                PipelineError::network_error(format!("Failed to download {}", url), e)
            })?;

        if !response.status().is_success() {
            return Err(PipelineError::network_error(
                format!("HTTP error {} for {}", response.status(), url),
                "unexpected status",
            ));
        }

        let total_size = response.content_length();
        if let (Some(pb), Some(total)) = (progress, total_size) {
            pb.set_length(total);
        }

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| PipelineError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];

        loop {
            let bytes_read = tokio::io::AsyncReadExt::read(&mut stream, &mut buffer)
                .await
                .map_err(|e| PipelineError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| PipelineError::file_io_error("write to file", local_path, &e))?;

            downloaded += bytes_read as u64;

            if let Some(pb) = progress {
                if total_size.is_some() {
                    pb.set_position(downloaded);
                } else {
                    pb.set_message(format!("Downloaded {}", format_size(downloaded)));
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| PipelineError::file_io_error("flush file", local_path, &e))?;

        log::debug!(
            "Downloaded {} bytes to {}",
            downloaded,
            local_path.display()
        );
        Ok(downloaded)
    }

    /// Verify a file against a SHA-256 hex digest. No digest means no check.
    ///
    /// # Errors
    /// - Failed to read the file
    pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
        let Some(expected) = expected_hash else {
            return Ok(true);
        };

        let contents = fs::read(file_path).map_err(|e| {
            PipelineError::file_io_error("read file for verification", file_path, &e)
        })?;

        let mut hasher = Sha256::new();
        hasher.update(&contents);
        let actual_hash = format!("{:x}", hasher.finalize());

        if actual_hash.eq_ignore_ascii_case(expected) {
            Ok(true)
        } else {
            log::warn!(
                "File integrity check failed for {}: expected {}, got {}",
                file_path.display(),
                expected,
                actual_hash
            );
            Ok(false)
        }
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Check that a model URL is something the downloader can fetch
///
/// # Errors
/// - Empty URL or a scheme other than http(s)
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(PipelineError::invalid_config("Model URL cannot be empty"));
    }
    let Some(rest) = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
    else {
        return Err(PipelineError::invalid_config(format!(
            "Unsupported model URL '{}': expected an http(s) URL",
            url
        )));
    };
    if rest.split('/').next().map_or(true, str::is_empty) {
        return Err(PipelineError::invalid_config(format!(
            "Model URL '{}' has no host",
            url
        )));
    }
    Ok(())
}
