//! Local cache for model artifacts fetched from URLs
//!
//! Artifacts live in an XDG-compliant directory:
//! - Linux/macOS: `~/.cache/profile-restore/models/`
//! - Windows: `%LOCALAPPDATA%/profile-restore/models/`
//!
//! `PROFILE_RESTORE_CACHE_DIR` overrides the base directory.

use crate::error::{PipelineError, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache base directory
pub const CACHE_DIR_ENV: &str = "PROFILE_RESTORE_CACHE_DIR";

/// Model artifact cache
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Open the default cache, creating its directory if needed
    ///
    /// # Errors
    /// - Failed to determine the user cache directory
    /// - Failed to create the cache directory
    pub fn new() -> Result<Self> {
        let cache_dir = Self::default_cache_dir()?;
        Self::ensure_dir(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    /// Open a cache rooted at `base`, using its `models` subdirectory
    ///
    /// # Errors
    /// - Failed to create the cache directory
    pub fn with_custom_cache_dir(base: &Path) -> Result<Self> {
        let cache_dir = base.join("models");
        Self::ensure_dir(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    fn default_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                PipelineError::invalid_config(format!(
                    "Failed to determine cache directory. Set {} environment variable.",
                    CACHE_DIR_ENV
                ))
            })?
            .join("profile-restore")
            .join("models"))
    }

    fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .map_err(|e| PipelineError::file_io_error("create cache directory", dir, &e))?;
        }
        Ok(())
    }

    /// Cache-safe file name for an artifact URL.
    ///
    /// Keeps the URL's last path segment for readability and prefixes a
    /// short hash of the full URL so equal names from different hosts do
    /// not collide.
    #[must_use]
    pub fn artifact_file_name(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        let short = digest.get(..12).unwrap_or(&digest);

        let last_segment = url
            .split(['?', '#'])
            .next()
            .unwrap_or(url)
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("model.onnx");
        let sanitized: String = last_segment
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        format!("{}-{}", short, sanitized)
    }

    /// Where the artifact for `url` is (or will be) stored
    #[must_use]
    pub fn artifact_path(&self, url: &str) -> PathBuf {
        self.cache_dir.join(Self::artifact_file_name(url))
    }

    /// Whether the artifact for `url` has been downloaded
    #[must_use]
    pub fn is_cached(&self, url: &str) -> bool {
        self.artifact_path(url)
            .metadata()
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Format file size in human-readable format
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS.get(unit_index).unwrap_or(&"B"))
    } else {
        format!("{:.1} {}", size, UNITS.get(unit_index).unwrap_or(&"B"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_artifact_file_name() {
        let name = ModelCache::artifact_file_name(
            "https://github.com/example/releases/download/v1.4/GFPGANv1.4.onnx?raw=true",
        );
        assert!(name.ends_with("-GFPGANv1.4.onnx"));
        assert_eq!(name.len(), 12 + 1 + "GFPGANv1.4.onnx".len());

        let other = ModelCache::artifact_file_name("https://mirror.example.org/GFPGANv1.4.onnx");
        assert_ne!(name, other);

        let odd = ModelCache::artifact_file_name("https://example.org/models/u2net onnx/");
        assert!(odd.ends_with("-u2net_onnx"));
    }

    #[test]
    fn test_custom_cache_dir() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();

        assert_eq!(cache.cache_dir(), temp_dir.path().join("models"));
        assert!(cache.cache_dir().exists());
    }

    #[test]
    fn test_is_cached() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        let url = "https://example.org/u2net.onnx";

        assert!(!cache.is_cached(url));
        fs::write(cache.artifact_path(url), b"").unwrap();
        assert!(!cache.is_cached(url));
        fs::write(cache.artifact_path(url), b"onnx").unwrap();
        assert!(cache.is_cached(url));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1_572_864), "1.5 MB");
        assert_eq!(format_size(1_073_741_824), "1.0 GB");
    }
}
