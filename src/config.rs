//! Configuration types for the restoration pipeline

use crate::error::{PipelineError, Result};
use secrecy::Secret;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Suffix appended to a player identifier to form the output file name
pub const OUTPUT_SUFFIX: &str = "_nobg.png";

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl std::str::FromStr for ExecutionProvider {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(PipelineError::invalid_config(format!(
                "Unknown execution provider '{}'. Expected one of: auto, cpu, cuda, coreml",
                other
            ))),
        }
    }
}

/// Connection parameters for the player datastore
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub name: String,
}

impl DatabaseConfig {
    /// Default MySQL port
    pub const DEFAULT_PORT: u16 = 3306;

    #[must_use]
    pub fn new<S: Into<String>>(host: S, user: S, password: S, name: S) -> Self {
        Self {
            host: host.into(),
            port: Self::DEFAULT_PORT,
            user: user.into(),
            password: Secret::new(password.into()),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// SFTP authentication method
#[derive(Debug, Clone)]
pub enum SftpAuth {
    /// Private key file on the local machine
    PrivateKey(PathBuf),
    /// Plain password authentication
    Password(Secret<String>),
}

/// Connection parameters for the remote file store
#[derive(Debug, Clone)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SftpAuth,
    /// Directory holding the processed images
    pub remote_dir: String,
}

impl SftpConfig {
    /// Default SSH port
    pub const DEFAULT_PORT: u16 = 22;

    #[must_use]
    pub fn new<S: Into<String>>(host: S, username: S, auth: SftpAuth, remote_dir: S) -> Self {
        Self {
            host: host.into(),
            port: Self::DEFAULT_PORT,
            username: username.into(),
            auth,
            remote_dir: remote_dir.into(),
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Where a model artifact comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelLocation {
    /// Local file consumed as-is
    Path(PathBuf),
    /// Remote file fetched once into the model cache, optionally pinned
    /// to a SHA-256 digest
    Url { url: String, sha256: Option<String> },
}

impl ModelLocation {
    /// Parse a location string.
    ///
    /// `http(s)://` values are remote; a `#sha256=<hex>` fragment pins the
    /// digest. Anything else is a local path.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if !(value.starts_with("https://") || value.starts_with("http://")) {
            return Self::Path(PathBuf::from(value));
        }
        match value.split_once("#sha256=") {
            Some((url, digest)) => Self::Url {
                url: url.to_string(),
                sha256: Some(digest.to_ascii_lowercase()),
            },
            None => Self::Url {
                url: value.to_string(),
                sha256: None,
            },
        }
    }

    /// Human-readable name for logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Url { url, .. } => url.clone(),
        }
    }
}

/// Model artifacts and runtime settings for the ONNX capabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Face detection and landmark model (`RetinaFace`)
    pub detector: ModelLocation,
    /// Face super-resolution model (`GFPGAN`)
    pub restoration: ModelLocation,
    /// Background upsampling model (`Real-ESRGAN` x4)
    pub upsampler: ModelLocation,
    /// Background segmentation model (`U2-Net`)
    pub segmentation: ModelLocation,
    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,
    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector: ModelLocation::Path(PathBuf::from("models/retinaface_resnet50.onnx")),
            restoration: ModelLocation::Path(PathBuf::from("models/GFPGANv1.4.onnx")),
            upsampler: ModelLocation::Path(PathBuf::from("models/RealESRGAN_x4plus.onnx")),
            segmentation: ModelLocation::Path(PathBuf::from("models/u2net.onnx")),
            execution_provider: ExecutionProvider::Auto,
            intra_threads: 0,
        }
    }
}

/// Parameters of the face restoration stage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RestorationSettings {
    /// Linear magnification of the output relative to the input
    pub upscale: u32,
    /// Side length of the aligned face crop
    pub face_size: u32,
    /// Faces with a smaller inter-eye distance (pixels) are ignored
    pub eye_dist_threshold: f32,
    /// 0 keeps the crop unchanged, 1 uses the network output only
    pub blend_weight: f32,
    /// Restore only the face closest to the image centre
    pub only_center_face: bool,
}

impl Default for RestorationSettings {
    fn default() -> Self {
        Self {
            upscale: 2,
            face_size: 512,
            eye_dist_threshold: 5.0,
            blend_weight: 0.5,
            only_center_face: true,
        }
    }
}

impl RestorationSettings {
    /// Validate the restoration parameters
    pub fn validate(&self) -> Result<()> {
        if !(1..=8).contains(&self.upscale) {
            return Err(PipelineError::config_value_error("upscale", self.upscale, "1-8"));
        }
        if self.face_size < 16 {
            return Err(PipelineError::config_value_error(
                "face size",
                self.face_size,
                ">= 16",
            ));
        }
        if !(0.0..=1.0).contains(&self.blend_weight) {
            return Err(PipelineError::config_value_error(
                "blend weight",
                self.blend_weight,
                "0.0-1.0",
            ));
        }
        if self.eye_dist_threshold < 0.0 {
            return Err(PipelineError::config_value_error(
                "eye distance threshold",
                self.eye_dist_threshold,
                ">= 0",
            ));
        }
        Ok(())
    }
}

/// Parameters of the background removal stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalSettings {
    /// Refine the segmentation edge with trimap-based alpha matting
    pub alpha_matting: bool,
    /// Mask values above this are certain foreground
    pub foreground_threshold: u8,
    /// Mask values below this are certain background
    pub background_threshold: u8,
    /// Side of the square structure eroding the certain regions
    pub erode_size: u32,
    /// Radius of the window sampling known colours around unknown pixels
    pub matting_radius: u32,
}

impl Default for RemovalSettings {
    fn default() -> Self {
        Self {
            alpha_matting: true,
            foreground_threshold: 240,
            background_threshold: 1,
            erode_size: 10,
            matting_radius: 15,
        }
    }
}

impl RemovalSettings {
    /// Validate the removal parameters
    pub fn validate(&self) -> Result<()> {
        if self.background_threshold >= self.foreground_threshold {
            return Err(PipelineError::invalid_config(format!(
                "Background threshold ({}) must be below foreground threshold ({})",
                self.background_threshold, self.foreground_threshold
            )));
        }
        if self.alpha_matting && self.matting_radius == 0 {
            return Err(PipelineError::config_value_error(
                "matting radius",
                self.matting_radius,
                ">= 1",
            ));
        }
        Ok(())
    }
}

/// Complete configuration of one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database: DatabaseConfig,
    pub sftp: SftpConfig,
    pub models: ModelConfig,
    pub restoration: RestorationSettings,
    pub removal: RemovalSettings,
    /// Suffix of uploaded files and of the stored output URL
    pub output_suffix: String,
    /// Timeout for source image downloads
    pub http_timeout_secs: u64,
}

impl PipelineConfig {
    /// Create a configuration builder
    #[must_use]
    pub fn builder(database: DatabaseConfig, sftp: SftpConfig) -> PipelineConfigBuilder {
        PipelineConfigBuilder::new(database, sftp)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.host.is_empty() {
            return Err(PipelineError::invalid_config("Database host is required"));
        }
        if self.database.name.is_empty() {
            return Err(PipelineError::invalid_config("Database name is required"));
        }
        if self.sftp.host.is_empty() {
            return Err(PipelineError::invalid_config("SFTP host is required"));
        }
        if self.sftp.username.is_empty() {
            return Err(PipelineError::invalid_config("SFTP username is required"));
        }
        if self.sftp.remote_dir.is_empty() {
            return Err(PipelineError::invalid_config(
                "SFTP remote directory is required",
            ));
        }
        if self.output_suffix.is_empty() {
            return Err(PipelineError::invalid_config("Output suffix cannot be empty"));
        }
        if self.http_timeout_secs == 0 {
            return Err(PipelineError::config_value_error(
                "HTTP timeout",
                self.http_timeout_secs,
                ">= 1 second",
            ));
        }
        self.restoration.validate()?;
        self.removal.validate()?;
        Ok(())
    }
}

/// Builder for `PipelineConfig`
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn new(database: DatabaseConfig, sftp: SftpConfig) -> Self {
        Self {
            config: PipelineConfig {
                database,
                sftp,
                models: ModelConfig::default(),
                restoration: RestorationSettings::default(),
                removal: RemovalSettings::default(),
                output_suffix: OUTPUT_SUFFIX.to_string(),
                http_timeout_secs: 60,
            },
        }
    }

    #[must_use]
    pub fn models(mut self, models: ModelConfig) -> Self {
        self.config.models = models;
        self
    }

    #[must_use]
    pub fn restoration(mut self, settings: RestorationSettings) -> Self {
        self.config.restoration = settings;
        self
    }

    #[must_use]
    pub fn removal(mut self, settings: RemovalSettings) -> Self {
        self.config.removal = settings;
        self
    }

    #[must_use]
    pub fn output_suffix<S: Into<String>>(mut self, suffix: S) -> Self {
        self.config.output_suffix = suffix.into();
        self
    }

    #[must_use]
    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http_timeout_secs = secs;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn database() -> DatabaseConfig {
        DatabaseConfig::new("localhost", "wpt", "secret", "wpt")
    }

    fn sftp() -> SftpConfig {
        SftpConfig::new(
            "files.example.org",
            "deploy",
            SftpAuth::PrivateKey(PathBuf::from("/home/deploy/.ssh/id_ed25519")),
            "/var/www/images",
        )
    }

    #[test]
    fn test_builder_defaults() {
        let config = PipelineConfig::builder(database(), sftp()).build().unwrap();

        assert_eq!(config.output_suffix, "_nobg.png");
        assert_eq!(config.sftp.port, 22);
        assert_eq!(config.database.port, 3306);
        assert_eq!(config.database.password.expose_secret(), "secret");
        assert_eq!(config.restoration.upscale, 2);
        assert_eq!(config.restoration.face_size, 512);
        assert!((config.restoration.blend_weight - 0.5).abs() < f32::EPSILON);
        assert!(config.removal.alpha_matting);
        assert_eq!(config.removal.foreground_threshold, 240);
        assert_eq!(config.removal.background_threshold, 1);
    }

    #[test]
    fn test_validation_failures() {
        let mut bad_sftp = sftp();
        bad_sftp.remote_dir = String::new();
        assert!(PipelineConfig::builder(database(), bad_sftp).build().is_err());

        let restoration = RestorationSettings {
            blend_weight: 1.5,
            ..RestorationSettings::default()
        };
        let err = PipelineConfig::builder(database(), sftp())
            .restoration(restoration)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("blend weight"));

        let removal = RemovalSettings {
            foreground_threshold: 10,
            background_threshold: 10,
            ..RemovalSettings::default()
        };
        assert!(PipelineConfig::builder(database(), sftp())
            .removal(removal)
            .build()
            .is_err());

        assert!(PipelineConfig::builder(database(), sftp())
            .http_timeout_secs(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_model_location_parse() {
        assert_eq!(
            ModelLocation::parse("https://example.org/GFPGANv1.4.onnx"),
            ModelLocation::Url {
                url: "https://example.org/GFPGANv1.4.onnx".to_string(),
                sha256: None,
            }
        );
        assert_eq!(
            ModelLocation::parse("https://example.org/u2net.onnx#sha256=ABC123"),
            ModelLocation::Url {
                url: "https://example.org/u2net.onnx".to_string(),
                sha256: Some("abc123".to_string()),
            }
        );
        assert_eq!(
            ModelLocation::parse("models/u2net.onnx"),
            ModelLocation::Path(PathBuf::from("models/u2net.onnx"))
        );
    }

    #[test]
    fn test_execution_provider_parse() {
        assert_eq!("auto".parse::<ExecutionProvider>().unwrap(), ExecutionProvider::Auto);
        assert_eq!("CoreML".parse::<ExecutionProvider>().unwrap(), ExecutionProvider::CoreMl);
        assert!("tpu".parse::<ExecutionProvider>().is_err());
        assert_eq!(ExecutionProvider::Cuda.to_string(), "cuda");
    }
}
