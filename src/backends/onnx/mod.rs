//! ONNX Runtime implementations of the model capabilities
//!
//! Every network is loaded into its own `OnnxModel` session with the
//! configured execution provider. Inputs and outputs are positional, so the
//! exported graphs do not need particular tensor names.

mod gfpgan;
mod realesrgan;
mod retinaface;
mod u2net;

pub use gfpgan::GfpganEnhancer;
pub use realesrgan::RealEsrganUpsampler;
pub use retinaface::{decode_detections, RetinaFaceDetector};
pub use u2net::U2NetSegmenter;

use crate::config::{ExecutionProvider, ModelConfig, ModelLocation};
use crate::download::ModelDownloader;
use crate::error::{PipelineError, Result};
use crate::utils::tensor::{from_nchw, Normalization};
use image::RgbImage;
use ndarray::{Array4, ArrayD, Ix4};
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Value;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// A loaded ONNX graph
#[derive(Debug)]
pub struct OnnxModel {
    session: Session,
    name: String,
}

impl OnnxModel {
    /// Load a model file into a session
    ///
    /// # Errors
    /// - Session creation or provider configuration failures
    /// - Invalid or unreadable model file
    pub fn from_file(
        path: &Path,
        provider: ExecutionProvider,
        intra_threads: usize,
    ) -> Result<Self> {
        let started = Instant::now();
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());

        let builder = Session::builder()
            .map_err(|e| PipelineError::model(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| PipelineError::model(format!("Failed to set optimization level: {e}")))?;
        let builder = configure_provider(builder, provider)?;

        let intra_threads = if intra_threads > 0 {
            intra_threads
        } else {
            std::thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(8)
        };

        let session = builder
            .with_intra_threads(intra_threads)
            .map_err(|e| PipelineError::model(format!("Failed to set intra threads: {e}")))?
            .commit_from_file(path)
            .map_err(|e| {
                PipelineError::model_error_with_context(
                    "load",
                    path,
                    &e.to_string(),
                    &["check that the file is a valid ONNX graph"],
                )
            })?;

        log::info!(
            "📊 Loaded {} in {:.0}ms ({} intra-op threads)",
            name,
            started.elapsed().as_secs_f64() * 1000.0,
            intra_threads
        );
        Ok(Self { session, name })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the graph on one input, returning every output in graph order
    ///
    /// # Errors
    /// - Tensor conversion or inference failures
    pub fn run(&mut self, input: Array4<f32>) -> Result<Vec<ArrayD<f32>>> {
        let started = Instant::now();
        log::debug!("🚀 {} input shape: {:?}", self.name, input.dim());

        let input_value = Value::from_array(input).map_err(|e| {
            PipelineError::inference(format!("Failed to convert input tensor: {e}"))
        })?;
        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| PipelineError::inference(format!("{} inference failed: {e}", self.name)))?;

        let keys: Vec<String> = outputs.keys().map(ToString::to_string).collect();
        let mut arrays = Vec::with_capacity(keys.len());
        for key in &keys {
            let array = outputs
                .get(key.as_str())
                .ok_or_else(|| PipelineError::inference(format!("Output '{key}' not found")))?
                .try_extract_array::<f32>()
                .map_err(|e| {
                    PipelineError::inference(format!("Failed to extract output '{key}': {e}"))
                })?
                .to_owned();
            arrays.push(array);
        }

        log::debug!(
            "⚡ {} inference: {:.2}ms, {} output(s)",
            self.name,
            started.elapsed().as_secs_f64() * 1000.0,
            arrays.len()
        );
        Ok(arrays)
    }
}

fn configure_provider(builder: SessionBuilder, provider: ExecutionProvider) -> Result<SessionBuilder> {
    let cuda_available =
        || OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
    let coreml_available =
        || OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false);

    let mut providers = Vec::new();
    match provider {
        ExecutionProvider::Auto => {
            if cuda_available() {
                log::info!("🚀 CUDA execution provider is available and will be used");
                providers.push(CUDAExecutionProvider::default().build());
            }
            if coreml_available() {
                log::info!("🍎 CoreML execution provider is available and will be used");
                providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
            }
            if providers.is_empty() {
                log::warn!("⚠️ No hardware acceleration available, falling back to CPU");
            }
        },
        ExecutionProvider::Cpu => log::info!("Using CPU execution provider"),
        ExecutionProvider::Cuda => {
            if cuda_available() {
                log::info!("Using CUDA execution provider");
                providers.push(CUDAExecutionProvider::default().build());
            } else {
                log::warn!("CUDA execution provider requested but not available, falling back to CPU");
            }
        },
        ExecutionProvider::CoreMl => {
            if coreml_available() {
                log::info!("🍎 Using CoreML execution provider (explicitly requested)");
                providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
            } else {
                log::warn!(
                    "CoreML execution provider requested but not available, falling back to CPU"
                );
            }
        },
    }

    if providers.is_empty() {
        return Ok(builder);
    }
    builder
        .with_execution_providers(providers)
        .map_err(|e| PipelineError::model(format!("Failed to set execution providers: {e}")))
}

/// Resolves model locations to files and opens sessions on them
#[derive(Debug)]
pub struct ModelLoader {
    provider: ExecutionProvider,
    intra_threads: usize,
    downloader: Option<ModelDownloader>,
    show_progress: bool,
}

impl ModelLoader {
    /// Create a loader for `config`. The model cache is only opened when a
    /// location is a URL.
    ///
    /// # Errors
    /// - Failed to initialize the model cache
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let needs_download = [
            &config.detector,
            &config.restoration,
            &config.upsampler,
            &config.segmentation,
        ]
        .iter()
        .any(|location| matches!(location, ModelLocation::Url { .. }));

        let downloader = if needs_download {
            Some(ModelDownloader::new()?)
        } else {
            None
        };

        Ok(Self {
            provider: config.execution_provider,
            intra_threads: config.intra_threads,
            downloader,
            show_progress: cfg!(feature = "cli"),
        })
    }

    /// Use a specific downloader, e.g. one with a custom cache directory
    #[must_use]
    pub fn with_downloader(mut self, downloader: ModelDownloader) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Local file backing `location`, downloading it if needed
    ///
    /// # Errors
    /// - Missing local file
    /// - Download or verification failures
    pub async fn resolve(&self, location: &ModelLocation) -> Result<PathBuf> {
        match location {
            ModelLocation::Path(path) => {
                if path.is_file() {
                    Ok(path.clone())
                } else {
                    Err(PipelineError::model_error_with_context(
                        "load",
                        path,
                        "file not found",
                        &["check the model path", "or pass an https:// URL to download it"],
                    ))
                }
            },
            ModelLocation::Url { url, sha256 } => {
                let downloader = match &self.downloader {
                    Some(downloader) => downloader,
                    None => {
                        return Err(PipelineError::internal(
                            "Model loader has no downloader for a URL location",
                        ))
                    },
                };
                downloader
                    .ensure_artifact(url, sha256.as_deref(), self.show_progress)
                    .await
            },
        }
    }

    /// Resolve `location` and open a session on it
    ///
    /// # Errors
    /// - Resolution failures
    /// - Session creation failures
    pub async fn session(&self, location: &ModelLocation) -> Result<OnnxModel> {
        let path = self.resolve(location).await?;
        log::debug!("Loading model {} from {}", location.display_name(), path.display());
        OnnxModel::from_file(&path, self.provider, self.intra_threads)
    }
}

/// Convert the first output of an image-to-image network back to pixels
pub(crate) fn first_image_output(
    outputs: Vec<ArrayD<f32>>,
    norm: &Normalization,
) -> Result<RgbImage> {
    let output = outputs
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::inference("Model produced no outputs"))?;
    let output = output.into_dimensionality::<Ix4>().map_err(|e| {
        PipelineError::inference(format!("Expected a 4D image output: {e}"))
    })?;
    from_nchw(output.view(), norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::tensor::to_nchw;
    use image::Rgb;
    use ndarray::ArrayD;

    #[test]
    fn test_first_image_output() {
        let image = RgbImage::from_fn(5, 3, |x, y| Rgb([(x * 50) as u8, (y * 80) as u8, 9]));
        let tensor = to_nchw(&image, &Normalization::SYMMETRIC).into_dyn();

        let decoded = first_image_output(vec![tensor], &Normalization::SYMMETRIC).unwrap();
        assert_eq!(decoded, image);
    }

    #[test]
    fn test_first_image_output_rejects_bad_shapes() {
        assert!(first_image_output(Vec::new(), &Normalization::UNIT).is_err());

        let flat = ArrayD::<f32>::zeros(vec![3, 4]);
        assert!(first_image_output(vec![flat], &Normalization::UNIT).is_err());
    }

    #[tokio::test]
    async fn test_missing_local_model() {
        let loader = ModelLoader::new(&ModelConfig::default()).unwrap();
        let err = loader
            .resolve(&ModelLocation::Path(PathBuf::from("/nonexistent/u2net.onnx")))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("file not found"));
    }
}
