//! Backend implementations of the model capabilities
//!
//! Only ONNX Runtime is provided. The capability traits in `inference`
//! are the seam for other engines and for test doubles.

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "onnx")]
pub use self::onnx::{
    GfpganEnhancer, ModelLoader, OnnxModel, RealEsrganUpsampler, RetinaFaceDetector,
    U2NetSegmenter,
};
