//! Image utilities shared by the stages and the ONNX backends

pub mod matting;
pub mod tensor;
