//! Stateless helper services used by the pipeline

pub mod format;

pub use format::ImageCodec;
