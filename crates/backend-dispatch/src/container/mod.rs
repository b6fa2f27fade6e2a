//! Model containers: format recognition and metadata decoding.
//!
//! Architecture:
//! - Each on-disk format has its own container implementing [`Container`]
//! - Every container yields a [`Model`] exposing the same capability accessors
//! - [`ContainerRegistry`] probes containers in a fixed order
pub mod model_trait;
pub mod reader;
pub mod gguf_container;
pub mod ggml_container;
pub mod ort_container;
pub mod format_detector;
pub mod registry;
pub use model_trait::{
    ByteSource, Container, DecodeOptions, DecodedModel, ExecutionDevice, Model, ModelFormat,
    ModelInfo,
};
pub use gguf_container::{GgufContainer, GgufModel, GgufValue};
pub use ggml_container::{GgmlContainer, GgmlModel};
pub use ort_container::{OrtContainer, OrtModel};
pub use format_detector::FormatDetector;
pub use registry::ContainerRegistry;
