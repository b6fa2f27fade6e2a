//! Capability contract shared by every decoded model, and the container
//! interface each backend implements.

use crate::backend::Backend;
use crate::error::ContainerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Seek};
use std::ops::Deref;
use std::str::FromStr;

/// Any seekable byte stream a model can be decoded from.
pub trait ByteSource: Read + Seek {}

impl<T: Read + Seek> ByteSource for T {}

/// Uniform metadata view over a decoded model.
///
/// Numeric accessors return `0` when the backend cannot determine a value.
/// Zero means "unknown", never a literal architectural value.
pub trait Model: Send + Sync + fmt::Debug {
    fn num_ctx(&self) -> u32;
    fn num_embed(&self) -> u32;
    fn num_head(&self) -> u32;
    /// Key/value heads; equal to `num_head` when the model does not use GQA.
    fn num_head_kv(&self) -> u32;
    fn num_layers(&self) -> u32;

    fn model_family(&self) -> &str;
    fn model_type(&self) -> &str;
    fn file_type(&self) -> &str;

    /// Query heads per kv head, or `0` when either count is unknown.
    fn num_gqa(&self) -> u32 {
        match (self.num_head(), self.num_head_kv()) {
            (0, _) | (_, 0) => 0,
            (head, kv) => head / kv,
        }
    }
}

/// On-disk container formats recognised by the built-in containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFormat {
    GGUF,
    GGML,
    ONNX,
}

impl ModelFormat {
    pub fn extensions(&self) -> &[&str] {
        match self {
            ModelFormat::GGUF => &["gguf"],
            ModelFormat::GGML => &["ggml", "bin"],
            ModelFormat::ONNX => &["onnx"],
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ModelFormat::GGUF => "GGUF (llama.cpp)",
            ModelFormat::GGML => "GGML (llama.cpp legacy)",
            ModelFormat::ONNX => "ONNX (onnxruntime-genai)",
        }
    }
}

/// Device the caller intends to execute the model on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionDevice {
    #[default]
    Cpu,
    Cuda,
    Rocm,
    Metal,
}

impl FromStr for ExecutionDevice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(ExecutionDevice::Cpu),
            "cuda" | "gpu" => Ok(ExecutionDevice::Cuda),
            "rocm" => Ok(ExecutionDevice::Rocm),
            "metal" => Ok(ExecutionDevice::Metal),
            other => Err(anyhow::anyhow!("unknown execution device '{}'", other)),
        }
    }
}

/// Backend-specific decode configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecodeOptions {
    pub device: ExecutionDevice,
}

/// A pluggable decoder for one native engine's file format.
///
/// Implementations are stateless: `decode` may run concurrently for
/// different sources. A source that does not carry the container's
/// signature yields [`ContainerError::NotRecognized`]; each container
/// documents where that boundary lies.
pub trait Container: Send + Sync {
    /// Stable name token, e.g. `"gguf"`.
    fn name(&self) -> &'static str;

    fn backend(&self) -> Backend;

    fn format(&self) -> ModelFormat;

    fn decode(
        &self,
        source: &mut dyn ByteSource,
        options: &DecodeOptions,
    ) -> Result<Box<dyn Model>, ContainerError>;
}

/// A model handle together with the container that produced it.
#[derive(Debug)]
pub struct DecodedModel {
    pub container: &'static str,
    pub backend: Backend,
    model: Box<dyn Model>,
}

impl DecodedModel {
    pub fn new(container: &'static str, backend: Backend, model: Box<dyn Model>) -> Self {
        Self {
            container,
            backend,
            model,
        }
    }

    pub fn into_inner(self) -> Box<dyn Model> {
        self.model
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            container: self.container.to_string(),
            backend: self.backend,
            model_family: self.model.model_family().to_string(),
            model_type: self.model.model_type().to_string(),
            file_type: self.model.file_type().to_string(),
            num_ctx: self.model.num_ctx(),
            num_embed: self.model.num_embed(),
            num_head: self.model.num_head(),
            num_head_kv: self.model.num_head_kv(),
            num_gqa: self.model.num_gqa(),
            num_layers: self.model.num_layers(),
        }
    }
}

impl Deref for DecodedModel {
    type Target = dyn Model;

    fn deref(&self) -> &Self::Target {
        self.model.as_ref()
    }
}

/// Serializable snapshot of a decoded model's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub container: String,
    pub backend: Backend,
    pub model_family: String,
    pub model_type: String,
    pub file_type: String,
    pub num_ctx: u32,
    pub num_embed: u32,
    pub num_head: u32,
    pub num_head_kv: u32,
    pub num_gqa: u32,
    pub num_layers: u32,
}
