//! Extension-based format hints. Dispatch always probes file contents; these
//! hints only feed diagnostics such as "looks like ONNX but no container
//! accepted it".
use super::model_trait::ModelFormat;
use std::path::Path;
use tracing::debug;

pub struct FormatDetector;

impl FormatDetector {
    const ALL: [ModelFormat; 3] = [ModelFormat::GGUF, ModelFormat::GGML, ModelFormat::ONNX];

    pub fn detect_from_path(path: &Path) -> Option<ModelFormat> {
        let extension = path.extension()?.to_str()?.to_lowercase();

        let format = if ModelFormat::GGUF.extensions().contains(&extension.as_str()) {
            Some(ModelFormat::GGUF)
        } else if extension == "ggml" {
            Some(ModelFormat::GGML)
        } else if extension == "bin" {
            // plain .bin is too generic unless the name says ggml
            path.file_name()
                .and_then(|n| n.to_str())
                .filter(|n| n.to_lowercase().contains("ggml"))
                .map(|_| ModelFormat::GGML)
        } else if ModelFormat::ONNX.extensions().contains(&extension.as_str()) {
            Some(ModelFormat::ONNX)
        } else {
            None
        };
        if let Some(fmt) = format {
            debug!("Extension hint: {} for file: {}", fmt.name(), path.display());
        }
        format
    }

    /// Diagnostic for a file that no container accepted.
    pub fn describe_mismatch(path: &Path) -> String {
        match Self::detect_from_path(path) {
            Some(fmt) => format!(
                "{} has a {} extension but no container recognized its contents",
                path.display(),
                fmt.name()
            ),
            None => format!(
                "{} is not a recognized model file (known extensions: {})",
                path.display(),
                Self::supported_extensions().join(", ")
            ),
        }
    }

    pub fn supported_extensions() -> Vec<String> {
        let mut exts = Vec::new();
        for format in &Self::ALL {
            for ext in format.extensions() {
                exts.push(ext.to_string());
            }
        }
        exts
    }
}
