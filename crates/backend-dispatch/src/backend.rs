// backend-dispatch/src/backend.rs
// Native inference backends known to the dispatcher and provisioner

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A native inference engine with its own shared-library payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// llama.cpp family, serves GGUF and legacy GGML files
    LlamaCpp,
    /// onnxruntime-genai, serves ONNX transformer exports
    Ort,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::LlamaCpp, Backend::Ort];

    /// Stable token used in payload and staging paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::LlamaCpp => "llama_cpp",
            Backend::Ort => "ort",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "llama_cpp" | "llama.cpp" | "llamacpp" => Ok(Backend::LlamaCpp),
            "ort" | "onnxruntime-genai" | "onnx" => Ok(Backend::Ort),
            other => Err(anyhow::anyhow!(
                "unknown backend '{}' (expected one of: llama_cpp, ort)",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_tokens_are_stable() {
        assert_eq!(Backend::LlamaCpp.as_str(), "llama_cpp");
        assert_eq!(Backend::Ort.to_string(), "ort");
    }

    #[test]
    fn test_backend_parses_aliases() {
        assert_eq!("llama.cpp".parse::<Backend>().unwrap(), Backend::LlamaCpp);
        assert_eq!(" ORT ".parse::<Backend>().unwrap(), Backend::Ort);
        assert_eq!("onnxruntime-genai".parse::<Backend>().unwrap(), Backend::Ort);
        assert!("tensorrt".parse::<Backend>().is_err());
    }
}
