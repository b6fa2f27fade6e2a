//! Container Registry
//!
//! Dispatches a byte source to the first container that recognises it.
//! Containers are probed in registration order; a container that claims
//! the artifact but fails to parse it ends the search, so corruption is
//! never reported as an unknown format.

use super::format_detector::FormatDetector;
use super::model_trait::*;
use super::reader::source_len;
use super::{GgmlContainer, GgufContainer, OrtContainer};
use crate::error::{ContainerError, DecodeError};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ordered set of containers. Cheap to clone and safe to share across
/// threads; decoding never mutates it.
#[derive(Clone)]
pub struct ContainerRegistry {
    containers: Vec<Arc<dyn Container>>,
}

impl ContainerRegistry {
    /// Registry with the built-in containers, cheapest and most specific
    /// signature first: `gguf`, `ggml`, `ort`.
    pub fn new() -> Self {
        Self::empty()
            .register(GgufContainer::new())
            .register(GgmlContainer::new())
            .register(OrtContainer::new())
    }

    pub fn empty() -> Self {
        Self {
            containers: Vec::new(),
        }
    }

    /// Appends a container; it is probed after every container registered before it.
    pub fn register(mut self, container: impl Container + 'static) -> Self {
        self.containers.push(Arc::new(container));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.containers.iter().map(|c| c.name()).collect()
    }

    pub fn decode<R: Read + Seek>(&self, source: &mut R) -> Result<DecodedModel, DecodeError> {
        self.decode_with(source, &DecodeOptions::default())
    }

    /// Decode `source` from its current position.
    ///
    /// On `UnrecognizedFormat` and `MalformedArtifact` the position is put
    /// back where it was. On success it is left wherever the container
    /// stopped.
    pub fn decode_with<R: Read + Seek>(
        &self,
        source: &mut R,
        options: &DecodeOptions,
    ) -> Result<DecodedModel, DecodeError> {
        let source: &mut dyn ByteSource = source;
        let start = source.stream_position()?;
        if source_len(source)? <= start {
            return Err(DecodeError::MalformedArtifact {
                container: None,
                reason: "artifact is empty".to_string(),
            });
        }

        for container in &self.containers {
            source.seek(SeekFrom::Start(start))?;
            match container.decode(source, options) {
                Ok(model) => {
                    info!(
                        "Decoded {} model ({} {} {}) via {} container",
                        container.format().name(),
                        model.model_family(),
                        model.model_type(),
                        model.file_type(),
                        container.name()
                    );
                    return Ok(DecodedModel::new(container.name(), container.backend(), model));
                }
                Err(ContainerError::NotRecognized) => {
                    debug!("{} container did not recognize artifact", container.name());
                }
                Err(ContainerError::Malformed { reason }) => {
                    source.seek(SeekFrom::Start(start))?;
                    return Err(DecodeError::MalformedArtifact {
                        container: Some(container.name()),
                        reason,
                    });
                }
                Err(ContainerError::Io(e)) => {
                    // best effort; the original error is the one worth reporting
                    let _ = source.seek(SeekFrom::Start(start));
                    return Err(DecodeError::Io(e));
                }
            }
        }

        source.seek(SeekFrom::Start(start))?;
        Err(DecodeError::UnrecognizedFormat {
            probed: self.names(),
        })
    }

    /// Open and decode a model file.
    pub fn decode_path(
        &self,
        path: &Path,
        options: &DecodeOptions,
    ) -> Result<DecodedModel, DecodeError> {
        let mut reader = BufReader::new(File::open(path)?);
        let result = self.decode_with(&mut reader, options);
        if let Err(DecodeError::UnrecognizedFormat { .. }) = &result {
            warn!("{}", FormatDetector::describe_mismatch(path));
        }
        result
    }
}

impl Default for ContainerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::container::ggml_container::tests::ggjt_fixture;
    use crate::container::gguf_container::tests::llama_fixture;
    use crate::container::ort_container::tests::onnx_fixture;
    use crate::container::ort_container::{ORT_FILE_TYPE, ORT_MODEL_FAMILY, ORT_MODEL_TYPE};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Claims every artifact; counts how often it was asked.
    #[derive(Default)]
    struct Greedy {
        calls: Arc<AtomicUsize>,
    }

    #[derive(Debug)]
    struct Empty;

    impl Model for Empty {
        fn num_ctx(&self) -> u32 { 0 }
        fn num_embed(&self) -> u32 { 0 }
        fn num_head(&self) -> u32 { 0 }
        fn num_head_kv(&self) -> u32 { 0 }
        fn num_layers(&self) -> u32 { 0 }
        fn model_family(&self) -> &str { "greedy" }
        fn model_type(&self) -> &str { "greedy" }
        fn file_type(&self) -> &str { "greedy" }
    }

    impl Container for Greedy {
        fn name(&self) -> &'static str { "greedy" }
        fn backend(&self) -> Backend { Backend::Ort }
        fn format(&self) -> ModelFormat { ModelFormat::ONNX }
        fn decode(
            &self,
            source: &mut dyn ByteSource,
            _options: &DecodeOptions,
        ) -> Result<Box<dyn Model>, ContainerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            source.seek(SeekFrom::End(0))?;
            Ok(Box::new(Empty))
        }
    }

    #[test]
    fn test_default_container_order() {
        assert_eq!(ContainerRegistry::new().names(), vec!["gguf", "ggml", "ort"]);
    }

    #[test]
    fn test_each_backend_decodes_with_its_constants() {
        let registry = ContainerRegistry::new();

        let gguf = registry.decode(&mut Cursor::new(llama_fixture())).unwrap();
        assert_eq!(gguf.container, "gguf");
        assert_eq!(gguf.backend, Backend::LlamaCpp);
        assert_eq!(gguf.model_family(), "llama");

        let ggml = registry.decode(&mut Cursor::new(ggjt_fixture(3, 40))).unwrap();
        assert_eq!(ggml.container, "ggml");
        assert_eq!(ggml.model_type(), "13B");

        let ort = registry.decode(&mut Cursor::new(onnx_fixture(&[]))).unwrap();
        assert_eq!(ort.container, "ort");
        assert_eq!(ort.backend, Backend::Ort);
        assert_eq!(ort.model_family(), ORT_MODEL_FAMILY);
        assert_eq!(ort.model_type(), ORT_MODEL_TYPE);
        assert_eq!(ort.file_type(), ORT_FILE_TYPE);
    }

    #[test]
    fn test_zero_byte_source_is_malformed() {
        let err = ContainerRegistry::new()
            .decode(&mut Cursor::new(Vec::<u8>::new()))
            .unwrap_err();
        assert!(err.is_malformed(), "{err}");
    }

    #[test]
    fn test_unrecognized_restores_position() {
        let mut cur = Cursor::new(b"#!/bin/sh\necho not a model\n".to_vec());
        cur.set_position(2);
        let err = ContainerRegistry::new().decode(&mut cur).unwrap_err();
        assert!(err.is_unrecognized());
        assert_eq!(cur.position(), 2);
        assert!(err.to_string().contains("gguf, ggml, ort"));
    }

    #[test]
    fn test_malformed_is_not_masked_by_later_containers() {
        let greedy = Greedy::default();
        let calls = greedy.calls.clone();
        let registry = ContainerRegistry::new().register(greedy);

        let mut bytes = llama_fixture();
        bytes.truncate(bytes.len() - 8);
        let mut cur = Cursor::new(bytes);
        match registry.decode(&mut cur).unwrap_err() {
            DecodeError::MalformedArtifact { container, .. } => {
                assert_eq!(container, Some("gguf"))
            }
            other => panic!("expected malformed, got {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cur.position(), 0);
    }

    #[test]
    fn test_stops_at_first_match() {
        let greedy = Greedy::default();
        let calls = greedy.calls.clone();
        let registry = ContainerRegistry::new().register(greedy);

        registry.decode(&mut Cursor::new(onnx_fixture(&[]))).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let decoded = registry.decode(&mut Cursor::new(b"plain text".to_vec())).unwrap();
        assert_eq!(decoded.container, "greedy");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_registry_reports_unrecognized() {
        let err = ContainerRegistry::empty()
            .decode(&mut Cursor::new(llama_fixture()))
            .unwrap_err();
        assert!(err.is_unrecognized());
    }

    #[test]
    fn test_concurrent_decodes_share_registry() {
        let registry = Arc::new(ContainerRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let bytes = if i % 2 == 0 { llama_fixture() } else { onnx_fixture(&[]) };
                    registry.decode(&mut Cursor::new(bytes)).map(|m| m.container)
                })
            })
            .collect();
        for (i, h) in handles.into_iter().enumerate() {
            let container = h.join().unwrap().unwrap();
            assert_eq!(container, if i % 2 == 0 { "gguf" } else { "ort" });
        }
    }

    #[test]
    fn test_decode_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.gguf");
        std::fs::write(&path, llama_fixture()).unwrap();
        let decoded = ContainerRegistry::new()
            .decode_path(&path, &DecodeOptions::default())
            .unwrap();
        assert_eq!(decoded.info().num_layers, 2);
    }

    #[test]
    fn test_decode_path_missing_file_is_io() {
        let err = ContainerRegistry::new()
            .decode_path(Path::new("/definitely/not/here.gguf"), &DecodeOptions::default())
            .unwrap_err();
        assert!(matches!(err, DecodeError::Io(_)));
    }
}
