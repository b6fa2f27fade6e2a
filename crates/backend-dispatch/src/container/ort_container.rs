//! ORT Container
//!
//! Recognises ONNX `ModelProto` files served by onnxruntime-genai. The
//! top-level protobuf fields are walked without decoding the graph, which
//! is skipped by length; this also proves every field lies inside the file.
//!
//! Classification boundary: recognized only when the file starts with the
//! `ir_version` key (field 1, varint) followed by a complete varint in
//! `1..=MAX_IR_VERSION`. After that, broken framing, a length running past
//! the end of input, or a missing graph is malformed.

use super::model_trait::*;
use super::reader::Reader;
use crate::backend::Backend;
use crate::error::ContainerError;
use std::collections::HashMap;
use std::io::{self, Cursor};
use tracing::debug;

const IR_VERSION_KEY: u8 = 0x08;
const MAX_IR_VERSION: u64 = 12;
const MAX_METADATA_ENTRY: u64 = 1 << 20;

const FIELD_PRODUCER_NAME: u64 = 2;
const FIELD_GRAPH: u64 = 7;
const FIELD_METADATA_PROPS: u64 = 14;

pub const ORT_MODEL_FAMILY: &str = "ort_transformers_1.18.0";
pub const ORT_MODEL_TYPE: &str = "transformers";
pub const ORT_FILE_TYPE: &str = "onnx";

/// A decoded ONNX transformer export.
#[derive(Debug, Clone)]
pub struct OrtModel {
    device: ExecutionDevice,
    ir_version: u64,
    producer: Option<String>,
    props: HashMap<String, String>,
}

impl OrtModel {
    /// Device the model was decoded for; selects the execution provider.
    pub fn device(&self) -> ExecutionDevice {
        self.device
    }

    pub fn ir_version(&self) -> u64 {
        self.ir_version
    }

    pub fn producer(&self) -> Option<&str> {
        self.producer.as_deref()
    }

    pub fn metadata_prop(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    fn prop_u32(&self, keys: &[&str]) -> Option<u32> {
        keys.iter()
            .filter_map(|k| self.props.get(*k))
            .find_map(|v| v.trim().parse::<u64>().ok())
            .map(|v| v.min(u32::MAX as u64) as u32)
    }
}

impl Model for OrtModel {
    fn num_ctx(&self) -> u32 {
        self.prop_u32(&["max_position_embeddings", "context_length"])
            .unwrap_or(0)
    }

    fn num_embed(&self) -> u32 {
        self.prop_u32(&["hidden_size"]).unwrap_or(0)
    }

    fn num_head(&self) -> u32 {
        self.prop_u32(&["num_attention_heads"]).unwrap_or(0)
    }

    fn num_head_kv(&self) -> u32 {
        self.prop_u32(&["num_key_value_heads"])
            .unwrap_or_else(|| self.num_head())
    }

    fn num_layers(&self) -> u32 {
        self.prop_u32(&["num_hidden_layers"]).unwrap_or(0)
    }

    fn model_family(&self) -> &str {
        ORT_MODEL_FAMILY
    }

    fn model_type(&self) -> &str {
        ORT_MODEL_TYPE
    }

    fn file_type(&self) -> &str {
        ORT_FILE_TYPE
    }
}

/// Outcome of reading a varint that may legitimately hit end of input.
enum Varint {
    Value(u64),
    Eof,
}

fn read_varint(r: &mut Reader<'_>) -> io::Result<Varint> {
    let mut value: u64 = 0;
    for i in 0..10 {
        let byte = match r.read_u8() {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && i == 0 => {
                return Ok(Varint::Eof)
            }
            Err(e) => return Err(e),
        };
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Varint::Value(value));
        }
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "varint longer than 10 bytes"))
}

/// Reads a varint that must be present.
fn expect_varint(r: &mut Reader<'_>, what: &str) -> Result<u64, ContainerError> {
    match read_varint(r) {
        Ok(Varint::Value(v)) => Ok(v),
        Ok(Varint::Eof) => Err(ContainerError::malformed(format!("missing {}", what))),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            Err(ContainerError::malformed(format!("{}: {}", what, e)))
        }
        Err(e) => Err(ContainerError::after_recognition(e, what)),
    }
}

/// Skips one field body of the given wire type.
fn skip_field(r: &mut Reader<'_>, field: u64, wire_type: u64) -> Result<(), ContainerError> {
    let what = format!("field {}", field);
    match wire_type {
        0 => expect_varint(r, &what).map(|_| ()),
        1 => r.skip(8).map_err(|e| ContainerError::after_recognition(e, &what)),
        2 => {
            let len = expect_varint(r, &what)?;
            r.skip(len).map_err(|_| {
                ContainerError::malformed(format!("{} runs past end of input", what))
            })
        }
        5 => r.skip(4).map_err(|e| ContainerError::after_recognition(e, &what)),
        other => Err(ContainerError::malformed(format!(
            "{} uses unsupported wire type {}",
            what, other
        ))),
    }
}

fn length_delimited(r: &mut Reader<'_>, what: &str) -> Result<Vec<u8>, ContainerError> {
    let len = expect_varint(r, what)?;
    r.read_bytes(len)
        .map_err(|_| ContainerError::malformed(format!("{} runs past end of input", what)))
}

/// Parses a `StringStringEntryProto` body into (key, value).
fn parse_entry(bytes: Vec<u8>) -> Result<(String, String), ContainerError> {
    let mut cur = Cursor::new(bytes);
    let mut r = Reader::new(&mut cur)?;
    let mut key = String::new();
    let mut value = String::new();
    loop {
        let tag = match read_varint(&mut r) {
            Ok(Varint::Value(tag)) => tag,
            Ok(Varint::Eof) => break,
            Err(e) => return Err(ContainerError::malformed(format!("metadata entry: {}", e))),
        };
        match (tag >> 3, tag & 7) {
            (1, 2) | (2, 2) => {
                let bytes = length_delimited(&mut r, "metadata entry")?;
                let text = String::from_utf8(bytes).map_err(|_| {
                    ContainerError::malformed("metadata entry is not valid UTF-8")
                })?;
                if tag >> 3 == 1 {
                    key = text;
                } else {
                    value = text;
                }
            }
            (field, wire) => skip_field(&mut r, field, wire)?,
        }
    }
    Ok((key, value))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OrtContainer;

impl OrtContainer {
    pub fn new() -> Self {
        Self
    }
}

impl Container for OrtContainer {
    fn name(&self) -> &'static str {
        "ort"
    }

    fn backend(&self) -> Backend {
        Backend::Ort
    }

    fn format(&self) -> ModelFormat {
        ModelFormat::ONNX
    }

    fn decode(
        &self,
        source: &mut dyn ByteSource,
        options: &DecodeOptions,
    ) -> Result<Box<dyn Model>, ContainerError> {
        let mut r = Reader::new(source)?;

        match r.read_u8() {
            Ok(IR_VERSION_KEY) => {}
            Ok(_) => return Err(ContainerError::NotRecognized),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(ContainerError::NotRecognized)
            }
            Err(e) => return Err(e.into()),
        }
        let ir_version = match read_varint(&mut r) {
            Ok(Varint::Value(v)) if (1..=MAX_IR_VERSION).contains(&v) => v,
            Ok(_) => return Err(ContainerError::NotRecognized),
            Err(e) if matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData
            ) =>
            {
                return Err(ContainerError::NotRecognized)
            }
            Err(e) => return Err(e.into()),
        };

        let mut producer = None;
        let mut props = HashMap::new();
        let mut has_graph = false;

        loop {
            let tag = match read_varint(&mut r) {
                Ok(Varint::Value(tag)) => tag,
                Ok(Varint::Eof) => break,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    return Err(ContainerError::malformed(format!("field key: {}", e)))
                }
                Err(e) => return Err(ContainerError::after_recognition(e, "field key")),
            };
            let (field, wire_type) = (tag >> 3, tag & 7);
            if field == 0 {
                return Err(ContainerError::malformed("field number 0"));
            }

            match (field, wire_type) {
                (FIELD_PRODUCER_NAME, 2) => {
                    let bytes = length_delimited(&mut r, "producer_name")?;
                    producer = Some(String::from_utf8_lossy(&bytes).into_owned());
                }
                (FIELD_METADATA_PROPS, 2) => {
                    let len = expect_varint(&mut r, "metadata_props")?;
                    if len > MAX_METADATA_ENTRY {
                        r.skip(len).map_err(|_| {
                            ContainerError::malformed("metadata_props runs past end of input")
                        })?;
                        continue;
                    }
                    let bytes = r.read_bytes(len).map_err(|_| {
                        ContainerError::malformed("metadata_props runs past end of input")
                    })?;
                    let (key, value) = parse_entry(bytes)?;
                    props.insert(key, value);
                }
                (FIELD_GRAPH, 2) => {
                    has_graph = true;
                    skip_field(&mut r, field, wire_type)?;
                }
                _ => skip_field(&mut r, field, wire_type)?,
            }
        }

        if !has_graph {
            return Err(ContainerError::malformed("model has no graph"));
        }
        r.touch_end()
            .map_err(|e| ContainerError::after_recognition(e, "model body"))?;

        debug!(
            "ONNX ir_version {} producer {:?}, {} metadata props",
            ir_version,
            producer,
            props.len()
        );

        Ok(Box::new(OrtModel {
            device: options.device,
            ir_version,
            producer,
            props,
        }))
    }
}
