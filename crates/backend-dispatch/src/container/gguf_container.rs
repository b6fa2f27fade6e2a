//! GGUF Container
//!
//! Recognises llama.cpp GGUF files and reads their key/value metadata and
//! tensor table. Tensor data itself is never read; the table is only used
//! to count parameters and to check that every tensor lies inside the file.
//!
//! Classification boundary:
//! - not recognized: the first four bytes are neither `GGUF` nor the
//!   byte-swapped `FUGG`
//! - malformed: anything wrong after that (unsupported version, truncated
//!   header, metadata or tensor table, unknown value or tensor type,
//!   invalid UTF-8, tensor data running past the end of the file)

use super::model_trait::*;
use super::reader::Reader;
use crate::backend::Backend;
use crate::error::ContainerError;
use std::collections::HashMap;
use std::io;
use tracing::debug;

const MAGIC_LE: [u8; 4] = *b"GGUF";
const MAGIC_BE: [u8; 4] = *b"FUGG";
const DEFAULT_ALIGNMENT: u64 = 32;
/// Real files never nest arrays more than one level.
const MAX_ARRAY_DEPTH: u32 = 8;

/// Metadata value as kept on the decoded model. Arrays are summarised,
/// never materialised, so tokenizer vocabularies cost nothing to hold.
#[derive(Debug, Clone, PartialEq)]
pub enum GgufValue {
    Uint(u64),
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Array {
        len: u64,
        /// Largest element for integer arrays, e.g. per-layer head counts
        max: Option<u64>,
    },
}

impl GgufValue {
    fn as_u64(&self) -> Option<u64> {
        match self {
            GgufValue::Uint(v) => Some(*v),
            GgufValue::Int(v) if *v >= 0 => Some(*v as u64),
            GgufValue::Array { max, .. } => *max,
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GgufValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A decoded GGUF model.
#[derive(Debug, Clone)]
pub struct GgufModel {
    version: u32,
    metadata: HashMap<String, GgufValue>,
    tensor_count: u64,
    parameter_count: u64,
    family: String,
    model_type: String,
    file_type: String,
}

impl GgufModel {
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn tensor_count(&self) -> u64 {
        self.tensor_count
    }

    pub fn parameter_count(&self) -> u64 {
        self.parameter_count
    }

    pub fn metadata(&self, key: &str) -> Option<&GgufValue> {
        self.metadata.get(key)
    }

    fn arch_u32(&self, suffix: &str) -> Option<u32> {
        let key = format!("{}.{}", self.family, suffix);
        self.metadata
            .get(&key)
            .and_then(GgufValue::as_u64)
            .map(|v| v.min(u32::MAX as u64) as u32)
    }
}

impl Model for GgufModel {
    fn num_ctx(&self) -> u32 {
        self.arch_u32("context_length").unwrap_or(0)
    }

    fn num_embed(&self) -> u32 {
        self.arch_u32("embedding_length").unwrap_or(0)
    }

    fn num_head(&self) -> u32 {
        self.arch_u32("attention.head_count").unwrap_or(0)
    }

    fn num_head_kv(&self) -> u32 {
        self.arch_u32("attention.head_count_kv")
            .unwrap_or_else(|| self.num_head())
    }

    fn num_layers(&self) -> u32 {
        self.arch_u32("block_count").unwrap_or(0)
    }

    fn model_family(&self) -> &str {
        &self.family
    }

    fn model_type(&self) -> &str {
        &self.model_type
    }

    fn file_type(&self) -> &str {
        &self.file_type
    }
}

/// Quantisation names for `general.file_type` / legacy `ftype`.
pub(crate) fn file_type_name(file_type: u32) -> &'static str {
    match file_type {
        0 => "F32",
        1 => "F16",
        2 => "Q4_0",
        3 => "Q4_1",
        4 => "Q4_1_F16",
        7 => "Q8_0",
        8 => "Q5_0",
        9 => "Q5_1",
        10 => "Q2_K",
        11 => "Q3_K_S",
        12 => "Q3_K_M",
        13 => "Q3_K_L",
        14 => "Q4_K_S",
        15 => "Q4_K_M",
        16 => "Q5_K_S",
        17 => "Q5_K_M",
        18 => "Q6_K",
        19 => "IQ2_XXS",
        20 => "IQ2_XS",
        21 => "Q2_K_S",
        22 => "IQ3_XS",
        23 => "IQ3_XXS",
        24 => "IQ1_S",
        25 => "IQ4_NL",
        26 => "IQ3_S",
        27 => "IQ3_M",
        28 => "IQ2_S",
        29 => "IQ2_M",
        30 => "IQ4_XS",
        31 => "IQ1_M",
        32 => "BF16",
        _ => "unknown",
    }
}

/// (elements per block, bytes per block) for a ggml tensor type.
fn tensor_block_layout(ggml_type: u32) -> Option<(u64, u64)> {
    let layout = match ggml_type {
        0 => (1, 4),
        1 => (1, 2),
        2 => (32, 18),
        3 => (32, 20),
        6 => (32, 22),
        7 => (32, 24),
        8 => (32, 34),
        9 => (32, 36),
        10 => (256, 84),
        11 => (256, 110),
        12 => (256, 144),
        13 => (256, 176),
        14 => (256, 210),
        15 => (256, 292),
        16 => (256, 66),
        17 => (256, 74),
        18 => (256, 98),
        19 => (256, 50),
        20 => (32, 18),
        21 => (256, 110),
        22 => (256, 82),
        23 => (256, 136),
        24 => (1, 1),
        25 => (1, 2),
        26 => (1, 4),
        27 => (1, 8),
        28 => (1, 8),
        29 => (256, 56),
        30 => (1, 2),
        _ => return None,
    };
    Some(layout)
}

/// Parameter count in the short form used for model types, e.g. `7B`, `6.7B`, `137M`.
pub(crate) fn human_parameter_count(n: u64) -> String {
    const UNITS: [(u64, &str); 4] = [
        (1_000_000_000_000, "T"),
        (1_000_000_000, "B"),
        (1_000_000, "M"),
        (1_000, "K"),
    ];
    if n == 0 {
        return "unknown".to_string();
    }
    for (scale, unit) in UNITS {
        if n >= scale {
            let tenths = (n as f64 / scale as f64 * 10.0).round() as u64;
            return if tenths % 10 == 0 {
                format!("{}{}", tenths / 10, unit)
            } else {
                format!("{}.{}{}", tenths / 10, tenths % 10, unit)
            };
        }
    }
    n.to_string()
}

/// Container for `.gguf` files.
#[derive(Debug, Default, Clone, Copy)]
pub struct GgufContainer;

impl GgufContainer {
    pub fn new() -> Self {
        Self
    }
}

struct Parser<'r, 'a> {
    r: &'r mut Reader<'a>,
    version: u32,
}

impl<'r, 'a> Parser<'r, 'a> {
    fn len_field(&mut self, what: &str) -> Result<u64, ContainerError> {
        let v = if self.version == 1 {
            self.r.read_u32().map(u64::from)
        } else {
            self.r.read_u64()
        };
        v.map_err(|e| ContainerError::after_recognition(e, what))
    }

    fn string(&mut self, what: &str) -> Result<String, ContainerError> {
        let len = self.len_field(what)?;
        let bytes = self
            .r
            .read_bytes(len)
            .map_err(|e| ContainerError::after_recognition(e, what))?;
        String::from_utf8(bytes)
            .map_err(|_| ContainerError::malformed(format!("{} is not valid UTF-8", what)))
    }

    fn skip_string(&mut self, what: &str) -> Result<(), ContainerError> {
        let len = self.len_field(what)?;
        self.r
            .skip(len)
            .map_err(|e| ContainerError::after_recognition(e, what))
    }

    fn value(&mut self, value_type: u32, key: &str) -> Result<GgufValue, ContainerError> {
        let r = &mut *self.r;
        let v = match value_type {
            0 => r.read_u8().map(|v| GgufValue::Uint(v.into())),
            1 => r.read_i8().map(|v| GgufValue::Int(v.into())),
            2 => r.read_u16().map(|v| GgufValue::Uint(v.into())),
            3 => r.read_i16().map(|v| GgufValue::Int(v.into())),
            4 => r.read_u32().map(|v| GgufValue::Uint(v.into())),
            5 => r.read_i32().map(|v| GgufValue::Int(v.into())),
            6 => r.read_f32().map(|v| GgufValue::Float(v.into())),
            7 => r.read_u8().map(|v| GgufValue::Bool(v != 0)),
            8 => return self.string(key).map(GgufValue::String),
            9 => return self.array(key, 0),
            10 => r.read_u64().map(GgufValue::Uint),
            11 => r.read_i64().map(GgufValue::Int),
            12 => r.read_f64().map(GgufValue::Float),
            other => {
                return Err(ContainerError::malformed(format!(
                    "unknown value type {} for key '{}'",
                    other, key
                )))
            }
        };
        v.map_err(|e| ContainerError::after_recognition(e, key))
    }

    fn array(&mut self, key: &str, depth: u32) -> Result<GgufValue, ContainerError> {
        if depth >= MAX_ARRAY_DEPTH {
            return Err(ContainerError::malformed(format!(
                "array '{}' nested more than {} levels deep",
                key, MAX_ARRAY_DEPTH
            )));
        }
        let elem_type = self
            .r
            .read_u32()
            .map_err(|e| ContainerError::after_recognition(e, key))?;
        let len = self.len_field(key)?;
        // every element occupies at least one byte
        if len > self.r.remaining() {
            return Err(ContainerError::malformed(format!(
                "array '{}' declares {} elements past end of file",
                key, len
            )));
        }

        let fixed_width = match elem_type {
            0 | 1 | 7 => Some(1),
            2 | 3 => Some(2),
            4 | 5 | 6 => Some(4),
            10 | 11 | 12 => Some(8),
            _ => None,
        };
        let integral = matches!(elem_type, 0..=5 | 10 | 11);

        let mut max = None;
        match (elem_type, fixed_width) {
            (8, _) => {
                for _ in 0..len {
                    self.skip_string(key)?;
                }
            }
            (_, Some(_)) if integral => {
                for _ in 0..len {
                    if let Some(v) = self.value(elem_type, key)?.as_u64() {
                        max = Some(max.map_or(v, |m: u64| m.max(v)));
                    }
                }
            }
            (_, Some(width)) => {
                let bytes = len
                    .checked_mul(width)
                    .ok_or_else(|| ContainerError::malformed(format!("array '{}' too large", key)))?;
                self.r
                    .skip(bytes)
                    .map_err(|e| ContainerError::after_recognition(e, key))?;
            }
            (9, _) => {
                for _ in 0..len {
                    self.array(key, depth + 1)?;
                }
            }
            (other, None) => {
                return Err(ContainerError::malformed(format!(
                    "unknown array element type {} for key '{}'",
                    other, key
                )))
            }
        }
        Ok(GgufValue::Array { len, max })
    }
}

impl Container for GgufContainer {
    fn name(&self) -> &'static str {
        "gguf"
    }

    fn backend(&self) -> Backend {
        Backend::LlamaCpp
    }

    fn format(&self) -> ModelFormat {
        ModelFormat::GGUF
    }

    fn decode(
        &self,
        source: &mut dyn ByteSource,
        _options: &DecodeOptions,
    ) -> Result<Box<dyn Model>, ContainerError> {
        let mut r = Reader::new(source)?;

        let mut magic = [0u8; 4];
        for b in magic.iter_mut() {
            *b = match r.read_u8() {
                Ok(b) => b,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(ContainerError::NotRecognized)
                }
                Err(e) => return Err(e.into()),
            };
        }
        let big_endian = match magic {
            MAGIC_LE => false,
            MAGIC_BE => true,
            _ => return Err(ContainerError::NotRecognized),
        };
        r.set_big_endian(big_endian);

        let mut version = r
            .read_u32()
            .map_err(|e| ContainerError::after_recognition(e, "version"))?;
        // big-endian writers keep the `GGUF` magic but swap every field after it
        if !big_endian && version > 0xFFFF && version.swap_bytes() <= 3 {
            r.set_big_endian(true);
            version = version.swap_bytes();
        }
        if !(1..=3).contains(&version) {
            return Err(ContainerError::malformed(format!(
                "unsupported GGUF version {}",
                version
            )));
        }

        let mut p = Parser { r: &mut r, version };
        let tensor_count = p.len_field("tensor count")?;
        let kv_count = p.len_field("metadata count")?;
        if tensor_count > p.r.remaining() || kv_count > p.r.remaining() {
            return Err(ContainerError::malformed(format!(
                "header declares {} tensors and {} metadata entries, more than the file can hold",
                tensor_count, kv_count
            )));
        }

        let mut metadata = HashMap::new();
        for _ in 0..kv_count {
            let key = p.string("metadata key")?;
            let value_type = p
                .r
                .read_u32()
                .map_err(|e| ContainerError::after_recognition(e, "metadata value type"))?;
            let value = p.value(value_type, &key)?;
            metadata.insert(key, value);
        }

        let mut parameter_count: u64 = 0;
        let mut data_end: u64 = 0;
        for _ in 0..tensor_count {
            let name = p.string("tensor name")?;
            let n_dims = p
                .r
                .read_u32()
                .map_err(|e| ContainerError::after_recognition(e, &name))?;
            if n_dims > 8 {
                return Err(ContainerError::malformed(format!(
                    "tensor '{}' has {} dimensions",
                    name, n_dims
                )));
            }
            let mut elements: u64 = 1;
            for _ in 0..n_dims {
                let dim = p.len_field(&name)?;
                elements = elements.checked_mul(dim).ok_or_else(|| {
                    ContainerError::malformed(format!("tensor '{}' shape overflows", name))
                })?;
            }
            let ggml_type = p
                .r
                .read_u32()
                .map_err(|e| ContainerError::after_recognition(e, &name))?;
            let offset = p
                .r
                .read_u64()
                .map_err(|e| ContainerError::after_recognition(e, &name))?;

            let (block, block_bytes) = tensor_block_layout(ggml_type).ok_or_else(|| {
                ContainerError::malformed(format!(
                    "tensor '{}' has unknown type {}",
                    name, ggml_type
                ))
            })?;
            if elements % block != 0 {
                return Err(ContainerError::malformed(format!(
                    "tensor '{}' has {} elements, not a multiple of block size {}",
                    name, elements, block
                )));
            }
            let size = (elements / block)
                .checked_mul(block_bytes)
                .and_then(|s| s.checked_add(offset))
                .ok_or_else(|| {
                    ContainerError::malformed(format!("tensor '{}' size overflows", name))
                })?;
            data_end = data_end.max(size);
            parameter_count = parameter_count.saturating_add(elements);
        }

        let alignment = metadata
            .get("general.alignment")
            .and_then(GgufValue::as_u64)
            .filter(|a| *a > 0)
            .unwrap_or(DEFAULT_ALIGNMENT);
        let data_start = r.position().div_ceil(alignment) * alignment;
        if tensor_count > 0 && data_start.saturating_add(data_end) > r.len() {
            return Err(ContainerError::malformed(format!(
                "tensor data needs {} bytes but file is {} bytes",
                data_start.saturating_add(data_end),
                r.len()
            )));
        }
        r.touch_end()
            .map_err(|e| ContainerError::after_recognition(e, "tensor data"))?;

        let family = metadata
            .get("general.architecture")
            .and_then(GgufValue::as_str)
            .unwrap_or("unknown")
            .to_string();
        let file_type = metadata
            .get("general.file_type")
            .and_then(GgufValue::as_u64)
            .map(|ft| file_type_name(ft.min(u32::MAX as u64) as u32))
            .unwrap_or("unknown")
            .to_string();

        debug!(
            "GGUF v{}: {} metadata entries, {} tensors, family {}",
            version,
            metadata.len(),
            tensor_count,
            family
        );

        Ok(Box::new(GgufModel {
            version,
            metadata,
            tensor_count,
            parameter_count,
            family,
            model_type: human_parameter_count(parameter_count),
            file_type,
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// Little-endian GGUF v3 writer for fixtures.
    pub(crate) struct GgufBuilder {
        kv: Vec<u8>,
        kv_count: u64,
        tensors: Vec<u8>,
        tensor_count: u64,
        data_len: u64,
    }

    impl GgufBuilder {
        pub(crate) fn new() -> Self {
            Self {
                kv: Vec::new(),
                kv_count: 0,
                tensors: Vec::new(),
                tensor_count: 0,
                data_len: 0,
            }
        }

        fn put_str(buf: &mut Vec<u8>, s: &str) {
            buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
        }

        pub(crate) fn string(mut self, key: &str, value: &str) -> Self {
            Self::put_str(&mut self.kv, key);
            self.kv.extend_from_slice(&8u32.to_le_bytes());
            Self::put_str(&mut self.kv, value);
            self.kv_count += 1;
            self
        }

        pub(crate) fn u32(mut self, key: &str, value: u32) -> Self {
            Self::put_str(&mut self.kv, key);
            self.kv.extend_from_slice(&4u32.to_le_bytes());
            self.kv.extend_from_slice(&value.to_le_bytes());
            self.kv_count += 1;
            self
        }

        pub(crate) fn string_array(mut self, key: &str, values: &[&str]) -> Self {
            Self::put_str(&mut self.kv, key);
            self.kv.extend_from_slice(&9u32.to_le_bytes());
            self.kv.extend_from_slice(&8u32.to_le_bytes());
            self.kv.extend_from_slice(&(values.len() as u64).to_le_bytes());
            for v in values {
                Self::put_str(&mut self.kv, v);
            }
            self.kv_count += 1;
            self
        }

        pub(crate) fn i32_array(mut self, key: &str, values: &[i32]) -> Self {
            Self::put_str(&mut self.kv, key);
            self.kv.extend_from_slice(&9u32.to_le_bytes());
            self.kv.extend_from_slice(&5u32.to_le_bytes());
            self.kv.extend_from_slice(&(values.len() as u64).to_le_bytes());
            for v in values {
                self.kv.extend_from_slice(&v.to_le_bytes());
            }
            self.kv_count += 1;
            self
        }

        /// Adds an F32 tensor packed after the previous one.
        pub(crate) fn f32_tensor(mut self, name: &str, dims: &[u64]) -> Self {
            Self::put_str(&mut self.tensors, name);
            self.tensors.extend_from_slice(&(dims.len() as u32).to_le_bytes());
            for d in dims {
                self.tensors.extend_from_slice(&d.to_le_bytes());
            }
            self.tensors.extend_from_slice(&0u32.to_le_bytes());
            self.tensors.extend_from_slice(&self.data_len.to_le_bytes());
            self.data_len += dims.iter().product::<u64>() * 4;
            self.tensor_count += 1;
            self
        }

        pub(crate) fn build(self) -> Vec<u8> {
            let mut out = Vec::new();
            out.extend_from_slice(b"GGUF");
            out.extend_from_slice(&3u32.to_le_bytes());
            out.extend_from_slice(&self.tensor_count.to_le_bytes());
            out.extend_from_slice(&self.kv_count.to_le_bytes());
            out.extend_from_slice(&self.kv);
            out.extend_from_slice(&self.tensors);
            let aligned = (out.len() as u64).div_ceil(32) * 32;
            out.resize(aligned as usize, 0);
            out.resize((aligned + self.data_len) as usize, 0);
            out
        }
    }

    pub(crate) fn llama_fixture() -> Vec<u8> {
        GgufBuilder::new()
            .string("general.architecture", "llama")
            .u32("general.file_type", 2)
            .u32("llama.context_length", 4096)
            .u32("llama.embedding_length", 64)
            .u32("llama.attention.head_count", 8)
            .u32("llama.attention.head_count_kv", 2)
            .u32("llama.block_count", 2)
            .string_array("tokenizer.ggml.tokens", &["<s>", "</s>", "hello"])
            .f32_tensor("token_embd.weight", &[64, 3])
            .f32_tensor("output.weight", &[64, 3])
            .build()
    }

    fn decode(bytes: Vec<u8>) -> Result<Box<dyn Model>, ContainerError> {
        let mut cur = Cursor::new(bytes);
        GgufContainer::new().decode(&mut cur, &DecodeOptions::default())
    }

    #[test]
    fn test_decodes_llama_metadata() {
        let model = decode(llama_fixture()).unwrap();
        assert_eq!(model.model_family(), "llama");
        assert_eq!(model.file_type(), "Q4_0");
        assert_eq!(model.num_ctx(), 4096);
        assert_eq!(model.num_embed(), 64);
        assert_eq!(model.num_head(), 8);
        assert_eq!(model.num_head_kv(), 2);
        assert_eq!(model.num_gqa(), 4);
        assert_eq!(model.num_layers(), 2);
        assert_eq!(model.model_type(), "384");
    }

    #[test]
    fn test_missing_metadata_is_unknown_not_error() {
        let model = decode(GgufBuilder::new().build()).unwrap();
        assert_eq!(model.model_family(), "unknown");
        assert_eq!(model.model_type(), "unknown");
        assert_eq!(model.file_type(), "unknown");
        assert_eq!(model.num_ctx(), 0);
        assert_eq!(model.num_layers(), 0);
    }

    #[test]
    fn test_kv_heads_default_to_heads() {
        let bytes = GgufBuilder::new()
            .string("general.architecture", "phi2")
            .u32("phi2.attention.head_count", 32)
            .build();
        let model = decode(bytes).unwrap();
        assert_eq!(model.num_head_kv(), 32);
        assert_eq!(model.num_gqa(), 1);
    }

    #[test]
    fn test_per_layer_head_counts_use_maximum() {
        let bytes = GgufBuilder::new()
            .string("general.architecture", "openelm")
            .i32_array("openelm.attention.head_count", &[12, 16, 20])
            .build();
        assert_eq!(decode(bytes).unwrap().num_head(), 20);
    }

    #[test]
    fn test_other_magic_is_not_recognized() {
        let err = decode(b"ONNX-and-more".to_vec()).unwrap_err();
        assert!(matches!(err, ContainerError::NotRecognized));
        let err = decode(b"GG".to_vec()).unwrap_err();
        assert!(matches!(err, ContainerError::NotRecognized));
    }

    #[test]
    fn test_truncated_metadata_is_malformed() {
        let mut bytes = llama_fixture();
        bytes.truncate(40);
        let err = decode(bytes).unwrap_err();
        assert!(matches!(err, ContainerError::Malformed { .. }), "{err:?}");
    }

    #[test]
    fn test_truncated_tensor_data_is_malformed() {
        let mut bytes = llama_fixture();
        bytes.truncate(bytes.len() - 16);
        let err = decode(bytes).unwrap_err();
        match err {
            ContainerError::Malformed { reason } => assert!(reason.contains("tensor data")),
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_version_is_malformed() {
        let mut bytes = GgufBuilder::new().build();
        bytes[4..8].copy_from_slice(&9u32.to_le_bytes());
        assert!(matches!(
            decode(bytes).unwrap_err(),
            ContainerError::Malformed { .. }
        ));
    }

    #[test]
    fn test_big_endian_fields_are_detected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"GGUF");
        bytes.extend_from_slice(&3u32.to_be_bytes());
        bytes.extend_from_slice(&0u64.to_be_bytes());
        bytes.extend_from_slice(&1u64.to_be_bytes());
        bytes.extend_from_slice(&(20u64).to_be_bytes());
        bytes.extend_from_slice(b"general.architecture");
        bytes.extend_from_slice(&8u32.to_be_bytes());
        bytes.extend_from_slice(&5u64.to_be_bytes());
        bytes.extend_from_slice(b"gemma");
        let model = decode(bytes).unwrap();
        assert_eq!(model.model_family(), "gemma");
    }

    #[test]
    fn test_deeply_nested_array_is_malformed() {
        let mut bytes = GgufBuilder::new().build();
        // one metadata entry: key "k", array of arrays of arrays ...
        bytes[16..24].copy_from_slice(&1u64.to_le_bytes());
        let mut kv = Vec::new();
        kv.extend_from_slice(&1u64.to_le_bytes());
        kv.push(b'k');
        kv.extend_from_slice(&9u32.to_le_bytes());
        for _ in 0..100_000 {
            kv.extend_from_slice(&9u32.to_le_bytes());
            kv.extend_from_slice(&1u64.to_le_bytes());
        }
        kv.extend_from_slice(&4u32.to_le_bytes());
        kv.extend_from_slice(&0u64.to_le_bytes());
        bytes.splice(24..24, kv);

        match decode(bytes).unwrap_err() {
            ContainerError::Malformed { reason } => assert!(reason.contains("nested")),
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_single_level_nested_array_decodes() {
        let mut bytes = GgufBuilder::new().build();
        bytes[16..24].copy_from_slice(&1u64.to_le_bytes());
        let mut kv = Vec::new();
        kv.extend_from_slice(&6u64.to_le_bytes());
        kv.extend_from_slice(b"merges");
        kv.extend_from_slice(&9u32.to_le_bytes());
        kv.extend_from_slice(&9u32.to_le_bytes());
        kv.extend_from_slice(&2u64.to_le_bytes());
        for _ in 0..2 {
            kv.extend_from_slice(&4u32.to_le_bytes());
            kv.extend_from_slice(&1u64.to_le_bytes());
            kv.extend_from_slice(&7u32.to_le_bytes());
        }
        bytes.splice(24..24, kv);

        assert!(decode(bytes).is_ok());
    }

    #[test]
    fn test_human_parameter_count() {
        assert_eq!(human_parameter_count(7_000_000_000), "7B");
        assert_eq!(human_parameter_count(6_738_415_616), "6.7B");
        assert_eq!(human_parameter_count(137_000_000), "137M");
        assert_eq!(human_parameter_count(999), "999");
        assert_eq!(human_parameter_count(0), "unknown");
    }

    #[test]
    fn test_file_type_names() {
        assert_eq!(file_type_name(15), "Q4_K_M");
        assert_eq!(file_type_name(1), "F16");
        assert_eq!(file_type_name(5), "unknown");
    }
}
