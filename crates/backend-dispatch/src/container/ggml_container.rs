//! GGML Container (legacy llama.cpp formats)
//!
//! Pre-GGUF files: unversioned `ggml`, `ggmf` v1 and `ggjt` v1-v3. Only the
//! fixed llama hyper-parameter block is read.
//!
//! Classification boundary: not recognized unless the first little-endian
//! u32 is one of the three legacy magics; a bad version or a short
//! hyper-parameter block after that is malformed.

use super::gguf_container::file_type_name;
use super::model_trait::*;
use super::reader::Reader;
use crate::backend::Backend;
use crate::error::ContainerError;
use std::io;

const MAGIC_GGML: u32 = 0x6767_6d6c;
const MAGIC_GGMF: u32 = 0x6767_6d66;
const MAGIC_GGJT: u32 = 0x6767_6a74;

/// Quantisation version is folded into `ftype` as `ftype + 1000 * qnt_version`.
const QNT_VERSION_FACTOR: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GgmlFlavor {
    Ggml,
    Ggmf(u32),
    Ggjt(u32),
}

/// A decoded legacy llama model.
#[derive(Debug, Clone)]
pub struct GgmlModel {
    flavor: GgmlFlavor,
    num_vocab: u32,
    num_embed: u32,
    num_head: u32,
    num_layers: u32,
    file_type: &'static str,
}

impl GgmlModel {
    pub fn flavor(&self) -> GgmlFlavor {
        self.flavor
    }

    pub fn num_vocab(&self) -> u32 {
        self.num_vocab
    }
}

impl Model for GgmlModel {
    /// Legacy files do not record a training context.
    fn num_ctx(&self) -> u32 {
        0
    }

    fn num_embed(&self) -> u32 {
        self.num_embed
    }

    fn num_head(&self) -> u32 {
        self.num_head
    }

    fn num_head_kv(&self) -> u32 {
        self.num_head
    }

    fn num_layers(&self) -> u32 {
        self.num_layers
    }

    fn model_family(&self) -> &str {
        "llama"
    }

    fn model_type(&self) -> &str {
        match self.num_layers {
            26 => "3B",
            32 => "7B",
            40 => "13B",
            48 => "34B",
            60 => "30B",
            80 => "65B",
            _ => "unknown",
        }
    }

    fn file_type(&self) -> &str {
        self.file_type
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GgmlContainer;

impl GgmlContainer {
    pub fn new() -> Self {
        Self
    }
}

impl Container for GgmlContainer {
    fn name(&self) -> &'static str {
        "ggml"
    }

    fn backend(&self) -> Backend {
        Backend::LlamaCpp
    }

    fn format(&self) -> ModelFormat {
        ModelFormat::GGML
    }

    fn decode(
        &self,
        source: &mut dyn ByteSource,
        _options: &DecodeOptions,
    ) -> Result<Box<dyn Model>, ContainerError> {
        let mut r = Reader::new(source)?;
        let magic = match r.read_u32() {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(ContainerError::NotRecognized)
            }
            Err(e) => return Err(e.into()),
        };

        let read_version = |r: &mut Reader<'_>| {
            r.read_u32()
                .map_err(|e| ContainerError::after_recognition(e, "version"))
        };
        let flavor = match magic {
            MAGIC_GGML => GgmlFlavor::Ggml,
            MAGIC_GGMF => match read_version(&mut r)? {
                1 => GgmlFlavor::Ggmf(1),
                v => {
                    return Err(ContainerError::malformed(format!(
                        "unsupported ggmf version {}",
                        v
                    )))
                }
            },
            MAGIC_GGJT => match read_version(&mut r)? {
                v @ 1..=3 => GgmlFlavor::Ggjt(v),
                v => {
                    return Err(ContainerError::malformed(format!(
                        "unsupported ggjt version {}",
                        v
                    )))
                }
            },
            _ => return Err(ContainerError::NotRecognized),
        };

        let mut hparams = [0u32; 7];
        for value in hparams.iter_mut() {
            *value = r
                .read_u32()
                .map_err(|e| ContainerError::after_recognition(e, "hyper-parameters"))?;
        }
        let [num_vocab, num_embed, _num_mult, num_head, num_layers, _num_rot, ftype] = hparams;

        r.touch_end()
            .map_err(|e| ContainerError::after_recognition(e, "model body"))?;

        Ok(Box::new(GgmlModel {
            flavor,
            num_vocab,
            num_embed,
            num_head,
            num_layers,
            file_type: file_type_name(ftype % QNT_VERSION_FACTOR),
        }))
    }
}
