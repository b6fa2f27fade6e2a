//! Payload manifest
//!
//! Describes the native libraries available for each (backend, platform,
//! architecture) triple. Variants inside an entry are kept ordered from most
//! to least specialised so selection can take the first usable one.

use crate::backend::Backend;
use crate::provisioner::host::{Arch, GpuKind, HostFingerprint, Platform};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::cmp::Reverse;
use std::fmt;
use std::sync::OnceLock;

/// What a variant needs from the host before it can be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    None,
    CpuAvx,
    CpuAvx2,
    CpuAvx512,
    Gpu(GpuKind),
}

impl Requirement {
    /// Derives the requirement from a variant directory name such as
    /// `cpu_avx2`, `cuda_v12` or `rocm_v6`.
    pub fn from_variant_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.starts_with("cuda") {
            Requirement::Gpu(GpuKind::Cuda)
        } else if name.starts_with("rocm") {
            Requirement::Gpu(GpuKind::Rocm)
        } else if name.starts_with("metal") {
            Requirement::Gpu(GpuKind::Metal)
        } else if name.contains("avx512") {
            Requirement::CpuAvx512
        } else if name.contains("avx2") {
            Requirement::CpuAvx2
        } else if name.contains("avx") {
            Requirement::CpuAvx
        } else {
            Requirement::None
        }
    }

    /// Higher is more specialised.
    pub fn rank(&self) -> u8 {
        match self {
            Requirement::Gpu(_) => 4,
            Requirement::CpuAvx512 => 3,
            Requirement::CpuAvx2 => 2,
            Requirement::CpuAvx => 1,
            Requirement::None => 0,
        }
    }

    pub fn is_accelerator(&self) -> bool {
        matches!(self, Requirement::Gpu(_))
    }

    pub fn satisfied_by(&self, host: &HostFingerprint) -> bool {
        match self {
            Requirement::None => true,
            Requirement::CpuAvx => host.cpu.avx,
            Requirement::CpuAvx2 => host.cpu.avx2,
            Requirement::CpuAvx512 => host.cpu.avx512f,
            Requirement::Gpu(gpu) => host.has_gpu(*gpu),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::None => write!(f, "none"),
            Requirement::CpuAvx => write!(f, "avx"),
            Requirement::CpuAvx2 => write!(f, "avx2"),
            Requirement::CpuAvx512 => write!(f, "avx512f"),
            Requirement::Gpu(gpu) => write!(f, "{}", gpu),
        }
    }
}

/// One library file inside a variant. Names ending in `.gz` hold gzip data
/// and are staged without the suffix.
#[derive(Debug, Clone)]
pub struct PayloadFile {
    name: String,
    data: Cow<'static, [u8]>,
}

impl PayloadFile {
    pub fn new(name: impl Into<String>, data: impl Into<Cow<'static, [u8]>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_compressed(&self) -> bool {
        self.name.ends_with(".gz")
    }

    pub fn staged_name(&self) -> &str {
        self.name.strip_suffix(".gz").unwrap_or(&self.name)
    }
}

/// A build of one backend's runtime for a specific capability level.
#[derive(Debug)]
pub struct PayloadVariant {
    name: String,
    requirement: Requirement,
    files: Vec<PayloadFile>,
    fingerprint: OnceLock<String>,
}

impl Clone for PayloadVariant {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            requirement: self.requirement,
            files: self.files.clone(),
            fingerprint: OnceLock::new(),
        }
    }
}

impl PayloadVariant {
    pub fn new(name: impl Into<String>, files: Vec<PayloadFile>) -> Self {
        let name = name.into();
        Self {
            requirement: Requirement::from_variant_name(&name),
            name,
            files,
            fingerprint: OnceLock::new(),
        }
    }

    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirement = requirement;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requirement(&self) -> Requirement {
        self.requirement
    }

    pub fn files(&self) -> &[PayloadFile] {
        &self.files
    }

    /// BLAKE3 over file names and contents; identifies a staged copy.
    pub fn fingerprint(&self) -> &str {
        self.fingerprint.get_or_init(|| {
            let mut hasher = blake3::Hasher::new();
            let mut files: Vec<&PayloadFile> = self.files.iter().collect();
            files.sort_by(|a, b| a.name.cmp(&b.name));
            for file in files {
                hasher.update(&(file.name.len() as u64).to_le_bytes());
                hasher.update(file.name.as_bytes());
                hasher.update(&(file.data.len() as u64).to_le_bytes());
                hasher.update(&file.data);
            }
            hasher.finalize().to_hex().to_string()
        })
    }
}

/// Variants for one (backend, platform, arch) triple.
#[derive(Debug, Clone)]
pub struct PayloadEntry {
    pub backend: Backend,
    pub platform: Platform,
    pub arch: Arch,
    variants: Vec<PayloadVariant>,
}

impl PayloadEntry {
    pub fn new(
        backend: Backend,
        platform: Platform,
        arch: Arch,
        variants: Vec<PayloadVariant>,
    ) -> Self {
        let mut entry = Self {
            backend,
            platform,
            arch,
            variants,
        };
        entry.sort_variants();
        entry
    }

    // rank first, then name descending so newer toolkits (cuda_v12) lead
    fn sort_variants(&mut self) {
        self.variants.sort_by(|a, b| {
            (Reverse(a.requirement.rank()), Reverse(&a.name))
                .cmp(&(Reverse(b.requirement.rank()), Reverse(&b.name)))
        });
        self.variants.dedup_by(|a, b| a.name == b.name);
    }

    /// Variants, most specialised first.
    pub fn variants(&self) -> &[PayloadVariant] {
        &self.variants
    }

    pub fn variant(&self, name: &str) -> Option<&PayloadVariant> {
        self.variants.iter().find(|v| v.name == name)
    }
}

/// Serializable view of one manifest entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySummary {
    pub backend: Backend,
    pub platform: Platform,
    pub arch: Arch,
    pub variants: Vec<VariantSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSummary {
    pub name: String,
    pub requirement: String,
    pub files: Vec<String>,
}

/// The full set of bundled runtimes, passed explicitly to the provisioner.
#[derive(Debug, Clone, Default)]
pub struct PayloadManifest {
    entries: Vec<PayloadEntry>,
}

impl PayloadManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry; variants for an existing triple are merged into it.
    pub fn with_entry(mut self, entry: PayloadEntry) -> Self {
        match self.entries.iter_mut().find(|e| {
            e.backend == entry.backend && e.platform == entry.platform && e.arch == entry.arch
        }) {
            Some(existing) => {
                existing.variants.extend(entry.variants);
                existing.sort_variants();
            }
            None => self.entries.push(entry),
        }
        self
    }

    pub fn entries(&self) -> &[PayloadEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, backend: Backend, platform: Platform, arch: Arch) -> Option<&PayloadEntry> {
        self.entries
            .iter()
            .find(|e| e.backend == backend && e.platform == platform && e.arch == arch)
    }

    /// Backends with at least one entry, in stable order.
    pub fn backends(&self) -> Vec<Backend> {
        let mut backends: Vec<Backend> = self.entries.iter().map(|e| e.backend).collect();
        backends.sort();
        backends.dedup();
        backends
    }

    pub fn summary(&self) -> Vec<EntrySummary> {
        self.entries
            .iter()
            .map(|e| EntrySummary {
                backend: e.backend,
                platform: e.platform,
                arch: e.arch,
                variants: e
                    .variants
                    .iter()
                    .map(|v| VariantSummary {
                        name: v.name.clone(),
                        requirement: v.requirement.to_string(),
                        files: v.files.iter().map(|f| f.staged_name().to_string()).collect(),
                    })
                    .collect(),
            })
            .collect()
    }
}
