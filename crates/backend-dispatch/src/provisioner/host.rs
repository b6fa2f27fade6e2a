//! Host fingerprinting
//!
//! Detects the platform, architecture and acceleration capability used to
//! pick a payload variant. GPUs are found through driver device nodes and
//! vendor tools rather than by linking GPU libraries; a probe that fails
//! leaves that capability out of the fingerprint.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Macos,
    Windows,
    /// Anything outside the fixed set; never matches a payload.
    Unknown,
}

impl Platform {
    pub fn current() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Self {
        match os {
            "linux" => Platform::Linux,
            "macos" | "darwin" => Platform::Macos,
            "windows" => Platform::Windows,
            _ => Platform::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Macos => "macos",
            Platform::Windows => "windows",
            Platform::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X86_64,
    Aarch64,
    Unknown,
}

impl Arch {
    pub fn current() -> Self {
        Self::from_arch(std::env::consts::ARCH)
    }

    pub fn from_arch(arch: &str) -> Self {
        match arch {
            "x86_64" | "amd64" => Arch::X86_64,
            "aarch64" | "arm64" => Arch::Aarch64,
            _ => Arch::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
            Arch::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GPU runtimes a payload variant may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuKind {
    Cuda,
    Rocm,
    Metal,
}

impl fmt::Display for GpuKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuKind::Cuda => write!(f, "cuda"),
            GpuKind::Rocm => write!(f, "rocm"),
            GpuKind::Metal => write!(f, "metal"),
        }
    }
}

/// CPU instruction-set extensions relevant to CPU payload variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CpuFeatures {
    pub avx: bool,
    pub avx2: bool,
    pub avx512f: bool,
}

impl CpuFeatures {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    pub fn detect() -> Self {
        Self {
            avx: is_x86_feature_detected!("avx"),
            avx2: is_x86_feature_detected!("avx2"),
            avx512f: is_x86_feature_detected!("avx512f"),
        }
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    pub fn detect() -> Self {
        Self::default()
    }
}

/// Everything variant selection looks at. Two equal fingerprints always
/// select the same variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFingerprint {
    pub platform: Platform,
    pub arch: Arch,
    pub cpu: CpuFeatures,
    /// Detected GPU runtimes, in detection order
    pub gpus: Vec<GpuKind>,
}

impl HostFingerprint {
    /// Fingerprint with no acceleration; use the builder methods to add some.
    pub fn new(platform: Platform, arch: Arch) -> Self {
        Self {
            platform,
            arch,
            cpu: CpuFeatures::default(),
            gpus: Vec::new(),
        }
    }

    pub fn with_cpu(mut self, cpu: CpuFeatures) -> Self {
        self.cpu = cpu;
        self
    }

    pub fn with_gpu(mut self, gpu: GpuKind) -> Self {
        if !self.gpus.contains(&gpu) {
            self.gpus.push(gpu);
        }
        self
    }

    pub fn has_gpu(&self, gpu: GpuKind) -> bool {
        self.gpus.contains(&gpu)
    }

    /// Probe the running host.
    ///
    /// Runs synchronously and may spawn nothing heavier than a `PATH` lookup.
    pub fn detect() -> Self {
        let platform = Platform::current();
        let arch = Arch::current();
        let cpu = CpuFeatures::detect();

        let mut host = Self::new(platform, arch).with_cpu(cpu);
        if detect_cuda() {
            host = host.with_gpu(GpuKind::Cuda);
        }
        if detect_rocm() {
            host = host.with_gpu(GpuKind::Rocm);
        }
        if platform == Platform::Macos && arch == Arch::Aarch64 {
            host = host.with_gpu(GpuKind::Metal);
        }

        info!(
            "Host fingerprint: {}/{} cpu={} cores={} avx={} avx2={} avx512f={} gpus={:?}",
            host.platform,
            host.arch,
            cpu_brand().unwrap_or_else(|| "unknown".into()),
            num_cpus::get(),
            cpu.avx,
            cpu.avx2,
            cpu.avx512f,
            host.gpus
        );
        host
    }
}

fn cpu_brand() -> Option<String> {
    let sys = System::new_with_specifics(RefreshKind::new().with_cpu(CpuRefreshKind::new()));
    sys.cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty())
}

#[cfg(feature = "nvml-wrapper")]
fn nvml_reports_gpu() -> Option<bool> {
    let nvml = nvml_wrapper::Nvml::init().ok()?;
    let count = nvml.device_count().ok()?;
    debug!("NVML reports {} device(s)", count);
    Some(count > 0)
}

#[cfg(not(feature = "nvml-wrapper"))]
fn nvml_reports_gpu() -> Option<bool> {
    None
}

/// NVIDIA: NVML when compiled in, otherwise the kernel device node on Linux
/// or `nvidia-smi` on `PATH` elsewhere.
fn detect_cuda() -> bool {
    if let Some(found) = nvml_reports_gpu() {
        return found;
    }
    if cfg!(target_os = "linux") {
        Path::new("/dev/nvidia0").exists()
    } else {
        which::which("nvidia-smi").is_ok()
    }
}

/// AMD: the Kernel Fusion Driver node plus a ROCm install.
fn detect_rocm() -> bool {
    if !cfg!(target_os = "linux") || !Path::new("/dev/kfd").exists() {
        return false;
    }
    let found = which::which("rocm-smi").is_ok() || Path::new("/opt/rocm").exists();
    debug!("/dev/kfd present, ROCm install found: {}", found);
    found
}
