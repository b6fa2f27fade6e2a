//! Runtimes compiled into the binary.
//!
//! Only the payload tree for the compile target is embedded. Inside it the
//! layout is `<backend>/<arch>/<variant>/lib/<file>`; unknown backend or
//! architecture directories are skipped with a warning.

use super::manifest::{PayloadEntry, PayloadFile, PayloadManifest, PayloadVariant};
use crate::backend::Backend;
use crate::provisioner::host::{Arch, Platform};
use include_dir::{include_dir, Dir};
use tracing::{debug, warn};

#[cfg(target_os = "linux")]
static PAYLOADS: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/payloads/linux");
#[cfg(target_os = "macos")]
static PAYLOADS: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/payloads/macos");
#[cfg(target_os = "windows")]
static PAYLOADS: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/payloads/windows");

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn embedded_tree() -> Option<(Platform, &'static Dir<'static>)> {
    Some((Platform::current(), &PAYLOADS))
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn embedded_tree() -> Option<(Platform, &'static Dir<'static>)> {
    None
}

fn dir_name<'a>(dir: &'a Dir<'_>) -> Option<&'a str> {
    dir.path().file_name().and_then(|n| n.to_str())
}

fn variant_files(variant_dir: &Dir<'static>) -> Vec<PayloadFile> {
    let nested = variant_dir.dirs().flat_map(|d| d.files());
    variant_dir
        .files()
        .chain(nested)
        .filter_map(|file| {
            let name = file.path().file_name()?.to_str()?;
            if name.starts_with('.') {
                return None;
            }
            Some(PayloadFile::new(name, file.contents()))
        })
        .collect()
}

/// Builds a manifest from a payload tree rooted at one platform directory.
pub fn manifest_from_dir(platform: Platform, root: &Dir<'static>) -> PayloadManifest {
    let mut manifest = PayloadManifest::new();
    for backend_dir in root.dirs() {
        let Some(name) = dir_name(backend_dir) else { continue };
        let backend: Backend = match name.parse() {
            Ok(b) => b,
            Err(e) => {
                warn!("Skipping embedded payload directory '{}': {}", name, e);
                continue;
            }
        };
        for arch_dir in backend_dir.dirs() {
            let arch = dir_name(arch_dir).map(Arch::from_arch).unwrap_or(Arch::Unknown);
            if arch == Arch::Unknown {
                warn!("Skipping embedded payload for unknown arch: {}", arch_dir.path().display());
                continue;
            }
            let variants: Vec<PayloadVariant> = arch_dir
                .dirs()
                .filter_map(|variant_dir| {
                    let files = variant_files(variant_dir);
                    if files.is_empty() {
                        return None;
                    }
                    Some(PayloadVariant::new(dir_name(variant_dir)?, files))
                })
                .collect();
            if variants.is_empty() {
                continue;
            }
            debug!(
                "Embedded payload {}/{}/{}: {} variant(s)",
                backend,
                platform,
                arch,
                variants.len()
            );
            manifest = manifest.with_entry(PayloadEntry::new(backend, platform, arch, variants));
        }
    }
    manifest
}

impl PayloadManifest {
    /// Manifest of the runtimes embedded for the compile target. Empty when
    /// the target has none.
    pub fn embedded() -> Self {
        match embedded_tree() {
            Some((platform, root)) => manifest_from_dir(platform, root),
            None => PayloadManifest::new(),
        }
    }
}
