//! Staging area for extracted runtimes
//!
//! Each variant lands in `<root>/<backend>/<platform>/<arch>/<variant>`. A
//! directory only ever appears there through a rename of a fully written
//! sibling temp directory, so a reader that finds the fingerprint marker
//! can load the libraries without further checks. Several processes may
//! stage the same variant at once; every one of them ends up with the same
//! complete directory.

use crate::payload::{PayloadEntry, PayloadFile, PayloadVariant};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Written last; holds the variant fingerprint.
pub const MARKER_FILE: &str = ".fingerprint";

const STAGING_PREFIX: &str = ".staging-";
const STALE_PREFIX: &str = ".stale-";

/// root / backend / platform / arch
const VARIANT_PARENT_DEPTH: usize = 3;

static ASIDE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// This call wrote and published the directory.
    Extracted,
    /// A complete copy was already in place.
    Reused,
    /// Another stager published first; its copy is used.
    LostRace,
}

#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join("backend-dispatch")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn variant_dir(&self, entry: &PayloadEntry, variant: &PayloadVariant) -> PathBuf {
        self.root
            .join(entry.backend.as_str())
            .join(entry.platform.as_str())
            .join(entry.arch.as_str())
            .join(variant.name())
    }

    /// True when `dir` holds a complete copy of `variant`.
    pub fn is_complete(dir: &Path, variant: &PayloadVariant) -> bool {
        match fs::read_to_string(dir.join(MARKER_FILE)) {
            Ok(marker) if marker.trim() == variant.fingerprint() => variant
                .files()
                .iter()
                .all(|f| dir.join(f.staged_name()).is_file()),
            _ => false,
        }
    }

    /// Makes `variant` available on disk and returns its directory.
    pub fn stage(
        &self,
        entry: &PayloadEntry,
        variant: &PayloadVariant,
    ) -> io::Result<(PathBuf, StageOutcome)> {
        let target = self.variant_dir(entry, variant);
        if Self::is_complete(&target, variant) {
            debug!("Reusing staged runtime at {}", target.display());
            return Ok((target, StageOutcome::Reused));
        }

        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "staging path has no parent"))?;
        fs::create_dir_all(parent)?;

        let tmp = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(parent)?;
        for file in variant.files() {
            write_payload_file(tmp.path(), file)?;
        }
        write_marker(tmp.path(), variant.fingerprint())?;

        // From here on the temp dir is ours to clean up.
        let tmp_path = tmp.keep();
        let outcome = publish(&tmp_path, &target, variant);
        if tmp_path.exists() {
            let _ = fs::remove_dir_all(&tmp_path);
        }
        let outcome = outcome?;
        info!(
            "Staged {} variant '{}' at {} ({:?})",
            entry.backend,
            variant.name(),
            target.display(),
            outcome
        );
        Ok((target, outcome))
    }

    /// Removes temp and set-aside directories left behind by crashed
    /// stagers. Returns how many were removed.
    pub fn prune_stale(&self, older_than: Duration) -> io::Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }
        let now = SystemTime::now();
        prune_dir(&self.root, 0, now, older_than)
    }
}

fn write_payload_file(dir: &Path, file: &PayloadFile) -> io::Result<()> {
    let path = dir.join(file.staged_name());
    let mut out = File::create(&path)?;
    if file.is_compressed() {
        let mut decoder = GzDecoder::new(file.data());
        io::copy(&mut decoder, &mut out)?;
    } else {
        out.write_all(file.data())?;
    }
    out.sync_all()?;
    set_executable(&path)?;
    Ok(())
}

fn write_marker(dir: &Path, fingerprint: &str) -> io::Result<()> {
    let mut marker = File::create(dir.join(MARKER_FILE))?;
    marker.write_all(fingerprint.as_bytes())?;
    marker.sync_all()
}

#[cfg(unix)]
fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn publish(tmp: &Path, target: &Path, variant: &PayloadVariant) -> io::Result<StageOutcome> {
    match fs::rename(tmp, target) {
        Ok(()) => return Ok(StageOutcome::Extracted),
        Err(_) if StagingArea::is_complete(target, variant) => return Ok(StageOutcome::LostRace),
        Err(e) if !target.exists() => return Err(e),
        Err(_) => {}
    }

    // An incomplete or outdated copy is in the way.
    warn!("Replacing stale staged runtime at {}", target.display());
    if !move_aside_unless_complete(target, variant)? {
        return Ok(StageOutcome::LostRace);
    }

    match fs::rename(tmp, target) {
        Ok(()) => Ok(StageOutcome::Extracted),
        Err(_) if StagingArea::is_complete(target, variant) => Ok(StageOutcome::LostRace),
        Err(e) => Err(e),
    }
}

/// Moves `target` out of the way and deletes it. Returns `false`, leaving it
/// untouched, when another stager has meanwhile published a complete copy.
fn move_aside_unless_complete(target: &Path, variant: &PayloadVariant) -> io::Result<bool> {
    if StagingArea::is_complete(target, variant) {
        return Ok(false);
    }
    let aside = aside_path(target);
    match fs::rename(target, &aside) {
        Ok(()) => {
            if let Err(e) = fs::remove_dir_all(&aside) {
                debug!("Could not remove {}: {}", aside.display(), e);
            }
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(_) if StagingArea::is_complete(target, variant) => Ok(false),
        Err(e) => Err(e),
    }
}

fn aside_path(target: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(
        "{}{}-{}-{}-{}",
        STALE_PREFIX,
        name,
        std::process::id(),
        nanos,
        ASIDE_COUNTER.fetch_add(1, Ordering::Relaxed)
    ))
}

fn prune_dir(dir: &Path, depth: usize, now: SystemTime, older_than: Duration) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let path = entry.path();
        if depth < VARIANT_PARENT_DEPTH {
            removed += prune_dir(&path, depth + 1, now, older_than)?;
            continue;
        }

        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(STAGING_PREFIX) && !name.starts_with(STALE_PREFIX) {
            continue;
        }
        let age = entry
            .metadata()?
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if age >= older_than {
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    debug!("Pruned {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to prune {}: {}", path.display(), e),
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::provisioner::host::{Arch, Platform};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn entry() -> PayloadEntry {
        let variant = PayloadVariant::new(
            "cpu_avx2",
            vec![
                PayloadFile::new("libllama.so", b"llama-bytes".to_vec()),
                PayloadFile::new("libggml.so", b"ggml-bytes".to_vec()),
            ],
        );
        PayloadEntry::new(Backend::LlamaCpp, Platform::Linux, Arch::X86_64, vec![variant])
    }

    fn leftovers(parent: &Path) -> Vec<String> {
        fs::read_dir(parent)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(STAGING_PREFIX) || n.starts_with(STALE_PREFIX))
            .collect()
    }

    #[test]
    fn test_layout_and_marker() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::new(root.path());
        let e = entry();
        let v = &e.variants()[0];

        let (dir, outcome) = area.stage(&e, v).unwrap();
        assert_eq!(outcome, StageOutcome::Extracted);
        assert_eq!(dir, root.path().join("llama_cpp/linux/x86_64/cpu_avx2"));
        assert_eq!(fs::read(dir.join("libllama.so")).unwrap(), b"llama-bytes");
        assert_eq!(
            fs::read_to_string(dir.join(MARKER_FILE)).unwrap(),
            v.fingerprint()
        );
        assert!(StagingArea::is_complete(&dir, v));
    }

    #[test]
    fn test_second_stage_reuses_without_rewriting() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::new(root.path());
        let e = entry();
        let v = &e.variants()[0];

        let (dir, _) = area.stage(&e, v).unwrap();
        let before = fs::metadata(dir.join(MARKER_FILE)).unwrap().modified().unwrap();
        let (again, outcome) = area.stage(&e, v).unwrap();
        let after = fs::metadata(dir.join(MARKER_FILE)).unwrap().modified().unwrap();

        assert_eq!(outcome, StageOutcome::Reused);
        assert_eq!(again, dir);
        assert_eq!(before, after);
    }

    #[test]
    fn test_concurrent_stagers_agree() {
        let root = tempfile::tempdir().unwrap();
        let area = Arc::new(StagingArea::new(root.path()));
        let e = Arc::new(entry());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let area = Arc::clone(&area);
                let e = Arc::clone(&e);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    area.stage(&e, &e.variants()[0])
                })
            })
            .collect();

        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();
        let dir = &results[0].0;
        assert!(results.iter().all(|(d, _)| d == dir));
        assert!(results.iter().any(|(_, o)| *o == StageOutcome::Extracted));
        assert!(StagingArea::is_complete(dir, &e.variants()[0]));
        assert!(leftovers(dir.parent().unwrap()).is_empty());
    }

    #[test]
    fn test_gzip_files_are_decompressed() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"onnxruntime library").unwrap();
        let gz = enc.finish().unwrap();

        let variant = PayloadVariant::new(
            "cpu",
            vec![PayloadFile::new("libonnxruntime.so.gz", gz)],
        );
        let e = PayloadEntry::new(Backend::Ort, Platform::Linux, Arch::Aarch64, vec![variant]);
        let root = tempfile::tempdir().unwrap();
        let (dir, _) = StagingArea::new(root.path())
            .stage(&e, &e.variants()[0])
            .unwrap();

        assert_eq!(
            fs::read(dir.join("libonnxruntime.so")).unwrap(),
            b"onnxruntime library"
        );
        assert!(!dir.join("libonnxruntime.so.gz").exists());
    }

    #[test]
    fn test_stale_copy_is_replaced() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::new(root.path());
        let e = entry();
        let v = &e.variants()[0];

        let target = area.variant_dir(&e, v);
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join(MARKER_FILE), "outdated").unwrap();
        fs::write(target.join("libllama.so"), b"old").unwrap();

        let (dir, outcome) = area.stage(&e, v).unwrap();
        assert_eq!(outcome, StageOutcome::Extracted);
        assert_eq!(fs::read(dir.join("libllama.so")).unwrap(), b"llama-bytes");
        assert!(StagingArea::is_complete(&dir, v));
        assert!(leftovers(dir.parent().unwrap()).is_empty());
    }

    #[test]
    fn test_complete_copy_is_never_moved_aside() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::new(root.path());
        let e = entry();
        let v = &e.variants()[0];
        let (dir, _) = area.stage(&e, v).unwrap();

        assert!(!move_aside_unless_complete(&dir, v).unwrap());
        assert!(StagingArea::is_complete(&dir, v));

        fs::write(dir.join(MARKER_FILE), "outdated").unwrap();
        assert!(move_aside_unless_complete(&dir, v).unwrap());
        assert!(!dir.exists());
        assert!(leftovers(dir.parent().unwrap()).is_empty());
    }

    #[test]
    fn test_missing_file_means_incomplete() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::new(root.path());
        let e = entry();
        let v = &e.variants()[0];

        let (dir, _) = area.stage(&e, v).unwrap();
        fs::remove_file(dir.join("libggml.so")).unwrap();
        assert!(!StagingArea::is_complete(&dir, v));
        assert_eq!(area.stage(&e, v).unwrap().1, StageOutcome::Extracted);
    }

    #[test]
    fn test_prune_removes_only_leftovers() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::new(root.path());
        let e = entry();
        let (dir, _) = area.stage(&e, &e.variants()[0]).unwrap();
        let parent = dir.parent().unwrap();
        fs::create_dir(parent.join(".staging-abc123")).unwrap();
        fs::create_dir(parent.join(".stale-cpu_avx2-1-2-0")).unwrap();

        assert_eq!(area.prune_stale(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(area.prune_stale(Duration::ZERO).unwrap(), 2);
        assert!(dir.exists());
        assert!(leftovers(parent).is_empty());
    }

    #[test]
    fn test_prune_on_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::new(root.path().join("never-created"));
        assert_eq!(area.prune_stale(Duration::ZERO).unwrap(), 0);
    }
}
