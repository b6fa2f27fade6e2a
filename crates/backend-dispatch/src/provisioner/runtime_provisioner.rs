//! Runtime Provisioner
//!
//! Picks the bundled runtime variant that fits this host for each backend and
//! stages it on disk for the native loader. Failures are per backend: a
//! backend that cannot be provisioned is reported and the others carry on.

use super::host::{Arch, HostFingerprint, Platform};
use super::options::ProvisionOptions;
use super::selector::select_variant;
use super::staging::{StageOutcome, StagingArea};
use crate::backend::Backend;
use crate::error::ProvisionError;
use crate::payload::{PayloadManifest, PayloadVariant};
use dashmap::DashMap;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A variant staged on disk, ready for the native loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedLibrary {
    pub backend: Backend,
    pub variant: String,
    pub platform: Platform,
    pub arch: Arch,
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub fingerprint: String,
    pub outcome: StageOutcome,
}

/// Outcome of provisioning several backends at once.
#[derive(Debug)]
pub struct ProvisionReport {
    pub results: BTreeMap<Backend, Result<StagedLibrary, ProvisionError>>,
}

impl ProvisionReport {
    pub fn staged(&self) -> impl Iterator<Item = &StagedLibrary> {
        self.results.values().filter_map(|r| r.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ProvisionError> {
        self.results.values().filter_map(|r| r.as_ref().err())
    }

    pub fn all_ok(&self) -> bool {
        self.results.values().all(|r| r.is_ok())
    }
}

pub struct RuntimeProvisioner {
    manifest: Arc<PayloadManifest>,
    host: HostFingerprint,
    options: ProvisionOptions,
    staging: StagingArea,
    staged: DashMap<Backend, StagedLibrary>,
    gates: DashMap<Backend, Arc<Mutex<()>>>,
}

impl RuntimeProvisioner {
    pub fn new(
        manifest: impl Into<Arc<PayloadManifest>>,
        host: HostFingerprint,
        options: ProvisionOptions,
    ) -> Self {
        let root = options
            .staging_dir
            .clone()
            .unwrap_or_else(StagingArea::default_root);
        Self {
            manifest: manifest.into(),
            host,
            options,
            staging: StagingArea::new(root),
            staged: DashMap::new(),
            gates: DashMap::new(),
        }
    }

    /// Provisioner over the embedded payloads and the detected host.
    pub fn detect(options: ProvisionOptions) -> Self {
        Self::new(PayloadManifest::embedded(), HostFingerprint::detect(), options)
    }

    pub fn host(&self) -> &HostFingerprint {
        &self.host
    }

    pub fn manifest(&self) -> &PayloadManifest {
        &self.manifest
    }

    pub fn options(&self) -> &ProvisionOptions {
        &self.options
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    fn unsupported(&self, backend: Backend) -> ProvisionError {
        ProvisionError::UnsupportedPlatform {
            backend,
            platform: self.host.platform,
            arch: self.host.arch,
        }
    }

    /// The variant this host would get for `backend`.
    pub fn select(&self, backend: Backend) -> Result<&PayloadVariant, ProvisionError> {
        if self.host.platform == Platform::Unknown || self.host.arch == Arch::Unknown {
            return Err(self.unsupported(backend));
        }
        let entry = self
            .manifest
            .entry(backend, self.host.platform, self.host.arch)
            .ok_or_else(|| self.unsupported(backend))?;
        let variant =
            select_variant(entry, &self.host, &self.options).ok_or_else(|| self.unsupported(backend))?;
        debug!("{}: selected variant '{}'", backend, variant.name());
        Ok(variant)
    }

    /// Stages the selected variant for `backend`, reusing a matching copy on
    /// disk, and records the result.
    pub fn provision(&self, backend: Backend) -> Result<StagedLibrary, ProvisionError> {
        let entry = self
            .manifest
            .entry(backend, self.host.platform, self.host.arch)
            .ok_or_else(|| self.unsupported(backend))?;
        let variant = self.select(backend)?;

        let (dir, outcome) =
            self.staging
                .stage(entry, variant)
                .map_err(|source| ProvisionError::StagingFailure {
                    backend,
                    variant: variant.name().to_string(),
                    path: self.staging.variant_dir(entry, variant),
                    source,
                })?;

        let staged = StagedLibrary {
            backend,
            variant: variant.name().to_string(),
            platform: entry.platform,
            arch: entry.arch,
            files: variant
                .files()
                .iter()
                .map(|f| dir.join(f.staged_name()))
                .collect(),
            dir,
            fingerprint: variant.fingerprint().to_string(),
            outcome,
        };
        info!(
            "{}: runtime '{}' ready at {} ({:?})",
            backend,
            staged.variant,
            staged.dir.display(),
            outcome
        );
        self.staged.insert(backend, staged.clone());
        Ok(staged)
    }

    /// Returns the recorded staging for `backend`, provisioning it the
    /// first time. Concurrent callers in one process stage only once.
    pub fn ensure(&self, backend: Backend) -> Result<StagedLibrary, ProvisionError> {
        if let Some(staged) = self.staged(backend) {
            return Ok(staged);
        }
        let gate = self
            .gates
            .entry(backend)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(staged) = self.staged(backend) {
            return Ok(staged);
        }
        self.provision(backend)
    }

    /// Provisions every known backend in parallel.
    pub fn provision_all(&self) -> ProvisionReport {
        self.provision_backends(&Backend::ALL)
    }

    pub fn provision_backends(&self, backends: &[Backend]) -> ProvisionReport {
        let results: BTreeMap<_, _> = backends
            .par_iter()
            .map(|&backend| (backend, self.ensure(backend)))
            .collect();
        for err in results.values().filter_map(|r| r.as_ref().err()) {
            warn!("{}", err);
        }
        ProvisionReport { results }
    }

    pub fn staged(&self, backend: Backend) -> Option<StagedLibrary> {
        self.staged.get(&backend).map(|s| s.value().clone())
    }

    /// Backends with a variant usable on this host.
    pub fn available_backends(&self) -> Vec<Backend> {
        Backend::ALL
            .into_iter()
            .filter(|b| self.select(*b).is_ok())
            .collect()
    }

    pub fn prune_stale(&self, older_than: Duration) -> io::Result<usize> {
        let removed = self.staging.prune_stale(older_than)?;
        if removed > 0 {
            info!(
                "Pruned {} abandoned staging directories under {}",
                removed,
                self.staging.root().display()
            );
        }
        Ok(removed)
    }
}
