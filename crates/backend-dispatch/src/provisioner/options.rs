// backend-dispatch/src/provisioner/options.rs
// Caller overrides for variant selection and staging location

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionOptions {
    /// Never select a GPU variant.
    pub force_cpu: bool,
    /// Pin a variant by name. Takes precedence over `force_cpu` and over the
    /// host check; an unknown name falls back to normal selection.
    pub force_variant: Option<String>,
    /// Staging root; defaults to `<tmp>/backend-dispatch`.
    pub staging_dir: Option<PathBuf>,
}

impl ProvisionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force_cpu(mut self, force_cpu: bool) -> Self {
        self.force_cpu = force_cpu;
        self
    }

    pub fn force_variant(mut self, name: impl Into<String>) -> Self {
        self.force_variant = Some(name.into());
        self
    }

    pub fn staging_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(path.into());
        self
    }
}
