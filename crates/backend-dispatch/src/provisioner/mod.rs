//! Native runtime provisioning.

pub mod host;
pub mod options;
pub mod runtime_provisioner;
pub mod selector;
pub mod staging;

pub use host::{Arch, CpuFeatures, GpuKind, HostFingerprint, Platform};
pub use options::ProvisionOptions;
pub use runtime_provisioner::{ProvisionReport, RuntimeProvisioner, StagedLibrary};
pub use selector::select_variant;
pub use staging::{StageOutcome, StagingArea};
