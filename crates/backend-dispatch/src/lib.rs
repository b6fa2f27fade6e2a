// backend-dispatch/src/lib.rs

pub mod backend;
pub mod config;
pub mod container;
pub mod error;
pub mod payload;
pub mod provisioner;
pub mod telemetry;

// Public API exports
pub use backend::Backend;
pub use config::Config;
pub use container::{
    ByteSource, Container, ContainerRegistry, DecodeOptions, DecodedModel, ExecutionDevice, Model,
    ModelInfo,
};
pub use error::{ContainerError, DecodeError, ProvisionError};
pub use payload::PayloadManifest;
pub use provisioner::{
    HostFingerprint, ProvisionOptions, ProvisionReport, RuntimeProvisioner, StagedLibrary,
};
