// backend-dispatch/src/error.rs
// Typed failures for decoding and provisioning

use crate::backend::Backend;
use crate::provisioner::host::{Arch, Platform};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Outcome of a single container's probe when it does not produce a model.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The artifact does not carry this container's signature.
    #[error("not recognized by this container")]
    NotRecognized,
    /// The signature matched but the contents could not be parsed.
    #[error("{reason}")]
    Malformed { reason: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ContainerError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        ContainerError::Malformed {
            reason: reason.into(),
        }
    }

    /// Maps an I/O failure after recognition: running out of bytes means the
    /// artifact is truncated, anything else is a real I/O error.
    pub fn after_recognition(err: io::Error, what: &str) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ContainerError::malformed(format!("truncated while reading {}", what))
        } else {
            ContainerError::Io(err)
        }
    }
}

/// Dispatcher-level decode failure returned to the caller.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unrecognized model format (probed: {})", .probed.join(", "))]
    UnrecognizedFormat { probed: Vec<&'static str> },

    /// `container` is `None` when the artifact is rejected before probing,
    /// e.g. because it is empty.
    #[error(
        "malformed artifact{}: {reason}",
        .container.map(|c| format!(" ({} container)", c)).unwrap_or_default()
    )]
    MalformedArtifact {
        container: Option<&'static str>,
        reason: String,
    },

    #[error("i/o error while decoding: {0}")]
    Io(#[from] io::Error),
}

impl DecodeError {
    pub fn is_unrecognized(&self) -> bool {
        matches!(self, DecodeError::UnrecognizedFormat { .. })
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, DecodeError::MalformedArtifact { .. })
    }
}

/// Per-backend provisioning failure. Never fatal to the process.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{backend}: no payload variant usable on {platform}/{arch}")]
    UnsupportedPlatform {
        backend: Backend,
        platform: Platform,
        arch: Arch,
    },

    #[error("{backend}: failed to stage variant '{variant}' at {}: {source}", .path.display())]
    StagingFailure {
        backend: Backend,
        variant: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ProvisionError {
    pub fn backend(&self) -> Backend {
        match self {
            ProvisionError::UnsupportedPlatform { backend, .. } => *backend,
            ProvisionError::StagingFailure { backend, .. } => *backend,
        }
    }
}
