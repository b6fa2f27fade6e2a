//! Bundled native runtime payloads.

pub mod embedded;
pub mod manifest;

pub use manifest::{
    EntrySummary, PayloadEntry, PayloadFile, PayloadManifest, PayloadVariant, Requirement,
    VariantSummary,
};
