// backend-dispatch/src/config.rs

use crate::container::ExecutionDevice;
use crate::provisioner::{ProvisionOptions, StagingArea};
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub staging_dir: PathBuf,
    pub force_cpu: bool,
    pub force_variant: Option<String>,
    pub decode_device: ExecutionDevice,
    pub prune_after_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            staging_dir: StagingArea::default_root(),
            force_cpu: false,
            force_variant: None,
            decode_device: ExecutionDevice::Cpu,
            prune_after_seconds: 3600,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let force_cpu = match value("FORCE_CPU") {
            Some(v) => parse_flag(&v).with_context(|| format!("FORCE_CPU has invalid value '{}'", v))?,
            None => defaults.force_cpu,
        };
        let decode_device = match value("DECODE_DEVICE") {
            Some(v) => v
                .parse()
                .with_context(|| format!("DECODE_DEVICE has invalid value '{}'", v))?,
            None => defaults.decode_device,
        };
        let prune_after_seconds = match value("PRUNE_AFTER_SECONDS") {
            Some(v) => v
                .parse()
                .with_context(|| format!("PRUNE_AFTER_SECONDS has invalid value '{}'", v))?,
            None => defaults.prune_after_seconds,
        };

        Ok(Self {
            staging_dir: value("STAGING_DIR").map(PathBuf::from).unwrap_or(defaults.staging_dir),
            force_cpu,
            force_variant: value("FORCE_VARIANT"),
            decode_device,
            prune_after_seconds,
        })
    }

    pub fn provision_options(&self) -> ProvisionOptions {
        ProvisionOptions {
            force_cpu: self.force_cpu,
            force_variant: self.force_variant.clone(),
            staging_dir: Some(self.staging_dir.clone()),
        }
    }

    pub fn prune_after(&self) -> Duration {
        Duration::from_secs(self.prune_after_seconds)
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Staging Dir: {}", self.staging_dir.display());
        info!("- Force CPU: {}", self.force_cpu);
        info!("- Force Variant: {}", self.force_variant.as_deref().unwrap_or("none"));
        info!("- Decode Device: {:?}", self.decode_device);
        info!("- Prune After: {}s", self.prune_after_seconds);
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!("expected true/false")),
    }
}
