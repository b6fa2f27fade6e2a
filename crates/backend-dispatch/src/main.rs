// backend-dispatch/src/main.rs

#[cfg(feature = "cli")]
mod cli {
    use anyhow::{Context, Result};
    use backend_dispatch::{
        config::Config, telemetry, Backend, ContainerRegistry, DecodeOptions, ExecutionDevice,
        ModelInfo, RuntimeProvisioner,
    };
    use clap::{Parser, Subcommand};
    use serde::Serialize;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tracing::{error, info};

    #[derive(Debug, Parser)]
    #[command(name = "backend-dispatch", version, about = "Inspect model files and stage native inference runtimes")]
    struct Cli {
        /// Never select GPU runtime variants
        #[arg(long, global = true)]
        force_cpu: bool,

        /// Pin a runtime variant by name (e.g. cpu_avx2)
        #[arg(long, global = true)]
        force_variant: Option<String>,

        /// Where runtimes are staged
        #[arg(long, global = true)]
        staging_dir: Option<PathBuf>,

        #[command(subcommand)]
        command: Command,
    }

    #[derive(Debug, Subcommand)]
    enum Command {
        /// Decode model files and print their metadata as JSON
        Inspect {
            #[arg(required = true)]
            files: Vec<PathBuf>,

            /// Device passed to backend-specific decoders
            #[arg(long)]
            device: Option<ExecutionDevice>,
        },
        /// Stage runtime libraries for this host
        Provision {
            /// Backends to stage; all when omitted
            #[arg(long = "backend")]
            backends: Vec<Backend>,

            /// Remove abandoned staging directories first
            #[arg(long)]
            prune: bool,
        },
        /// Show bundled runtime variants and the selection for this host
        Variants,
    }

    #[derive(Serialize)]
    struct InspectResult {
        path: PathBuf,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<ModelInfo>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    }

    #[derive(Serialize)]
    struct ProvisionResult {
        backend: Backend,
        #[serde(skip_serializing_if = "Option::is_none")]
        staged: Option<backend_dispatch::StagedLibrary>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    }

    #[derive(Serialize)]
    struct Selection {
        backend: Backend,
        variant: Option<String>,
    }

    fn apply_overrides(cli: &Cli, cfg: &mut Config) {
        if cli.force_cpu {
            cfg.force_cpu = true;
        }
        if let Some(variant) = &cli.force_variant {
            cfg.force_variant = Some(variant.clone());
        }
        if let Some(dir) = &cli.staging_dir {
            cfg.staging_dir = dir.clone();
        }
    }

    fn print_json<T: Serialize>(value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    async fn inspect(files: Vec<PathBuf>, options: DecodeOptions) -> Result<bool> {
        let registry = Arc::new(ContainerRegistry::new());
        let options = Arc::new(options);

        let tasks: Vec<_> = files
            .into_iter()
            .map(|path| {
                let registry = Arc::clone(&registry);
                let options = Arc::clone(&options);
                tokio::task::spawn_blocking(move || {
                    let result = registry.decode_path(&path, &options);
                    (path, result)
                })
            })
            .collect();

        let mut results = Vec::with_capacity(tasks.len());
        let mut all_ok = true;
        for task in tasks {
            let (path, result) = task.await.context("decode task panicked")?;
            match result {
                Ok(model) => results.push(InspectResult {
                    path,
                    model: Some(model.info()),
                    error: None,
                }),
                Err(e) => {
                    error!("{}: {}", path.display(), e);
                    all_ok = false;
                    results.push(InspectResult {
                        path,
                        model: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        print_json(&results)?;
        Ok(all_ok)
    }

    fn provision(cfg: &Config, backends: Vec<Backend>, prune: bool) -> Result<bool> {
        let provisioner = RuntimeProvisioner::detect(cfg.provision_options());
        if prune {
            let removed = provisioner
                .prune_stale(cfg.prune_after())
                .context("failed to prune staging directory")?;
            info!("Removed {} stale staging directories", removed);
        }

        let report = if backends.is_empty() {
            provisioner.provision_all()
        } else {
            provisioner.provision_backends(&backends)
        };
        let all_ok = report.all_ok();
        let results: Vec<ProvisionResult> = report
            .results
            .into_iter()
            .map(|(backend, result)| match result {
                Ok(staged) => ProvisionResult {
                    backend,
                    staged: Some(staged),
                    error: None,
                },
                Err(e) => ProvisionResult {
                    backend,
                    staged: None,
                    error: Some(e.to_string()),
                },
            })
            .collect();
        print_json(&results)?;
        Ok(all_ok)
    }

    fn variants(cfg: &Config) -> Result<()> {
        let provisioner = RuntimeProvisioner::detect(cfg.provision_options());
        let selection: Vec<Selection> = Backend::ALL
            .into_iter()
            .map(|backend| Selection {
                backend,
                variant: provisioner.select(backend).ok().map(|v| v.name().to_string()),
            })
            .collect();
        print_json(&serde_json::json!({
            "host": provisioner.host(),
            "manifest": provisioner.manifest().summary(),
            "selection": selection,
        }))
    }

    pub async fn run() -> Result<()> {
        telemetry::init_tracing();
        let cli = Cli::parse();

        let mut cfg = Config::from_env()?;
        apply_overrides(&cli, &mut cfg);
        cfg.print_config();

        let ok = match cli.command {
            Command::Inspect { files, device } => {
                let options = DecodeOptions {
                    device: device.unwrap_or(cfg.decode_device),
                };
                inspect(files, options).await?
            }
            Command::Provision { backends, prune } => {
                tokio::task::spawn_blocking(move || provision(&cfg, backends, prune))
                    .await
                    .context("provision task panicked")??
            }
            Command::Variants => {
                variants(&cfg)?;
                true
            }
        };

        if !ok {
            std::process::exit(1);
        }
        Ok(())
    }
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
