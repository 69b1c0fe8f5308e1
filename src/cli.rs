///
/// This module implements the CLI for es-snapshot: command parsing, wiring the loaded
/// metadata and environment credentials into the snapshot workflow, and user-visible output.
///
/// All workflow logic lives in [`crate::snapshot`]; this module is glue.
///
/// ## How To Use
/// - Command line: `es-snapshot backup --metadata config.yaml --wait`.
/// - Programmatic/integration use: call [`run`] with a constructed [`Cli`].
use crate::client::{ClientSettings, EsClient};
use crate::config;
use crate::load_config::{credentials_from_env, load_config};
use crate::snapshot::{self, MonitorSettings, RunOptions, SnapshotNaming};
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// CLI for es-snapshot: back up Elasticsearch indices to S3.
#[derive(Parser)]
#[clap(
    name = "es-snapshot",
    version,
    about = "Register an S3 snapshot repository and snapshot Elasticsearch indices into it"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register the repository and create a snapshot of the configured indices
    Backup {
        /// Path to the YAML metadata file
        #[clap(long)]
        metadata: PathBuf,
        /// Wait for the snapshot to finish
        #[clap(long)]
        wait: bool,
        /// Seconds between status polls while waiting
        #[clap(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
        poll_interval: u64,
        /// Give up waiting after this many seconds (the snapshot keeps running)
        #[clap(long, default_value_t = 600)]
        max_wait: u64,
        /// Verify the repository on all nodes before snapshotting
        #[clap(long)]
        verify: bool,
        /// Snapshot naming policy
        #[clap(long, value_enum, default_value_t = Naming::Timestamp)]
        naming: Naming,
        /// Per-request timeout in seconds
        #[clap(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: u64,
    },
    /// Report the current state of a snapshot
    Status {
        /// Path to the YAML metadata file
        #[clap(long)]
        metadata: PathBuf,
        /// Snapshot name, as printed by `backup`
        #[clap(long)]
        name: String,
        /// Per-request timeout in seconds
        #[clap(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: u64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Naming {
    Timestamp,
    Daily,
}

impl From<Naming> for SnapshotNaming {
    fn from(n: Naming) -> Self {
        match n {
            Naming::Timestamp => SnapshotNaming::Timestamp,
            Naming::Daily => SnapshotNaming::Daily,
        }
    }
}

fn client_settings(timeout: u64) -> ClientSettings {
    ClientSettings {
        timeout: Duration::from_secs(timeout),
        ..ClientSettings::default()
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main().
///
/// `cancel` aborts a backup between steps; `main` triggers it on Ctrl-C.
pub async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Backup {
            metadata,
            wait,
            poll_interval,
            max_wait,
            verify,
            naming,
            timeout,
        } => {
            let raw = load_config(&metadata)?;
            // Validate up front so a bad file never builds a client.
            let backup_config = config::parse(&raw)
                .map_err(|e| {
                    tracing::error!(command = "backup", field = %e.field, "Configuration rejected");
                    anyhow::anyhow!("ConfigError [{}]: {}", e.field, e.reason)
                })?
                .with_credentials(credentials_from_env());
            let client = EsClient::new(backup_config.cluster_url(), client_settings(timeout))?;
            let options = RunOptions {
                wait: wait.then(|| MonitorSettings {
                    poll_interval: Duration::from_secs(poll_interval),
                    max_wait: Duration::from_secs(max_wait),
                }),
                verify_repository: verify,
                naming: naming.into(),
                cancel,
            };

            tracing::info!(command = "backup", "Starting snapshot run");
            let result = snapshot::run_with_config(&backup_config, &client, &options).await;
            print!("{result}");
            let url = (!result.snapshot_name.is_empty())
                .then(|| snapshot::status_url(&backup_config, &result.snapshot_name));
            if let Some(url) = &url {
                println!("status url:         {url}");
            }

            if result.cancelled {
                tracing::warn!(command = "backup", snapshot = %result.snapshot_name, "Snapshot run cancelled");
                return Err(match url {
                    Some(url) => anyhow::anyhow!("cancelled before completion; check {url}"),
                    None => anyhow::anyhow!("cancelled before a snapshot was created"),
                });
            }
            if result.is_failure() {
                tracing::error!(command = "backup", status = %result.status, "Snapshot run failed");
                let reason = result
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| format!("snapshot finished with status {}", result.status));
                return Err(anyhow::Error::msg(reason));
            }
            tracing::info!(command = "backup", status = %result.status, "Snapshot run complete");
            Ok(())
        }
        Commands::Status {
            metadata,
            name,
            timeout,
        } => {
            let raw = load_config(&metadata)?;
            let backup_config = config::parse(&raw)
                .map_err(|e| anyhow::anyhow!("ConfigError [{}]: {}", e.field, e.reason))?;
            if name.is_empty() || name.contains('/') {
                anyhow::bail!("invalid snapshot name `{name}`");
            }
            let client = EsClient::new(backup_config.cluster_url(), client_settings(timeout))?;
            let url = snapshot::status_url(&backup_config, &name);
            match snapshot::check_status(&backup_config, &client, &name).await {
                Ok(status) => {
                    println!("snapshot: {name}\nstatus:   {status}\nurl:      {url}");
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "status", error = %e, "Status lookup failed");
                    Err(anyhow::anyhow!("{e}\ncheck manually: {url}"))
                }
            }
        }
    }
}
