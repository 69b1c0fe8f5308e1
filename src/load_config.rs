/// `load_config` module: reads the YAML metadata file and sources credentials from the environment.
///
/// This is the only place that touches the filesystem or environment variables. The YAML is
/// returned as a parsed mapping; turning it into a validated [`BackupConfig`] is the job of
/// [`crate::config::parse`], which the snapshot run performs itself.
///
/// # Errors
/// File and YAML errors use `anyhow::Error` for context-rich diagnostics and are surfaced at
/// the CLI boundary.
///
/// [`BackupConfig`]: crate::config::BackupConfig
use anyhow::Result;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

use crate::config::Credentials;

pub const ACCESS_KEY_VAR: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";

/// Reads and parses the YAML metadata file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<serde_yaml::Value> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    match serde_yaml::from_str::<serde_yaml::Value>(&config_content) {
        Ok(raw) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            Ok(raw)
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            Err(anyhow::anyhow!("Failed to parse config YAML: {e}"))
        }
    }
}

/// Builds [`Credentials`] from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`, honouring `.env`.
///
/// The keys are for the S3 bucket and end up in the repository settings, never in a request
/// header. Returns `None` unless both variables are set and non-empty.
pub fn credentials_from_env() -> Option<Credentials> {
    dotenvy::dotenv().ok();
    let access_key = std::env::var(ACCESS_KEY_VAR).ok().filter(|v| !v.is_empty());
    let secret_key = std::env::var(SECRET_KEY_VAR).ok().filter(|v| !v.is_empty());
    match (access_key, secret_key) {
        (Some(access_key), Some(secret_key)) => {
            info!(access_key_var = ACCESS_KEY_VAR, "Credentials found in env");
            Some(Credentials::new(access_key, secret_key))
        }
        (Some(_), None) | (None, Some(_)) => {
            warn!(
                access_key_var = ACCESS_KEY_VAR,
                secret_key_var = SECRET_KEY_VAR,
                "Only one of the credential variables is set, registering repository without static keys"
            );
            None
        }
        (None, None) => {
            warn!("No credentials in env, registering repository without static keys");
            None
        }
    }
}
