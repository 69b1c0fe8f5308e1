//! Typed backup configuration, validated from an already-parsed YAML mapping.
//!
//! A [`BackupConfig`] can only be obtained through [`parse`], so every value of
//! the type has passed validation. Nothing here touches the network or the
//! filesystem; reading the YAML file is the job of [`crate::load_config`].
//!
//! Accepted layout:
//!
//! ```yaml
//! config:
//!   url: http://localhost:9200
//!   repository: nightly_backups
//!   bucket:
//!     s3: my-es-backups
//!     region: eu-west-1        # optional
//!     base_path: cluster-a     # optional
//!     snapshot:
//!       indices: ["logs-*", "metrics-*"]
//!       ignore_unavailable: true      # optional
//!       include_global_state: false   # optional
//! ```

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::Value;
use std::fmt;
use std::sync::OnceLock;
use tracing::{debug, info, warn};
use url::Url;

pub const FIELD_ROOT: &str = "config";
pub const FIELD_URL: &str = "config.url";
pub const FIELD_REPOSITORY: &str = "config.repository";
pub const FIELD_BUCKET_SECTION: &str = "config.bucket";
pub const FIELD_BUCKET: &str = "config.bucket.s3";
pub const FIELD_REGION: &str = "config.bucket.region";
pub const FIELD_BASE_PATH: &str = "config.bucket.base_path";
pub const FIELD_SNAPSHOT_SECTION: &str = "config.bucket.snapshot";
pub const FIELD_INDICES: &str = "config.bucket.snapshot.indices";
pub const FIELD_IGNORE_UNAVAILABLE: &str = "config.bucket.snapshot.ignore_unavailable";
pub const FIELD_INCLUDE_GLOBAL_STATE: &str = "config.bucket.snapshot.include_global_state";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid `{field}`: {reason}")]
pub struct ConfigError {
    pub field: String,
    pub reason: String,
}

impl ConfigError {
    fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// S3 access/secret key pair the cluster uses to reach the bucket.
///
/// Rendered into the repository settings; `Debug` never shows the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Validated, immutable description of one backup run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    cluster_url: Url,
    repository_name: String,
    bucket_name: String,
    bucket_region: Option<String>,
    base_path: Option<String>,
    index_patterns: Vec<String>,
    ignore_unavailable: Option<bool>,
    include_global_state: Option<bool>,
    credentials: Option<Credentials>,
}

impl BackupConfig {
    /// Cluster URL without a trailing slash, ready for path concatenation.
    pub fn cluster_url(&self) -> &str {
        self.cluster_url.as_str().trim_end_matches('/')
    }

    pub fn repository_name(&self) -> &str {
        &self.repository_name
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    pub fn bucket_region(&self) -> Option<&str> {
        self.bucket_region.as_deref()
    }

    pub fn base_path(&self) -> Option<&str> {
        self.base_path.as_deref()
    }

    pub fn index_patterns(&self) -> &[String] {
        &self.index_patterns
    }

    pub fn ignore_unavailable(&self) -> Option<bool> {
        self.ignore_unavailable
    }

    pub fn include_global_state(&self) -> Option<bool> {
        self.include_global_state
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Attaches bucket credentials sourced outside the YAML file.
    ///
    /// Without them the repository is registered with no static keys and the cluster
    /// falls back to its keystore or instance role.
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn trace_loaded(&self) {
        info!(
            cluster_url = %self.cluster_url(),
            repository = %self.repository_name,
            bucket = %self.bucket_name,
            region = self.bucket_region.as_deref().unwrap_or("<provider default>"),
            indices_count = self.index_patterns.len(),
            static_keys = self.credentials.is_some(),
            "Loaded BackupConfig"
        );
        debug!(?self, "BackupConfig loaded (full debug)");
    }
}

// Leaves stay as raw YAML values so type errors can be reported against their own field.

#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    config: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSection {
    url: Option<Value>,
    repository: Option<Value>,
    bucket: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBucket {
    s3: Option<Value>,
    region: Option<Value>,
    base_path: Option<Value>,
    snapshot: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSnapshot {
    indices: Option<Value>,
    ignore_unavailable: Option<Value>,
    include_global_state: Option<Value>,
}

fn repository_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap())
}

/// A nested mapping; absent or `null` reads as empty.
fn mapping<T: DeserializeOwned + Default>(value: Option<Value>, field: &str) -> Result<T, ConfigError> {
    match value {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value @ Value::Mapping(_)) => {
            serde_yaml::from_value(value).map_err(|e| ConfigError::new(field, e.to_string()))
        }
        Some(_) => Err(ConfigError::new(field, "must be a mapping")),
    }
}

/// A scalar read as text. YAML numbers count: `s3: 20241014` is a valid bucket name.
fn text(value: Option<Value>, field: &str) -> Result<Option<String>, ConfigError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(ConfigError::new(field, "must be a string")),
    }
}

fn flag(value: Option<Value>, field: &str) -> Result<Option<bool>, ConfigError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(_) => Err(ConfigError::new(field, "must be true or false")),
    }
}

fn required(value: Option<Value>, field: &str) -> Result<String, ConfigError> {
    match text(value, field)? {
        Some(v) if !v.is_empty() => Ok(v),
        Some(_) => Err(ConfigError::new(field, "must not be empty")),
        None => Err(ConfigError::new(field, "is required")),
    }
}

fn optional(value: Option<Value>, field: &str) -> Result<Option<String>, ConfigError> {
    match text(value, field)? {
        Some(v) if v.is_empty() => {
            warn!(field, "Blank optional field treated as absent");
            Ok(None)
        }
        other => Ok(other),
    }
}

fn parse_indices(value: Option<Value>) -> Result<Vec<String>, ConfigError> {
    let entries = match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(entries)) => entries,
        Some(_) => {
            return Err(ConfigError::new(
                FIELD_INDICES,
                "must be a list of index names or patterns, e.g. [_all]",
            ))
        }
    };
    if entries.is_empty() {
        return Err(ConfigError::new(
            FIELD_INDICES,
            "must list at least one index or pattern",
        ));
    }
    let mut patterns = Vec::with_capacity(entries.len());
    for (position, entry) in entries.into_iter().enumerate() {
        match text(Some(entry), FIELD_INDICES) {
            Ok(Some(index)) if !index.is_empty() => patterns.push(index),
            Ok(_) => {
                return Err(ConfigError::new(
                    FIELD_INDICES,
                    format!("entry {position} is empty"),
                ))
            }
            Err(_) => {
                return Err(ConfigError::new(
                    FIELD_INDICES,
                    format!("entry {position} must be a string"),
                ))
            }
        }
    }
    Ok(patterns)
}

/// Validates a parsed YAML document into a [`BackupConfig`].
pub fn parse(raw: &serde_yaml::Value) -> Result<BackupConfig, ConfigError> {
    let doc: RawDocument = mapping(Some(raw.clone()), FIELD_ROOT)?;
    let section = match doc.config {
        None | Some(Value::Null) => return Err(ConfigError::new(FIELD_ROOT, "is required")),
        some => mapping::<RawSection>(some, FIELD_ROOT)?,
    };

    let url_raw = required(section.url, FIELD_URL)?;
    let cluster_url =
        Url::parse(&url_raw).map_err(|e| ConfigError::new(FIELD_URL, e.to_string()))?;
    if !matches!(cluster_url.scheme(), "http" | "https") {
        return Err(ConfigError::new(
            FIELD_URL,
            format!("unsupported scheme `{}`, expected http or https", cluster_url.scheme()),
        ));
    }
    if cluster_url.host_str().is_none() {
        return Err(ConfigError::new(FIELD_URL, "has no host"));
    }

    let repository_name = required(section.repository, FIELD_REPOSITORY)?;
    if !repository_name_pattern().is_match(&repository_name) {
        return Err(ConfigError::new(
            FIELD_REPOSITORY,
            format!("`{repository_name}` may only contain letters, digits, `_` and `-`"),
        ));
    }

    let bucket: RawBucket = mapping(section.bucket, FIELD_BUCKET_SECTION)?;
    let bucket_name = required(bucket.s3, FIELD_BUCKET)?;
    let bucket_region = optional(bucket.region, FIELD_REGION)?;
    let base_path = optional(bucket.base_path, FIELD_BASE_PATH)?;

    let snapshot: RawSnapshot = mapping(bucket.snapshot, FIELD_SNAPSHOT_SECTION)?;
    let index_patterns = parse_indices(snapshot.indices)?;

    Ok(BackupConfig {
        cluster_url,
        repository_name,
        bucket_name,
        bucket_region,
        base_path,
        index_patterns,
        ignore_unavailable: flag(snapshot.ignore_unavailable, FIELD_IGNORE_UNAVAILABLE)?,
        include_global_state: flag(snapshot.include_global_state, FIELD_INCLUDE_GLOBAL_STATE)?,
        credentials: None,
    })
}
