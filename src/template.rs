//! Request bodies for the snapshot API, rendered from a validated [`BackupConfig`].
//!
//! Rendering is a pure function of its inputs. Payload keys live in a sorted map,
//! so two renders of the same config serialise to identical bytes.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::BackupConfig;

/// Repository type discriminator for S3-backed repositories.
pub const S3_REPOSITORY_TYPE: &str = "s3";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("bucket name is empty")]
    EmptyBucket,
    #[error("no index patterns to snapshot")]
    NoIndices,
    #[error("snapshot name is empty")]
    EmptySnapshotName,
    #[error("payload did not serialise to a JSON object: {0}")]
    Serialise(String),
}

/// JSON object body for a single API call.
#[derive(Clone, PartialEq)]
pub struct RequestPayload(Map<String, Value>);

impl fmt::Debug for RequestPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut shown = self.0.clone();
        if let Some(Value::Object(settings)) = shown.get_mut("settings") {
            if settings.contains_key("secret_key") {
                settings.insert("secret_key".into(), Value::from("<redacted>"));
            }
        }
        f.debug_tuple("RequestPayload").field(&shown).finish()
    }
}

impl RequestPayload {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // A map of JSON values always serialises.
        serde_json::to_vec(&self.0).unwrap_or_default()
    }

    fn from_serialize<T: Serialize>(value: &T) -> Result<Self, TemplateError> {
        match serde_json::to_value(value) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(TemplateError::Serialise(format!("got {other}"))),
            Err(e) => Err(TemplateError::Serialise(e.to_string())),
        }
    }
}

impl From<RequestPayload> for Value {
    fn from(payload: RequestPayload) -> Self {
        Value::Object(payload.0)
    }
}

#[derive(Serialize)]
struct RepositoryBody<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    settings: S3Settings<'a>,
}

#[derive(Serialize)]
struct S3Settings<'a> {
    bucket: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    base_path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_key: Option<&'a str>,
}

#[derive(Serialize)]
struct SnapshotBody {
    indices: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ignore_unavailable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_global_state: Option<bool>,
}

/// Settings Elasticsearch treats as secure and never returns from `GET /_snapshot/{repository}`.
pub const SECURE_SETTING_KEYS: [&str; 2] = ["access_key", "secret_key"];

/// Body for `PUT /_snapshot/{repository}`.
///
/// Bucket credentials attached to the config become `settings.access_key` and
/// `settings.secret_key`.
pub fn render_repository_payload(config: &BackupConfig) -> Result<RequestPayload, TemplateError> {
    if config.bucket_name().is_empty() {
        return Err(TemplateError::EmptyBucket);
    }
    let credentials = config.credentials();
    RequestPayload::from_serialize(&RepositoryBody {
        kind: S3_REPOSITORY_TYPE,
        settings: S3Settings {
            bucket: config.bucket_name(),
            region: config.bucket_region(),
            base_path: config.base_path(),
            access_key: credentials.map(|c| c.access_key.as_str()),
            secret_key: credentials.map(|c| c.secret_key()),
        },
    })
}

/// Body for `PUT /_snapshot/{repository}/{snapshot_name}`.
///
/// Index patterns are passed through as given, comma-joined.
pub fn render_snapshot_payload(
    config: &BackupConfig,
    snapshot_name: &str,
) -> Result<RequestPayload, TemplateError> {
    if snapshot_name.is_empty() {
        return Err(TemplateError::EmptySnapshotName);
    }
    if config.index_patterns().is_empty() {
        return Err(TemplateError::NoIndices);
    }
    RequestPayload::from_serialize(&SnapshotBody {
        indices: config.index_patterns().join(","),
        ignore_unavailable: config.ignore_unavailable(),
        include_global_state: config.include_global_state(),
    })
}
