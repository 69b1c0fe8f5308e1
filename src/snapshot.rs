//! Snapshot workflow: validate → register repository → (verify) → create snapshot → (monitor).
//!
//! The run is an explicit state machine ([`RunState`]). Each step issues at most one request
//! through an [`EsTransport`] and decides the next state from the response; errors are carried
//! as values into the final [`SnapshotRunResult`] and never short-circuit with `?`.
//!
//! # Idempotence
//! - Repository registration tolerates a re-run: a 400 saying the repository already exists
//!   is accepted once the registered settings are confirmed identical to ours.
//! - Snapshot creation is never retried and always uses a fresh name (see [`SnapshotNaming`]),
//!   since Elasticsearch identifies snapshots by name.
//!
//! # Monitoring
//! Optional. Polls `GET /_snapshot/{repository}/{snapshot}?pretty` until the snapshot reaches
//! a terminal state or [`MonitorSettings::max_wait`] elapses. Running out of time yields
//! [`SnapshotStatus::Unknown`], not a failure.
//!
//! # Cancellation
//! [`RunOptions::cancel`] is checked between steps and raced against the poll sleep. An
//! in-flight request finishes first.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{EsTransport, HttpResult, TransportError};
use crate::config::{self, BackupConfig, ConfigError};
use crate::template::{self, RequestPayload, TemplateError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStatus {
    InProgress,
    Success,
    Partial,
    Failed,
    Unknown,
}

impl SnapshotStatus {
    /// Maps a `snapshots[].state` value reported by Elasticsearch.
    pub fn from_state(state: &str) -> Self {
        match state {
            "SUCCESS" => SnapshotStatus::Success,
            "PARTIAL" => SnapshotStatus::Partial,
            "FAILED" | "INCOMPATIBLE" => SnapshotStatus::Failed,
            "IN_PROGRESS" | "STARTED" | "INIT" => SnapshotStatus::InProgress,
            _ => SnapshotStatus::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SnapshotStatus::Success | SnapshotStatus::Partial | SnapshotStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotStatus::InProgress => "IN_PROGRESS",
            SnapshotStatus::Success => "SUCCESS",
            SnapshotStatus::Partial => "PARTIAL",
            SnapshotStatus::Failed => "FAILED",
            SnapshotStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Transport,
    Repository,
    Snapshot,
    /// Monitoring gave up waiting. Informational: the snapshot may still be running.
    TimeoutExceeded,
}

impl ErrorKind {
    pub fn is_failure(&self) -> bool {
        !matches!(self, ErrorKind::TimeoutExceeded)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Config => "ConfigError",
            ErrorKind::Transport => "TransportError",
            ErrorKind::Repository => "RepositoryError",
            ErrorKind::Snapshot => "SnapshotError",
            ErrorKind::TimeoutExceeded => "TimeoutExceeded",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
    pub field: Option<String>,
    pub http_status: Option<u16>,
}

impl ErrorDetail {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            field: None,
            http_status: None,
        }
    }

    fn from_response(kind: ErrorKind, response: &HttpResult) -> Self {
        Self {
            http_status: Some(response.status_code),
            ..Self::new(kind, error_reason(response))
        }
    }

    fn from_transport(kind: ErrorKind, e: &TransportError) -> Self {
        Self::new(kind, e.to_string())
    }

    fn from_template(kind: ErrorKind, e: &TemplateError) -> Self {
        Self::new(kind, format!("payload rendering failed: {e}"))
    }
}

impl From<ConfigError> for ErrorDetail {
    fn from(e: ConfigError) -> Self {
        Self {
            field: Some(e.field.clone()),
            ..Self::new(ErrorKind::Config, e.reason)
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(field) = &self.field {
            write!(f, " [{field}]")?;
        }
        if let Some(status) = self.http_status {
            write!(f, " (HTTP {status})")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Final outcome of one run. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRunResult {
    pub repository_created: bool,
    pub snapshot_name: String,
    pub status: SnapshotStatus,
    pub error: Option<ErrorDetail>,
    pub cancelled: bool,
}

impl SnapshotRunResult {
    /// True for a run that ended in a failed state or with a snapshot reported `FAILED`.
    ///
    /// A cancelled run is not a failure here; callers decide what cancellation means.
    pub fn is_failure(&self) -> bool {
        self.status == SnapshotStatus::Failed
            || self.error.as_ref().is_some_and(|e| e.kind.is_failure())
    }
}

impl fmt::Display for SnapshotRunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "snapshot:           {}",
            if self.snapshot_name.is_empty() {
                "<not created>"
            } else {
                &self.snapshot_name
            }
        )?;
        writeln!(f, "status:             {}", self.status)?;
        writeln!(f, "repository created: {}", self.repository_created)?;
        if self.cancelled {
            writeln!(f, "cancelled:          true")?;
        }
        if let Some(error) = &self.error {
            writeln!(f, "error:              {error}")?;
        }
        Ok(())
    }
}

/// URL operators can poll for the current state of a snapshot.
pub fn status_url(config: &BackupConfig, snapshot_name: &str) -> String {
    format!("{}{}", config.cluster_url(), snapshot_status_path(config, snapshot_name))
}

fn repository_path(config: &BackupConfig) -> String {
    format!("/_snapshot/{}", config.repository_name())
}

fn snapshot_path(config: &BackupConfig, snapshot_name: &str) -> String {
    format!("/_snapshot/{}/{}", config.repository_name(), snapshot_name)
}

fn snapshot_status_path(config: &BackupConfig, snapshot_name: &str) -> String {
    format!("{}?pretty", snapshot_path(config, snapshot_name))
}

/// How snapshot names are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotNaming {
    /// `snapshot-YYYY.MM.DD-hhmmss` (UTC); unique per run.
    #[default]
    Timestamp,
    /// `snapshot-YYYY-MM-DD` (UTC); one name per calendar day.
    Daily,
}

impl SnapshotNaming {
    pub fn snapshot_name(&self, now: DateTime<Utc>) -> String {
        match self {
            SnapshotNaming::Timestamp => format!("snapshot-{}", now.format("%Y.%m.%d-%H%M%S")),
            SnapshotNaming::Daily => format!("snapshot-{}", now.format("%Y-%m-%d")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Poll until completion when set; fire-and-forget otherwise.
    pub wait: Option<MonitorSettings>,
    /// Ask the cluster to verify the repository before snapshotting.
    pub verify_repository: bool,
    pub naming: SnapshotNaming,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Validating,
    RegisteringRepository,
    VerifyingRepository,
    CreatingSnapshot,
    Monitoring,
    Completed {
        status: SnapshotStatus,
        note: Option<ErrorDetail>,
    },
    Failed(ErrorDetail),
    Cancelled,
}

impl RunState {
    fn name(&self) -> &'static str {
        match self {
            RunState::Validating => "Validating",
            RunState::RegisteringRepository => "RegisteringRepository",
            RunState::VerifyingRepository => "VerifyingRepository",
            RunState::CreatingSnapshot => "CreatingSnapshot",
            RunState::Monitoring => "Monitoring",
            RunState::Completed { .. } => "Completed",
            RunState::Failed(_) => "Failed",
            RunState::Cancelled => "Cancelled",
        }
    }
}

/// Validates `raw` and runs the workflow. A config error ends the run before any request.
pub async fn run<T>(raw: &serde_yaml::Value, transport: &T, options: &RunOptions) -> SnapshotRunResult
where
    T: EsTransport + ?Sized,
{
    info!(state = RunState::Validating.name(), "[SNAPSHOT] Validating configuration");
    match config::parse(raw) {
        Ok(config) => {
            config.trace_loaded();
            run_with_config(&config, transport, options).await
        }
        Err(e) => {
            error!(field = %e.field, reason = %e.reason, "[SNAPSHOT][ERROR] Configuration rejected");
            SnapshotRunResult {
                repository_created: false,
                snapshot_name: String::new(),
                status: SnapshotStatus::Failed,
                error: Some(e.into()),
                cancelled: false,
            }
        }
    }
}

/// Runs the workflow for an already-validated config.
pub async fn run_with_config<T>(
    config: &BackupConfig,
    transport: &T,
    options: &RunOptions,
) -> SnapshotRunResult
where
    T: EsTransport + ?Sized,
{
    let mut run = SnapshotRun {
        config,
        transport,
        options,
        repository_created: false,
        snapshot_name: String::new(),
    };
    let mut state = RunState::RegisteringRepository;

    loop {
        if !is_terminal(&state) && options.cancel.is_cancelled() {
            warn!(skipped = state.name(), "[SNAPSHOT] Cancellation observed, stopping run");
            state = RunState::Cancelled;
        }
        debug!(state = state.name(), "[SNAPSHOT] Entering state");
        state = match state {
            RunState::Validating | RunState::RegisteringRepository => {
                run.register_repository().await
            }
            RunState::VerifyingRepository => run.verify_repository().await,
            RunState::CreatingSnapshot => run.create_snapshot().await,
            RunState::Monitoring => run.monitor().await,
            terminal => return run.finish(terminal),
        };
    }
}

fn is_terminal(state: &RunState) -> bool {
    matches!(
        state,
        RunState::Completed { .. } | RunState::Failed(_) | RunState::Cancelled
    )
}

struct SnapshotRun<'a, T: ?Sized> {
    config: &'a BackupConfig,
    transport: &'a T,
    options: &'a RunOptions,
    repository_created: bool,
    snapshot_name: String,
}

impl<'a, T> SnapshotRun<'a, T>
where
    T: EsTransport + ?Sized,
{
    fn after_registration(&self) -> RunState {
        if self.options.verify_repository {
            RunState::VerifyingRepository
        } else {
            RunState::CreatingSnapshot
        }
    }

    async fn register_repository(&mut self) -> RunState {
        let config = self.config;
        let repository = config.repository_name();
        let payload = match template::render_repository_payload(config) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "[SNAPSHOT][ERROR] Repository payload could not be rendered");
                return RunState::Failed(ErrorDetail::from_template(ErrorKind::Repository, &e));
            }
        };
        info!(
            repository,
            bucket = config.bucket_name(),
            "[SNAPSHOT][REPOSITORY] Registering S3 repository"
        );

        let response = match self
            .transport
            .put(&repository_path(config), payload.clone())
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, repository, "[SNAPSHOT][ERROR][REPOSITORY] Transport exhausted");
                return RunState::Failed(ErrorDetail::from_transport(ErrorKind::Repository, &e));
            }
        };

        if response.is_success() {
            let acknowledged = response
                .json()
                .and_then(|v| v.get("acknowledged").and_then(Value::as_bool));
            if acknowledged == Some(false) {
                warn!(repository, "[SNAPSHOT][REPOSITORY] Registration not acknowledged by all nodes");
            }
            info!(
                repository,
                status_code = response.status_code,
                "[SNAPSHOT][REPOSITORY] Repository registered"
            );
            self.repository_created = true;
            return self.after_registration();
        }

        if reports_existing_repository(&response) {
            match self.registered_settings_match(&payload).await {
                Ok(true) => {
                    info!(repository, "[SNAPSHOT][REPOSITORY] Repository already registered with identical settings");
                    return self.after_registration();
                }
                Ok(false) => {
                    error!(repository, "[SNAPSHOT][ERROR][REPOSITORY] Repository exists with different settings");
                    return RunState::Failed(ErrorDetail {
                        http_status: Some(response.status_code),
                        ..ErrorDetail::new(
                            ErrorKind::Repository,
                            format!(
                                "repository `{repository}` already exists with different settings"
                            ),
                        )
                    });
                }
                Err(detail) => {
                    error!(error = %detail, repository, "[SNAPSHOT][ERROR][REPOSITORY] Could not read existing repository");
                    return RunState::Failed(detail);
                }
            }
        }

        error!(
            repository,
            status_code = response.status_code,
            body = %response.body,
            "[SNAPSHOT][ERROR][REPOSITORY] Registration rejected"
        );
        RunState::Failed(ErrorDetail::from_response(ErrorKind::Repository, &response))
    }

    /// Compares the cluster's view of the repository with the payload we tried to register.
    async fn registered_settings_match(&self, payload: &RequestPayload) -> Result<bool, ErrorDetail> {
        let repository = self.config.repository_name();
        let response = self
            .transport
            .get(&repository_path(self.config))
            .await
            .map_err(|e| ErrorDetail::from_transport(ErrorKind::Repository, &e))?;
        if !response.is_success() {
            return Err(ErrorDetail::from_response(ErrorKind::Repository, &response));
        }
        let registered = response
            .json()
            .and_then(|v| v.get(repository).cloned())
            .ok_or_else(|| {
                ErrorDetail::new(
                    ErrorKind::Repository,
                    format!("cluster did not describe repository `{repository}`"),
                )
            })?;
        Ok(registered.get("type") == payload.get("type")
            && comparable_settings(registered.get("settings"))
                == comparable_settings(payload.get("settings")))
    }

    async fn verify_repository(&mut self) -> RunState {
        let repository = self.config.repository_name();
        let path = format!("{}/_verify?pretty", repository_path(self.config));
        info!(repository, "[SNAPSHOT][REPOSITORY] Verifying repository");
        match self.transport.post(&path, None).await {
            Ok(r) if r.is_success() => {
                let nodes = r
                    .json()
                    .and_then(|v| v.get("nodes").and_then(Value::as_object).map(|n| n.len()))
                    .unwrap_or(0);
                info!(repository, nodes, "[SNAPSHOT][REPOSITORY] Repository verified");
                RunState::CreatingSnapshot
            }
            Ok(r) => {
                error!(repository, status_code = r.status_code, body = %r.body, "[SNAPSHOT][ERROR][REPOSITORY] Verification failed");
                RunState::Failed(ErrorDetail::from_response(ErrorKind::Repository, &r))
            }
            Err(e) => {
                error!(error = %e, repository, "[SNAPSHOT][ERROR][REPOSITORY] Verification transport exhausted");
                RunState::Failed(ErrorDetail::from_transport(ErrorKind::Repository, &e))
            }
        }
    }

    async fn create_snapshot(&mut self) -> RunState {
        let snapshot_name = self.options.naming.snapshot_name(Utc::now());
        let payload = match template::render_snapshot_payload(self.config, &snapshot_name) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "[SNAPSHOT][ERROR] Snapshot payload could not be rendered");
                return RunState::Failed(ErrorDetail::from_template(ErrorKind::Snapshot, &e));
            }
        };
        info!(
            snapshot = %snapshot_name,
            indices = %self.config.index_patterns().join(","),
            "[SNAPSHOT][CREATE] Requesting snapshot"
        );

        let result = self
            .transport
            .put(&snapshot_path(self.config, &snapshot_name), payload)
            .await;
        self.snapshot_name = snapshot_name;

        match result {
            Ok(r) if r.is_success() => {
                info!(
                    snapshot = %self.snapshot_name,
                    status_url = %status_url(self.config, &self.snapshot_name),
                    "[SNAPSHOT][CREATE] Snapshot accepted"
                );
                if self.options.wait.is_some() {
                    RunState::Monitoring
                } else {
                    RunState::Completed {
                        status: SnapshotStatus::InProgress,
                        note: None,
                    }
                }
            }
            Ok(r) => {
                error!(
                    snapshot = %self.snapshot_name,
                    status_code = r.status_code,
                    body = %r.body,
                    "[SNAPSHOT][ERROR][CREATE] Snapshot rejected"
                );
                RunState::Failed(ErrorDetail::from_response(ErrorKind::Snapshot, &r))
            }
            Err(e) => {
                error!(error = %e, snapshot = %self.snapshot_name, "[SNAPSHOT][ERROR][CREATE] Transport exhausted");
                RunState::Failed(ErrorDetail::from_transport(ErrorKind::Snapshot, &e))
            }
        }
    }

    async fn monitor(&mut self) -> RunState {
        let settings = self.options.wait.clone().unwrap_or_default();
        let path = snapshot_status_path(self.config, &self.snapshot_name);
        let started = Instant::now();
        let mut polls: u32 = 0;

        loop {
            if self.options.cancel.is_cancelled() {
                warn!(snapshot = %self.snapshot_name, polls, "[SNAPSHOT][MONITOR] Cancelled while waiting");
                return RunState::Cancelled;
            }
            polls += 1;
            match fetch_status(self.transport, &path).await {
                Ok(status) if status.is_terminal() => {
                    info!(snapshot = %self.snapshot_name, %status, polls, "[SNAPSHOT][MONITOR] Snapshot finished");
                    return RunState::Completed { status, note: None };
                }
                Ok(status) => {
                    debug!(snapshot = %self.snapshot_name, %status, polls, "[SNAPSHOT][MONITOR] Snapshot still running");
                }
                Err(detail) => {
                    warn!(snapshot = %self.snapshot_name, error = %detail, polls, "[SNAPSHOT][MONITOR] Status poll failed, will retry");
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= settings.max_wait {
                warn!(
                    snapshot = %self.snapshot_name,
                    polls,
                    waited_ms = elapsed.as_millis() as u64,
                    "[SNAPSHOT][MONITOR] Gave up waiting; snapshot may still be running"
                );
                return RunState::Completed {
                    status: SnapshotStatus::Unknown,
                    note: Some(ErrorDetail::new(
                        ErrorKind::TimeoutExceeded,
                        format!(
                            "no terminal state after {}s; check {}",
                            settings.max_wait.as_secs(),
                            status_url(self.config, &self.snapshot_name)
                        ),
                    )),
                };
            }

            let pause = settings.poll_interval.min(settings.max_wait - elapsed);
            tokio::select! {
                _ = self.options.cancel.cancelled() => {}
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    fn finish(self, terminal: RunState) -> SnapshotRunResult {
        let (status, error, cancelled) = match terminal {
            RunState::Completed { status, note } => (status, note, false),
            RunState::Failed(detail) => (SnapshotStatus::Failed, Some(detail), false),
            _ => (SnapshotStatus::Unknown, None, true),
        };
        info!(
            snapshot = %self.snapshot_name,
            %status,
            cancelled,
            repository_created = self.repository_created,
            "[SNAPSHOT] Run finished"
        );
        SnapshotRunResult {
            repository_created: self.repository_created,
            snapshot_name: self.snapshot_name,
            status,
            error,
            cancelled,
        }
    }
}

/// One status lookup for `snapshot_name`, as used by both monitoring and operators.
pub async fn check_status<T>(
    config: &BackupConfig,
    transport: &T,
    snapshot_name: &str,
) -> Result<SnapshotStatus, ErrorDetail>
where
    T: EsTransport + ?Sized,
{
    fetch_status(transport, &snapshot_status_path(config, snapshot_name)).await
}

async fn fetch_status<T>(transport: &T, path: &str) -> Result<SnapshotStatus, ErrorDetail>
where
    T: EsTransport + ?Sized,
{
    let response = transport
        .get(path)
        .await
        .map_err(|e| ErrorDetail::from_transport(ErrorKind::Transport, &e))?;
    if !response.is_success() {
        return Err(ErrorDetail::from_response(ErrorKind::Snapshot, &response));
    }
    snapshot_state(&response)
        .map(|state| SnapshotStatus::from_state(&state))
        .ok_or_else(|| {
            ErrorDetail::new(
                ErrorKind::Snapshot,
                "response did not contain snapshots[0].state",
            )
        })
}

fn snapshot_state(response: &HttpResult) -> Option<String> {
    response
        .json()?
        .get("snapshots")?
        .get(0)?
        .get("state")?
        .as_str()
        .map(str::to_string)
}

/// Repository settings minus the secure keys, which the cluster never echoes back.
fn comparable_settings(settings: Option<&Value>) -> Option<serde_json::Map<String, Value>> {
    let mut settings = settings?.as_object()?.clone();
    for key in template::SECURE_SETTING_KEYS {
        settings.remove(key);
    }
    Some(settings)
}

fn reports_existing_repository(response: &HttpResult) -> bool {
    response.status_code == 400 && response.body.to_ascii_lowercase().contains("already exists")
}

/// Best human-readable reason from an Elasticsearch error body.
fn error_reason(response: &HttpResult) -> String {
    response
        .json()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("reason").or(Some(e)))
                .map(|r| match r {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
        })
        .unwrap_or_else(|| response.body.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_names_are_unique_per_second() {
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 9, 5, 7).unwrap();
        assert_eq!(
            SnapshotNaming::Timestamp.snapshot_name(now),
            "snapshot-2026.10.14-090507"
        );
        assert_eq!(SnapshotNaming::Daily.snapshot_name(now), "snapshot-2026-10-14");
    }

    #[test]
    fn error_reason_prefers_nested_reason() {
        let response = HttpResult::new(
            409,
            r#"{"error":{"type":"invalid_snapshot_name_exception","reason":"snapshot with the same name already exists"},"status":409}"#,
        );
        assert_eq!(
            error_reason(&response),
            "snapshot with the same name already exists"
        );
        assert_eq!(error_reason(&HttpResult::new(502, "bad gateway")), "bad gateway");
    }

    #[test]
    fn timeout_is_not_a_failure() {
        let result = SnapshotRunResult {
            repository_created: true,
            snapshot_name: "snapshot-x".into(),
            status: SnapshotStatus::Unknown,
            error: Some(ErrorDetail::new(ErrorKind::TimeoutExceeded, "gave up")),
            cancelled: false,
        };
        assert!(!result.is_failure());
    }
}
