use es_snapshot::config::{self, BackupConfig, Credentials};
use es_snapshot::template::{render_repository_payload, render_snapshot_payload};
use serde_json::json;

fn backup_config(yaml: &str) -> BackupConfig {
    config::parse(&serde_yaml::from_str(yaml).unwrap()).expect("valid test config")
}

fn with_indices(indices: &str) -> BackupConfig {
    backup_config(&format!(
        "config:\n  url: http://localhost:9200\n  repository: backups\n  bucket:\n    s3: es-backups\n    region: us-east-2\n    snapshot:\n      indices: {indices}\n"
    ))
}

#[test]
fn repository_payload_encodes_type_bucket_and_region() {
    let payload = render_repository_payload(&with_indices("[_all]")).unwrap();
    assert_eq!(
        serde_json::Value::from(payload),
        json!({"type": "s3", "settings": {"bucket": "es-backups", "region": "us-east-2"}})
    );
}

#[test]
fn repository_payload_omits_absent_region() {
    let config = backup_config(
        "config:\n  url: http://localhost:9200\n  repository: backups\n  bucket:\n    s3: es-backups\n    snapshot:\n      indices: [_all]\n",
    );
    let payload = render_repository_payload(&config).unwrap();
    let settings = payload.get("settings").unwrap();
    assert!(settings.get("region").is_none(), "region must be omitted: {settings}");
    assert_eq!(
        String::from_utf8(payload.to_bytes()).unwrap(),
        r#"{"settings":{"bucket":"es-backups"},"type":"s3"}"#
    );
}

#[test]
fn repository_payload_carries_base_path_when_given() {
    let config = backup_config(
        "config:\n  url: http://localhost:9200\n  repository: backups\n  bucket:\n    s3: es-backups\n    base_path: prod/cluster-a\n    snapshot:\n      indices: [_all]\n",
    );
    let payload = render_repository_payload(&config).unwrap();
    assert_eq!(payload.get("settings").unwrap()["base_path"], "prod/cluster-a");
}

#[test]
fn rendering_is_byte_identical_across_calls() {
    let config = with_indices("[\"logs-*\", \"metrics-*\"]");
    assert_eq!(
        render_repository_payload(&config).unwrap().to_bytes(),
        render_repository_payload(&config).unwrap().to_bytes()
    );
    assert_eq!(
        render_snapshot_payload(&config, "snapshot-1").unwrap().to_bytes(),
        render_snapshot_payload(&config, "snapshot-1").unwrap().to_bytes()
    );
}

#[test]
fn all_indices_pass_through_literally() {
    let payload = render_snapshot_payload(&with_indices("[_all]"), "snapshot-1").unwrap();
    assert_eq!(payload.get("indices").unwrap(), "_all");
}

#[test]
fn patterns_are_comma_joined_in_order() {
    let payload =
        render_snapshot_payload(&with_indices("[\"logs-*\", \"metrics-*\"]"), "snapshot-1").unwrap();
    assert_eq!(payload.get("indices").unwrap(), "logs-*,metrics-*");
    assert_eq!(payload.as_map().len(), 1, "no optional flags were configured");
}

#[test]
fn snapshot_flags_are_included_only_when_configured() {
    let config = backup_config(
        "config:\n  url: http://localhost:9200\n  repository: backups\n  bucket:\n    s3: es-backups\n    snapshot:\n      indices: [audit]\n      include_global_state: false\n",
    );
    let payload = render_snapshot_payload(&config, "snapshot-1").unwrap();
    assert_eq!(
        serde_json::Value::from(payload),
        json!({"indices": "audit", "include_global_state": false})
    );
}

#[test]
fn empty_snapshot_name_is_a_template_error() {
    assert!(render_snapshot_payload(&with_indices("[_all]"), "").is_err());
}

#[test]
fn bucket_credentials_become_repository_settings() {
    let config = with_indices("[_all]").with_credentials(Some(Credentials::new("AKIAEXAMPLE", "SECRET")));
    let payload = render_repository_payload(&config).unwrap();
    assert_eq!(
        payload.get("settings").unwrap(),
        &json!({
            "bucket": "es-backups",
            "region": "us-east-2",
            "access_key": "AKIAEXAMPLE",
            "secret_key": "SECRET"
        })
    );
    let debug = format!("{payload:?}");
    assert!(!debug.contains("SECRET"), "secret leaked into Debug: {debug}");
    assert!(debug.contains("AKIAEXAMPLE"));
}
