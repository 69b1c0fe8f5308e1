use es_snapshot::load_config::{credentials_from_env, load_config, ACCESS_KEY_VAR, SECRET_KEY_VAR};
use serial_test::serial;
use std::env;
use std::fs::write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_returns_parsed_mapping() {
    let config_yaml = r#"
config:
  url: http://localhost:9200
  repository: nightly
  bucket:
    s3: es-backups
    snapshot:
      indices: ["logs-*"]
"#;
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), config_yaml).unwrap();

    let raw = load_config(config_file.path()).expect("Config should load");

    assert_eq!(raw["config"]["repository"].as_str(), Some("nightly"));
    let config = es_snapshot::config::parse(&raw).expect("loaded mapping should validate");
    assert_eq!(config.bucket_name(), "es-backups");
}

#[test]
fn test_load_config_errors_for_invalid_file() {
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), b"not-yaml: [:::").unwrap();

    let err = load_config(config_file.path()).unwrap_err();
    let msg = err.to_string();
    assert!(
        msg.contains("parse") || msg.contains("YAML"),
        "Parse error expected, got: {msg}"
    );
}

#[test]
fn test_load_config_errors_for_missing_file() {
    let err = load_config("/definitely/not/here.yaml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
#[serial]
fn test_credentials_loaded_when_both_keys_present() {
    env::set_var(ACCESS_KEY_VAR, "AKIAEXAMPLE");
    env::set_var(SECRET_KEY_VAR, "s3cr3t");

    let credentials = credentials_from_env().expect("credentials expected");
    assert_eq!(credentials.access_key, "AKIAEXAMPLE");
    assert!(!format!("{credentials:?}").contains("s3cr3t"));

    env::remove_var(ACCESS_KEY_VAR);
    env::remove_var(SECRET_KEY_VAR);
}

#[test]
#[serial]
fn test_credentials_absent_when_secret_missing() {
    env::set_var(ACCESS_KEY_VAR, "AKIAEXAMPLE");
    env::remove_var(SECRET_KEY_VAR);

    assert!(credentials_from_env().is_none());

    env::remove_var(ACCESS_KEY_VAR);
}
