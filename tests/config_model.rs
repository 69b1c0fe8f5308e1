use es_snapshot::config::{self, ConfigError};

fn parse(yaml: &str) -> Result<config::BackupConfig, ConfigError> {
    let raw: serde_yaml::Value = serde_yaml::from_str(yaml).expect("test YAML must parse");
    config::parse(&raw)
}

#[test]
fn full_document_is_parsed_in_order() {
    let config = parse(
        r#"
config:
  url: https://es.internal:9200
  repository: nightly_backups-01
  bucket:
    s3: es-backups
    region: eu-west-1
    base_path: cluster-a
    snapshot:
      indices: ["logs-*", "metrics-*", "audit"]
      ignore_unavailable: true
      include_global_state: false
"#,
    )
    .expect("config should be valid");

    assert_eq!(config.cluster_url(), "https://es.internal:9200");
    assert_eq!(config.repository_name(), "nightly_backups-01");
    assert_eq!(config.bucket_name(), "es-backups");
    assert_eq!(config.bucket_region(), Some("eu-west-1"));
    assert_eq!(config.base_path(), Some("cluster-a"));
    assert_eq!(config.index_patterns(), ["logs-*", "metrics-*", "audit"]);
    assert_eq!(config.ignore_unavailable(), Some(true));
    assert_eq!(config.include_global_state(), Some(false));
}

#[test]
fn region_is_optional() {
    let config = parse(
        r#"
config:
  url: http://localhost:9200
  repository: backups
  bucket:
    s3: es-backups
    snapshot:
      indices: [_all]
"#,
    )
    .unwrap();
    assert_eq!(config.bucket_region(), None);
    assert_eq!(config.index_patterns(), ["_all"]);
}

#[test]
fn missing_repository_is_rejected() {
    let err = parse(
        r#"
config:
  url: http://localhost:9200
  bucket:
    s3: es-backups
    snapshot:
      indices: [_all]
"#,
    )
    .unwrap_err();
    assert_eq!(err.field, "config.repository");
}

#[test]
fn empty_bucket_is_rejected() {
    let err = parse(
        r#"
config:
  url: http://localhost:9200
  repository: backups
  bucket:
    s3: "  "
    snapshot:
      indices: [_all]
"#,
    )
    .unwrap_err();
    assert_eq!(err.field, "config.bucket.s3");
    assert!(err.reason.contains("empty"), "got: {err}");
}

#[test]
fn missing_bucket_section_is_rejected() {
    let err = parse(
        r#"
config:
  url: http://localhost:9200
  repository: backups
"#,
    )
    .unwrap_err();
    assert_eq!(err.field, "config.bucket.s3");
}

#[test]
fn repository_name_with_invalid_characters_is_rejected() {
    for name in ["my repo", "repo/../x", "repo?pretty", "répo"] {
        let yaml = format!(
            "config:\n  url: http://localhost:9200\n  repository: \"{name}\"\n  bucket:\n    s3: b\n    snapshot:\n      indices: [_all]\n"
        );
        let err = parse(&yaml).unwrap_err();
        assert_eq!(err.field, "config.repository", "name {name:?} should be rejected");
    }
}

#[test]
fn empty_indices_are_rejected() {
    for indices in ["[]", "", "[\"logs-*\", \"\"]"] {
        let yaml = format!(
            "config:\n  url: http://localhost:9200\n  repository: r\n  bucket:\n    s3: b\n    snapshot:\n      indices: {indices}\n"
        );
        let err = parse(&yaml).unwrap_err();
        assert_eq!(err.field, "config.bucket.snapshot.indices", "indices {indices:?}");
    }
}

#[test]
fn malformed_url_is_rejected() {
    let err = parse(
        "config:\n  url: not a url\n  repository: r\n  bucket:\n    s3: b\n    snapshot:\n      indices: [_all]\n",
    )
    .unwrap_err();
    assert_eq!(err.field, "config.url");
}

#[test]
fn document_without_config_section_is_rejected() {
    let err = parse("other: 1\n").unwrap_err();
    assert_eq!(err.field, "config");
}

#[test]
fn numeric_bucket_and_index_names_are_read_as_text() {
    let config = parse(
        r#"
config:
  url: http://localhost:9200
  repository: 2024
  bucket:
    s3: 20241014
    snapshot:
      indices: [logs-*, 2024]
"#,
    )
    .expect("numeric names are valid");
    assert_eq!(config.repository_name(), "2024");
    assert_eq!(config.bucket_name(), "20241014");
    assert_eq!(config.index_patterns(), ["logs-*", "2024"]);
}

#[test]
fn scalar_indices_are_reported_against_indices() {
    let err = parse(
        "config:\n  url: http://localhost:9200\n  repository: r\n  bucket:\n    s3: b\n    snapshot:\n      indices: _all\n",
    )
    .unwrap_err();
    assert_eq!(err.field, "config.bucket.snapshot.indices");
    assert!(err.reason.contains("list"), "got: {err}");
}

#[test]
fn type_errors_name_the_offending_field() {
    let cases = [
        ("    s3: [a, b]\n    snapshot:\n      indices: [_all]\n", "config.bucket.s3"),
        ("    s3: b\n    region: {a: 1}\n    snapshot:\n      indices: [_all]\n", "config.bucket.region"),
        ("    s3: b\n    snapshot:\n      indices: [[nested]]\n", "config.bucket.snapshot.indices"),
        ("    s3: b\n    snapshot:\n      indices: [_all]\n      ignore_unavailable: maybe\n", "config.bucket.snapshot.ignore_unavailable"),
        ("    s3: b\n    snapshot: _all\n", "config.bucket.snapshot"),
    ];
    for (bucket, field) in cases {
        let yaml = format!(
            "config:\n  url: http://localhost:9200\n  repository: r\n  bucket:\n{bucket}"
        );
        let err = parse(&yaml).unwrap_err();
        assert_eq!(err.field, field, "yaml:\n{yaml}");
    }
}

#[test]
fn blank_optional_fields_are_dropped() {
    let config = parse(
        "config:\n  url: http://localhost:9200\n  repository: r\n  bucket:\n    s3: b\n    region: \"\"\n    base_path: \" \"\n    snapshot:\n      indices: [_all]\n",
    )
    .unwrap();
    assert_eq!(config.bucket_region(), None);
    assert_eq!(config.base_path(), None);
}
