//! Integration tests for configuration loader
//!
//! Tests the end-to-end behavior of loading configuration from files.

use std::io::Write;

use streamwarden_domain::{LogFormat, WardenError};
use streamwarden_infra::config;
use tempfile::{Builder, NamedTempFile};

fn config_file(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().expect("Failed to create temp file");
    file.write_all(contents.as_bytes()).expect("Failed to write to temp file");
    file
}

#[test]
fn test_load_config_from_json_file() -> anyhow::Result<()> {
    let file = config_file(
        ".json",
        r#"{
            "retry": {"max_retries": 7, "initial_delay_ms": 250},
            "stream": {"collections": ["messages", "chats"], "max_retries": 4},
            "health": {"interval_ms": 15000},
            "logging": {"format": "json"}
        }"#,
    );

    let config = config::load_from_file(Some(file.path().to_path_buf()))?;

    assert_eq!(config.retry.max_retries, 7);
    assert_eq!(config.retry.initial_delay_ms, 250);
    assert_eq!(config.stream.collections, vec!["messages", "chats"]);
    assert_eq!(config.stream.max_retries, 4);
    assert_eq!(config.health.interval_ms, 15_000);
    assert_eq!(config.logging.format, LogFormat::Json);
    // Untouched sections keep their defaults
    assert_eq!(config.recovery.max_attempts, 5);
    Ok(())
}

#[test]
fn test_load_config_from_toml_file() -> anyhow::Result<()> {
    let file = config_file(
        ".toml",
        r#"
[circuit]
failure_threshold = 3
reset_timeout_ms = 10000

[recovery]
max_attempts = 2
write_queue_capacity = 64

[fanout]
publish_deletes = false
"#,
    );

    let config = config::load_from_file(Some(file.path().to_path_buf()))?;

    assert_eq!(config.circuit.failure_threshold, 3);
    assert_eq!(config.circuit.reset_timeout_ms, 10_000);
    assert_eq!(config.recovery.max_attempts, 2);
    assert_eq!(config.recovery.write_queue_capacity, 64);
    assert!(!config.fanout.publish_deletes);
    Ok(())
}

#[test]
fn test_invalid_values_fail_validation() {
    let file =
        config_file(".toml", "[health]\nlatency_threshold_ms = 900\ncritical_latency_ms = 100\n");

    let err = config::load_from_file(Some(file.path().to_path_buf())).expect_err("invalid");
    assert!(matches!(err, WardenError::Config(_)));
}

#[test]
fn test_malformed_and_unsupported_files() {
    let malformed = config_file(".json", "{ not json");
    let err = config::load_from_file(Some(malformed.path().to_path_buf())).expect_err("malformed");
    assert!(err.to_string().contains("Invalid JSON format"));

    let yaml = config_file(".yaml", "retry: {}");
    let err = config::load_from_file(Some(yaml.path().to_path_buf())).expect_err("unsupported");
    assert!(err.to_string().contains("Unsupported config format"));
}

#[test]
fn test_missing_file_is_reported() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.toml");

    let err = config::load_from_file(Some(path)).expect_err("missing");
    assert!(err.to_string().contains("Config file not found"));
}
