//! Integration tests for the config crate

use billing_mirror_config::{validate_config, AppConfig, ConfigError, ConfigLoader};
use std::io::Write;
use std::path::PathBuf;

fn shipped(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config").join(name)
}

#[test]
fn test_load_default_config() {
    let config = ConfigLoader::from_file(&shipped("default.toml"))
        .expect("Failed to load default config");

    assert!(config.scheduler.enabled);
    assert_eq!(config.logging.format, "json");
    assert_eq!(config.reconciliation, AppConfig::default().reconciliation);
    validate_config(&config).unwrap();
}

#[test]
fn test_load_local_config() {
    let config =
        ConfigLoader::from_file(&shipped("local.yaml")).expect("Failed to load local config");

    assert_eq!(config.tenants, vec!["tenant-a", "tenant-b"]);
    assert!(config.reconciliation.allow_local_fallback);
    assert_eq!(config.reconciliation.inter_tenant_delay_ms, 0);
    assert_eq!(config.provider.credentials.len(), 2);
    validate_config(&config).unwrap();
}

#[test]
fn test_builder_layers_file_sources() {
    let config = ConfigLoader::builder()
        .add_file(&shipped("default.toml"), true)
        .add_file(&shipped("local.yaml"), true)
        .build()
        .unwrap();

    // local.yaml wins where it sets a value, default.toml fills the rest
    assert_eq!(config.reconciliation.chunk_size, 20);
    assert_eq!(config.reconciliation.job_name, "renewal-reconciliation");
    assert!(!config.scheduler.enabled);
    assert_eq!(config.scheduler.cron, "0 0 2 * * *");
}

#[test]
fn test_missing_optional_file_uses_defaults() {
    let config = ConfigLoader::builder()
        .add_file(&shipped("does-not-exist.toml"), false)
        .build()
        .unwrap();
    assert_eq!(config, AppConfig::default());
}

#[test]
fn test_missing_required_file_is_an_error() {
    let result = ConfigLoader::builder()
        .add_file(&shipped("does-not-exist.toml"), true)
        .build();
    assert!(matches!(result, Err(ConfigError::ConfigLibError(_))));
}

#[test]
fn test_invalid_file_fails_validation() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    writeln!(
        file,
        "[reconciliation]\nchunk_size = 5000\nmax_records = 0\n\n[server]\nbind = \"nowhere\""
    )
    .unwrap();

    let config = ConfigLoader::from_file(file.path()).unwrap();
    let err = validate_config(&config).unwrap_err();

    match err {
        ConfigError::ValidationError(message) => {
            assert!(message.contains("reconciliation.chunk_size"));
            assert!(message.contains("reconciliation.max_records"));
            assert!(message.contains("server.bind"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    assert!(matches!(
        ConfigLoader::from_toml("[reconciliation\nchunk_size = 1"),
        Err(ConfigError::TomlError(_))
    ));
}
