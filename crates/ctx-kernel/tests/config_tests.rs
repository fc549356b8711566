//! Engine configuration files

use std::io::Write;

use ctx_kernel::{ConfigError, EngineConfig};
use ctx_props::MergePolicy;
use pretty_assertions::assert_eq;

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
service_group_timeout_ms = 1500
merge_policy = "overwrite"
log_filter = "ctx_kernel=debug"
log_json = true
"#
    )
    .unwrap();

    let config = EngineConfig::from_path(file.path()).unwrap();
    assert_eq!(
        config,
        EngineConfig::default()
            .with_service_group_timeout_ms(1500)
            .with_merge_policy(MergePolicy::Overwrite)
            .with_log_filter("ctx_kernel=debug")
            .with_log_json(true)
    );
}

#[test]
fn test_missing_keys_take_defaults() {
    let config = EngineConfig::from_toml_str("cache_last_operation_context = true").unwrap();
    assert!(config.cache_last_operation_context);
    assert_eq!(config.service_group_timeout_ms, 30_000);
    assert_eq!(config.merge_policy, MergePolicy::KeepExisting);
    assert!(!config.log_json);
}

#[test]
fn test_bad_values_are_rejected() {
    let err = EngineConfig::from_toml_str("service_group_timeout_ms = \"soon\"").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)));

    let dir = tempfile::tempdir().unwrap();
    let err = EngineConfig::from_path(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}
