//! Integration tests for citadel-config

use citadel_config::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn temp_file(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_toml_file_layer() {
    let file = temp_file(
        ".toml",
        r#"
        [tenancy]
        base_domain = "legal.example"

        [tenancy.shared_database]
        host = "shared-db.internal"
        port = 6432

        [[cdn.policies]]
        pattern = "/static/*"
        ttl_secs = 86400
        query = "exclude-all"

        [cache.entity_tags]
        Matter = ["matters:{tenant}", "matter:{tenant}:{id}"]
        "#,
    );

    let settings = SettingsLoader::new()
        .file(file.path())
        .without_env()
        .load()
        .unwrap();

    assert_eq!(settings.tenancy.base_domain, "legal.example");
    assert_eq!(settings.tenancy.shared_database.host, "shared-db.internal");
    assert_eq!(settings.tenancy.shared_database.port, 6432);
    // untouched fields keep their defaults
    assert_eq!(settings.tenancy.shared_database.user, "citadel");
    assert_eq!(settings.cdn.policies.len(), 1);
    assert_eq!(settings.cdn.policies[0].query, "exclude-all");
    assert_eq!(settings.cache.entity_tags["Matter"].len(), 2);
}

#[test]
fn test_later_sources_win() {
    let json = temp_file(".json", r#"{"pool": {"acquire_timeout_ms": 900, "drain_grace_secs": 5}}"#);
    let toml = temp_file(".toml", "[pool]\nacquire_timeout_ms = 700\n");

    let settings = SettingsLoader::new()
        .file(json.path())
        .file(toml.path())
        .env_vars(vec![(
            "CITADEL_POOL__DRAIN_GRACE_SECS".to_string(),
            "1".to_string(),
        )])
        .load()
        .unwrap();

    assert_eq!(settings.pool.acquire_timeout_ms, 700);
    assert_eq!(settings.pool.drain_grace_secs, 1);
}

#[test]
fn test_unsupported_extension() {
    let file = temp_file(".yaml", "pool: {}");
    let result = SettingsLoader::new().file(file.path()).without_env().load();

    assert!(matches!(result, Err(ConfigError::UnsupportedFormat { .. })));
}

#[test]
fn test_missing_file() {
    let result = SettingsLoader::new()
        .file("/nonexistent/citadel.toml")
        .without_env()
        .load();

    assert!(matches!(result, Err(ConfigError::Read { .. })));
}

#[test]
fn test_dotenv_path_feeds_env_layer() {
    let dotenv = temp_file(".env", "CITADEL_TEST_DOTENV_POOL__TEARDOWN_GRACE_SECS=42\n");

    let settings = SettingsLoader::new()
        .dotenv_path(dotenv.path())
        .env_prefix("CITADEL_TEST_DOTENV")
        .load()
        .unwrap();

    assert_eq!(settings.pool.teardown_grace_secs, 42);
}

#[test]
fn test_config_error_display() {
    let err = ConfigError::invalid("pool.acquire_timeout_ms", "must be greater than zero");
    assert!(err.to_string().contains("pool.acquire_timeout_ms"));

    let err = FileLoader::new(FileFormat::Toml).parse("= nope").unwrap_err();
    assert!(matches!(err, ConfigError::Parse { format: "TOML", .. }));
}
