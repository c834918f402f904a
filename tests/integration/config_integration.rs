//! Integration tests for layered configuration

use genstream::config::{ConfigLoader, GenstreamConfig};
use genstream::provider::ProviderType;
use genstream::server::AppState;
use std::time::Duration;
use tempfile::TempDir;

fn write_workspace_config(root: &std::path::Path, name: &str, contents: &str) {
    let dir = root.join("config");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(name), contents).unwrap();
}

#[test]
fn test_workspace_config_overrides_defaults() {
    let temp_dir = TempDir::new().unwrap();
    write_workspace_config(
        temp_dir.path(),
        "config.toml",
        r#"
[jobs]
ttl_seconds = 120
cancel_wait_seconds = 3

[breaker]
failure_threshold = 2
"#,
    );

    let config = ConfigLoader::load(temp_dir.path()).unwrap();
    assert_eq!(config.jobs.ttl(), Duration::from_secs(120));
    assert_eq!(config.jobs.cancel_wait(), Duration::from_secs(3));
    assert_eq!(config.breaker.failure_threshold, 2);
    assert_eq!(config.breaker.cooldown_seconds, 60);
    assert_eq!(config.retry.max_attempts, 3);
    assert!(config.validate().is_ok());
}

#[test]
fn test_explicit_file_wins_over_workspace() {
    let temp_dir = TempDir::new().unwrap();
    write_workspace_config(
        temp_dir.path(),
        "config.toml",
        "[retry]\nmax_attempts = 4\nbase_delay_seconds = 0.5\n",
    );
    let explicit = temp_dir.path().join("override.toml");
    std::fs::write(&explicit, "[retry]\nmax_attempts = 6\n").unwrap();

    let config = ConfigLoader::load_with_file(temp_dir.path(), Some(&explicit)).unwrap();
    assert_eq!(config.retry.max_attempts, 6);
    assert_eq!(config.retry.base_delay_seconds, 0.5);
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("absent.toml");
    assert!(ConfigLoader::load_with_file(temp_dir.path(), Some(&missing)).is_err());
}

#[test]
fn test_environment_overrides_files() {
    let temp_dir = TempDir::new().unwrap();
    write_workspace_config(temp_dir.path(), "config.toml", "[retry]\nmax_attempts = 4\n");

    let prefix = "GENSTREAM_CONFIG_ENV_TEST";
    std::env::set_var(format!("{}__RETRY__MAX_ATTEMPTS", prefix), "7");
    std::env::set_var(format!("{}__BREAKER__ENABLED", prefix), "false");
    let loaded = ConfigLoader::load_layers(temp_dir.path(), None, prefix);
    std::env::remove_var(format!("{}__RETRY__MAX_ATTEMPTS", prefix));
    std::env::remove_var(format!("{}__BREAKER__ENABLED", prefix));

    let config = loaded.unwrap();
    assert_eq!(config.retry.max_attempts, 7);
    assert!(!config.breaker.enabled);
}

#[test]
fn test_scripted_provider_state_from_config() {
    let temp_dir = TempDir::new().unwrap();
    write_workspace_config(
        temp_dir.path(),
        "config.toml",
        r#"
[provider]
kind = "scripted"

[breaker]
enabled = false
"#,
    );

    let config = ConfigLoader::load(temp_dir.path()).unwrap();
    assert_eq!(config.provider.kind, ProviderType::Scripted);
    let state = AppState::from_config(&config).unwrap();
    assert_eq!(state.orchestrator.provider_name(), "scripted");
    assert_eq!(state.orchestrator.breaker_state(), None);
    assert_eq!(state.cancel_wait, Duration::from_secs(10));
}

#[test]
fn test_openai_provider_requires_api_key() {
    let mut config = GenstreamConfig::default();
    config.provider.api_key_env = "GENSTREAM_TEST_UNSET_API_KEY".to_string();
    assert!(AppState::from_config(&config).is_err());

    config.provider.api_key = Some("sk-test".to_string());
    let state = AppState::from_config(&config).unwrap();
    assert_eq!(state.orchestrator.provider_name(), "openai");
    assert!(state.orchestrator.breaker_state().is_some());
}

#[test]
fn test_invalid_values_fail_validation() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bad.toml");
    std::fs::write(
        &path,
        "[jobs]\nttl_seconds = 0\n\n[provider]\nbase_url = \"ftp://example\"\n",
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&path).unwrap();
    let errors = config.validate().unwrap_err();
    let sections: Vec<_> = errors.iter().map(|e| e.section).collect();
    assert!(sections.contains(&"jobs"));
    assert!(sections.contains(&"provider"));
}
