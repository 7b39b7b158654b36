//! Integration tests for configuration resolution
//!
//! Tests touching process environment run serially.

use mpdfit_common::config::{
    load_config, resolve_password, resolve_server, TomlConfig, CONFIG_ENV_VAR, DEFAULT_PORT,
};
use mpdfit_common::Error;
use serial_test::serial;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

fn clear_env() {
    std::env::remove_var("MPD_HOST");
    std::env::remove_var("MPD_PORT");
    std::env::remove_var("MPD_PASSWORD");
    std::env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_host_beats_config_file() {
    clear_env();
    std::env::set_var("MPD_HOST", "env-host");
    std::env::set_var("MPD_PORT", "6610");

    let config = TomlConfig {
        server: Some("config-host".into()),
        ..Default::default()
    };
    let addr = resolve_server(None, &config).unwrap();
    assert_eq!(addr.host, "env-host");
    assert_eq!(addr.port, 6610);

    clear_env();
}

#[test]
#[serial]
fn test_env_host_with_password() {
    clear_env();
    std::env::set_var("MPD_HOST", "secret@env-host");

    let addr = resolve_server(None, &TomlConfig::default()).unwrap();
    assert_eq!(addr.host, "env-host");
    assert_eq!(addr.password.as_deref(), Some("secret"));

    clear_env();
}

#[test]
#[serial]
fn test_config_file_used_without_env() {
    clear_env();
    let config = TomlConfig {
        server: Some("config-host:6650".into()),
        ..Default::default()
    };
    let addr = resolve_server(None, &config).unwrap();
    assert_eq!(addr.host, "config-host");
    assert_eq!(addr.port, 6650);
}

#[test]
#[serial]
fn test_default_server() {
    clear_env();
    let addr = resolve_server(None, &TomlConfig::default()).unwrap();
    assert_eq!(addr.host, "localhost");
    assert_eq!(addr.port, DEFAULT_PORT);
}

#[test]
#[serial]
fn test_invalid_env_port_is_config_error() {
    clear_env();
    std::env::set_var("MPD_HOST", "env-host");
    std::env::set_var("MPD_PORT", "sixty-six");

    let err = resolve_server(None, &TomlConfig::default()).unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    clear_env();
}

#[test]
#[serial]
fn test_password_from_env_before_config() {
    clear_env();
    std::env::set_var("MPD_PASSWORD", "env-pass");

    let addr = resolve_server(Some("host"), &TomlConfig::default()).unwrap();
    let config = TomlConfig {
        password: Some("config-pass".into()),
        ..Default::default()
    };
    assert_eq!(resolve_password(&addr, None, &config).as_deref(), Some("env-pass"));

    clear_env();
    assert_eq!(
        resolve_password(&addr, None, &config).as_deref(),
        Some("config-pass")
    );
}

#[test]
#[serial]
fn test_load_explicit_config_file() {
    clear_env();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "server = \"mpd.lan/0.1\"").unwrap();
    writeln!(file, "followers = [\"kitchen\"]").unwrap();

    let config = load_config(Some(file.path())).unwrap();
    assert_eq!(config.server.as_deref(), Some("mpd.lan/0.1"));
    assert_eq!(config.followers, vec!["kitchen".to_string()]);
}

#[test]
#[serial]
fn test_load_missing_explicit_config_fails() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");

    let err = load_config(Some(&missing)).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
#[serial]
fn test_config_env_var_points_at_file() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mpdfit.toml");
    std::fs::write(&path, "tolerance_secs = 12\n").unwrap();
    std::env::set_var(CONFIG_ENV_VAR, &path);

    let config = load_config(None).unwrap();
    assert_eq!(config.tolerance_secs(), 12);

    clear_env();
}
