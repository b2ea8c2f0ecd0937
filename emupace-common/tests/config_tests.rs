//! Settings discovery and loading tests
//!
//! Tests that manipulate EMUPACE_CONFIG are marked #[serial] so they run
//! sequentially, not in parallel.

use emupace_common::config::{resolve_config_path, ConfigSource, Settings, CONFIG_ENV_VAR};
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

fn write_config(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp config");
    file.write_all(text.as_bytes()).expect("write temp config");
    file
}

#[test]
#[serial]
fn test_explicit_path_beats_env_var() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/emupace-from-env.toml");

    let source = resolve_config_path(Some(Path::new("/tmp/emupace-from-cli.toml")));
    assert_eq!(
        source,
        ConfigSource::Explicit(PathBuf::from("/tmp/emupace-from-cli.toml"))
    );

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_used_without_cli() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/emupace-from-env.toml");

    let source = resolve_config_path(None);
    assert_eq!(
        source,
        ConfigSource::Explicit(PathBuf::from("/tmp/emupace-from-env.toml"))
    );

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_empty_env_var_ignored() {
    env::set_var(CONFIG_ENV_VAR, "");

    let source = resolve_config_path(None);
    assert!(!matches!(source, ConfigSource::Explicit(_)));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_load_from_env_var_file() {
    let file = write_config(
        r#"
[clock]
tick_rate_num = 60
tick_rate_den = 1
lag_cap = 5

[sound]
enabled = false
start_threshold_blocks = 8

[run]
run_in_background = true
"#,
    );
    env::set_var(CONFIG_ENV_VAR, file.path());

    let settings = Settings::load(None).unwrap();
    assert_eq!(settings.clock.tick_rate_num, 60);
    assert_eq!(settings.clock.lag_cap, 5);
    assert!(!settings.sound.enabled);
    assert_eq!(settings.sound.start_threshold_blocks, 8);
    assert!(settings.run.run_in_background);
    assert_eq!(settings.logging.level, "info");

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_missing_explicit_file_is_error() {
    env::remove_var(CONFIG_ENV_VAR);

    let result = Settings::load(Some(Path::new("/nonexistent/emupace/config.toml")));
    assert!(result.is_err());
}

#[test]
fn test_invalid_toml_is_error() {
    let file = write_config("[clock\nlag_cap = ");
    assert!(Settings::from_file(file.path()).is_err());
}

#[test]
fn test_invalid_tick_rate_is_error() {
    let file = write_config("[clock]\ntick_rate_num = 0\n");
    let err = Settings::from_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("tick rate"));
}
