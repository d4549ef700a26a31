//! Integration tests for configuration loading

use remote_mem::config::{validate_config, Config, ConfigError, ConfigLoader};
use remote_mem::disasm::Syntax;
use std::fs;
use std::time::Duration;

#[test]
fn test_partial_file_keeps_other_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("remote-mem.toml");
    fs::write(
        &path,
        "[invoke]\ntimeout_ms = 250\n\n[disasm]\nsyntax = \"att\"\n",
    )
    .unwrap();

    let config = ConfigLoader::new(&path).load().unwrap();
    assert_eq!(config.invoke_options().timeout, Duration::from_millis(250));
    assert_eq!(config.syntax(), Syntax::Att);
    assert_eq!(config.disasm.default_count, 10);
    assert_eq!(config.inject.timeout_ms, 10_000);
    assert!(config.inject.resolve_path);
    assert_eq!(config.logging.level, "info");
    assert!(validate_config(&config).is_ok());
}

#[test]
fn test_inject_options_from_config() {
    let mut config = Config::default();
    config.inject.timeout_ms = 1234;
    config.inject.resolve_path = false;

    let options = config.inject_options();
    assert_eq!(options.timeout, Duration::from_millis(1234));
    assert!(!options.resolve_path);
    assert!(!options.add_to_search_order);
}

#[test]
fn test_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let loader = ConfigLoader::new(dir.path().join("saved.toml"));

    let mut config = Config::default();
    config.disasm.default_count = 32;
    config.logging.file = "trace.log".to_string();
    loader.save(&config).unwrap();

    let reloaded = loader.load().unwrap();
    assert_eq!(reloaded.disasm.default_count, 32);
    assert_eq!(reloaded.logging.file, "trace.log");
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let loader = ConfigLoader::new(dir.path().join("absent.toml"));
    assert!(matches!(loader.load(), Err(ConfigError::FileNotFound(_))));

    let config = loader.load_or_default();
    assert_eq!(config.invoke.timeout_ms, 5000);
}

#[test]
fn test_malformed_file_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[invoke\ntimeout_ms = ").unwrap();

    let loader = ConfigLoader::new(&path);
    assert!(matches!(loader.load(), Err(ConfigError::TomlParse(_))));
    assert_eq!(loader.load_or_default().disasm.syntax, "masm");
}

#[test]
fn test_validation_rejects_bad_values() {
    let mut config = Config::default();
    config.invoke.timeout_ms = 0;
    assert!(matches!(validate_config(&config), Err(ConfigError::Invalid(_))));

    let mut config = Config::default();
    config.disasm.syntax = "motorola".to_string();
    assert!(validate_config(&config).is_err());
    // Lookups still work with the fallback
    assert_eq!(config.syntax(), Syntax::Masm);

    let mut config = Config::default();
    config.logging.level = "loud".to_string();
    assert!(validate_config(&config).is_err());
}
