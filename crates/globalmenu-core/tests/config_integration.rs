//! Integration tests for config parsing against the real config.toml.

use std::path::PathBuf;
use globalmenu_core::Config;

fn project_root() -> PathBuf {
    // Navigate from crates/globalmenu-core/ up to project root
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .to_path_buf()
}

#[test]
fn test_load_real_config() {
    let config_path = project_root().join("config.toml");

    let config = Config::load(&config_path).expect("Failed to load config.toml");

    assert!(config.bar.size > 0, "Bar size should be positive");
    assert!(
        ["auto", "x11", "wayland"].contains(&config.wm.backend.as_str()),
        "WM backend should be valid"
    );
}

#[test]
fn test_real_config_validates() {
    let config_path = project_root().join("config.toml");
    let config = Config::load(&config_path).unwrap();

    config.validate().expect("Real config.toml should be valid");
}

#[test]
fn test_config_summary() {
    let config_path = project_root().join("config.toml");
    let config = Config::load(&config_path).unwrap();

    let summary = config.summary();

    assert!(summary.contains("Bar Configuration:"));
    assert!(summary.contains("Menu:"));
    assert!(summary.contains("Window Manager:"));
    assert!(summary.contains("size:"), "Summary should show bar size");
}

#[test]
fn test_find_and_load_with_explicit_path() {
    let config_path = project_root().join("config.toml");

    let result = Config::find_and_load(Some(&config_path)).unwrap();

    assert!(!result.used_defaults);
    assert_eq!(result.source.as_deref(), Some(config_path.as_path()));

    result
        .config
        .validate()
        .expect("Loaded config should be valid");
}

#[test]
fn test_find_and_load_explicit_missing_fails() {
    let missing_path = PathBuf::from("/nonexistent/config.toml");

    // Explicit path that doesn't exist should fail (no fallback)
    let result = Config::find_and_load(Some(&missing_path));
    assert!(result.is_err());
}

#[test]
fn test_broken_config_returns_error_not_defaults() {
    use std::io::Write;

    let temp_dir = std::env::temp_dir().join("globalmenu_test_broken_config");
    let _ = std::fs::remove_dir_all(&temp_dir);
    std::fs::create_dir_all(&temp_dir).unwrap();

    let broken_config_path = temp_dir.join("config.toml");
    let mut file = std::fs::File::create(&broken_config_path).unwrap();
    writeln!(file, "this is not valid toml {{{{").unwrap();
    drop(file);

    let result = Config::load(&broken_config_path);
    assert!(result.is_err(), "Broken config should fail to load");

    std::fs::remove_dir_all(&temp_dir).unwrap();
}

#[test]
fn test_default_config_toml_parses_without_error() {
    let config =
        Config::from_default_toml().expect("DEFAULT_CONFIG_TOML should parse without error");

    config
        .validate()
        .expect("DEFAULT_CONFIG_TOML should pass validation");
}

#[test]
fn test_validation_rejects_invalid_backend() {
    let toml = r#"
        [wm]
        backend = "gnome_shell"
    "#;

    let config: Config = toml::from_str(toml).unwrap();
    let result = config.validate();

    assert!(result.is_err(), "Invalid wm.backend should fail validation");
    let err = result.unwrap_err().to_string();
    assert!(err.contains("wm.backend"), "Error should mention wm.backend");
}

#[test]
fn test_validation_accepts_valid_values() {
    let toml = r#"
        [bar]
        size = 32

        [menu]
        filter_by_active = false
        screen_bounds = [0, 0, 2560, 1440]

        [wm]
        backend = "x11"
    "#;

    let config: Config = toml::from_str(toml).unwrap();
    config
        .validate()
        .expect("Valid config should pass validation");
}
