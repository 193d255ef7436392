//! Configuration types and parsing.
//!
//! The Config type is a stable, serialization-friendly schema. User config
//! files are deep-merged over the embedded defaults, so a partial file only
//! overrides the values it names.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use toml::Table;

use crate::error::{Error, Result};

/// Known valid values for wm.backend.
const VALID_BACKENDS: &[&str] = &["auto", "x11", "wayland"];

/// Embedded default configuration TOML, compiled into the binary.
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../../config.toml");

/// Result of loading a configuration file.
#[derive(Debug)]
pub struct ConfigLoadResult {
    /// The loaded configuration.
    pub config: Config,
    /// Path where config was found, if any.
    pub source: Option<PathBuf>,
    /// Whether defaults were used (no config file found).
    pub used_defaults: bool,
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Bar window configuration.
    pub bar: BarConfig,

    /// Menu discovery and filtering configuration.
    pub menu: MenuConfig,

    /// Window-manager backend configuration.
    pub wm: WmConfig,
}

impl Config {
    /// Load configuration from the embedded default TOML string.
    pub fn from_default_toml() -> Result<Self> {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TOML)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, merging with embedded defaults.
    ///
    /// Returns an error if the file doesn't exist or can't be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        Self::load_with_defaults(&content)
    }

    /// Load configuration from a TOML string, merging with embedded defaults.
    ///
    /// Both the default config and the user config are parsed as TOML tables,
    /// deep-merged (user values win), then deserialized into the schema.
    fn load_with_defaults(user_toml: &str) -> Result<Self> {
        // This should never fail since it's embedded and tested
        let mut base: Table = toml::from_str(DEFAULT_CONFIG_TOML)
            .expect("embedded DEFAULT_CONFIG_TOML should always be valid");

        let user: Table = toml::from_str(user_toml)?;

        deep_merge_toml(&mut base, user);

        let config: Config = base.try_into()?;
        Ok(config)
    }

    /// Find and load configuration using the XDG lookup chain.
    ///
    /// If `explicit_path` is `Some`, that path is used directly and an error
    /// is returned if it doesn't exist or can't be parsed (no fallback).
    ///
    /// If `explicit_path` is `None`, searches in order:
    /// 1. `$XDG_CONFIG_HOME/globalmenu/config.toml`
    /// 2. `~/.config/globalmenu/config.toml`
    /// 3. `./config.toml` (current working directory)
    ///
    /// If no config file is found anywhere, the embedded defaults are used.
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<ConfigLoadResult> {
        if let Some(path) = explicit_path {
            let config = Self::load(path)?;
            return Ok(ConfigLoadResult {
                config,
                source: Some(path.to_path_buf()),
                used_defaults: false,
            });
        }

        // Rule: if a config file exists but fails to load, that's an error
        // (no silent fallback). Defaults apply only when nothing exists.
        let search_paths = Self::config_search_paths();
        let mut first_error: Option<(PathBuf, Error)> = None;

        for path in &search_paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        return Ok(ConfigLoadResult {
                            config,
                            source: Some(path.clone()),
                            used_defaults: false,
                        });
                    }
                    Err(e) => {
                        if first_error.is_none() {
                            first_error = Some((path.clone(), e));
                        }
                    }
                }
            }
        }

        if let Some((path, error)) = first_error {
            tracing::error!("Config file {:?} exists but failed to load: {}", path, error);
            return Err(error);
        }

        tracing::info!("No config file found, using built-in default config");

        let config: Config = toml::from_str(DEFAULT_CONFIG_TOML)?;

        Ok(ConfigLoadResult {
            config,
            source: None,
            used_defaults: true,
        })
    }

    /// Get the list of paths to search for config files.
    pub fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(xdg_config) = env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg_config).join("globalmenu/config.toml"));
        }

        if let Ok(home) = env::var("HOME") {
            paths.push(PathBuf::from(home).join(".config/globalmenu/config.toml"));
        }

        paths.push(PathBuf::from("config.toml"));

        paths
    }

    /// Validate the configuration, returning errors for invalid values.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if !VALID_BACKENDS.contains(&self.wm.backend.as_str()) {
            errors.push(format!(
                "wm.backend: invalid value '{}', expected one of: {}",
                self.wm.backend,
                VALID_BACKENDS.join(", ")
            ));
        }

        if self.bar.size == 0 {
            errors.push("bar.size: must be greater than 0".to_string());
        }

        if self.wm.recheck_delay_ms == 0 {
            errors.push("wm.recheck_delay_ms: must be greater than 0".to_string());
        }

        match self.menu.screen_bounds.len() {
            0 | 4 => {}
            n => errors.push(format!(
                "menu.screen_bounds: expected [] or [x, y, width, height], got {} element(s)",
                n
            )),
        }

        if self.menu.screen_bounds.len() == 4
            && (self.menu.screen_bounds[2] <= 0 || self.menu.screen_bounds[3] <= 0)
        {
            errors.push("menu.screen_bounds: width and height must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::ConfigValidation(errors))
        }
    }

    /// Print a human-readable summary of the configuration.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        lines.push("Bar Configuration:".to_string());
        lines.push(format!("  size: {}px", self.bar.size));
        lines.push(format!("  screen_margin: {}px", self.bar.screen_margin));
        lines.push(format!("  popover_offset: {}px", self.bar.popover_offset));

        lines.push("\nMenu:".to_string());
        lines.push(format!("  filter_by_active: {}", self.menu.filter_by_active));
        lines.push(format!("  filter_children: {}", self.menu.filter_children));
        if self.menu.pinned_window != 0 {
            lines.push(format!("  pinned_window: {}", self.menu.pinned_window));
        }
        if let Some(bounds) = self.menu.bounds() {
            lines.push(format!(
                "  screen_bounds: {}x{} at ({}, {})",
                bounds.width, bounds.height, bounds.x, bounds.y
            ));
        }
        lines.push(format!("  compact: {}", self.menu.compact));

        lines.push("\nWindow Manager:".to_string());
        lines.push(format!("  backend: {}", self.wm.backend));
        lines.push(format!("  recheck_delay: {}ms", self.wm.recheck_delay_ms));

        lines.join("\n")
    }
}

/// Recursively merge `overlay` into `base`; overlay scalars and arrays win,
/// tables merge key by key.
fn deep_merge_toml(base: &mut Table, overlay: Table) {
    for (key, overlay_value) in overlay {
        match (base.get_mut(&key), overlay_value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(overlay_table)) => {
                deep_merge_toml(base_table, overlay_table);
            }
            (_, overlay_value) => {
                base.insert(key, overlay_value);
            }
        }
    }
}

/// Bar window configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BarConfig {
    /// Height of the bar window in pixels.
    pub size: u32,

    /// Distance from the top screen edge in pixels.
    pub screen_margin: u32,

    /// Gap between a menu button and its popover in pixels.
    pub popover_offset: u32,
}

impl Default for BarConfig {
    fn default() -> Self {
        Self {
            size: 28,
            screen_margin: 0,
            popover_offset: 2,
        }
    }
}

/// A screen rectangle used for visibility filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenBounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl ScreenBounds {
    /// Whether a point lies inside this rectangle.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Menu discovery and filtering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MenuConfig {
    /// Only show the menu of the window the desktop reports as active.
    pub filter_by_active: bool,

    /// Treat transient child windows as menu owners in their own right.
    /// When false, the transient-parent chain is searched first.
    pub filter_children: bool,

    /// Pin the menu to one specific window id; 0 follows the active window.
    pub pinned_window: u32,

    /// Restrict visibility to windows whose center falls inside this
    /// rectangle, given as `[x, y, width, height]`. Empty = no restriction.
    pub screen_bounds: Vec<i32>,

    /// Collapse the menu bar to a single root button.
    pub compact: bool,
}

impl MenuConfig {
    /// The configured screen bounds, if any.
    pub fn bounds(&self) -> Option<ScreenBounds> {
        if self.screen_bounds.len() == 4 {
            Some(ScreenBounds {
                x: self.screen_bounds[0],
                y: self.screen_bounds[1],
                width: self.screen_bounds[2],
                height: self.screen_bounds[3],
            })
        } else {
            None
        }
    }

    /// The pinned window id, if one is set.
    pub fn pinned(&self) -> Option<u32> {
        (self.pinned_window != 0).then_some(self.pinned_window)
    }
}

impl Default for MenuConfig {
    fn default() -> Self {
        Self {
            filter_by_active: true,
            filter_children: false,
            pinned_window: 0,
            screen_bounds: Vec::new(),
            compact: false,
        }
    }
}

/// Window-manager backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WmConfig {
    /// Window discovery backend: "auto", "x11", or "wayland".
    pub backend: String,

    /// Delay before re-checking a window that had no menu (wayland backend).
    pub recheck_delay_ms: u64,
}

impl Default for WmConfig {
    fn default() -> Self {
        Self {
            backend: "auto".to_string(),
            recheck_delay_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = Config::from_default_toml().expect("embedded defaults should parse");
        config.validate().expect("embedded defaults should validate");
    }

    #[test]
    fn test_defaults_match_embedded_toml() {
        let embedded = Config::from_default_toml().unwrap();
        let typed = Config::default();

        assert_eq!(embedded.bar.size, typed.bar.size);
        assert_eq!(embedded.menu.filter_by_active, typed.menu.filter_by_active);
        assert_eq!(embedded.menu.filter_children, typed.menu.filter_children);
        assert_eq!(embedded.wm.backend, typed.wm.backend);
        assert_eq!(embedded.wm.recheck_delay_ms, typed.wm.recheck_delay_ms);
    }

    #[test]
    fn test_deep_merge_partial_user_config() {
        let config = Config::load_with_defaults(
            r#"
            [menu]
            filter_children = true
            "#,
        )
        .unwrap();

        // Overridden value
        assert!(config.menu.filter_children);
        // Untouched values fall back to defaults
        assert!(config.menu.filter_by_active);
        assert_eq!(config.bar.size, 28);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = Config::load_with_defaults(
            r#"
            [menu]
            filter_by_actve = true
            "#,
        );
        assert!(result.is_err(), "typo'd keys should be rejected");
    }

    #[test]
    fn test_validate_rejects_bad_backend() {
        let mut config = Config::default();
        config.wm.backend = "mutter".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("wm.backend"));
    }

    #[test]
    fn test_validate_rejects_partial_bounds() {
        let mut config = Config::default();
        config.menu.screen_bounds = vec![0, 0, 1920];
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("screen_bounds"));
    }

    #[test]
    fn test_validate_collects_multiple_errors() {
        let mut config = Config::default();
        config.bar.size = 0;
        config.wm.backend = "bad".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("bar.size"));
        assert!(err.contains("wm.backend"));
    }

    #[test]
    fn test_screen_bounds_accessor() {
        let mut config = Config::default();
        assert!(config.menu.bounds().is_none());

        config.menu.screen_bounds = vec![10, 20, 1920, 1080];
        let bounds = config.menu.bounds().unwrap();
        assert!(bounds.contains(10, 20));
        assert!(bounds.contains(960, 540));
        assert!(!bounds.contains(1930, 540));
        assert!(!bounds.contains(9, 20));
    }

    #[test]
    fn test_pinned_accessor() {
        let mut config = Config::default();
        assert!(config.menu.pinned().is_none());
        config.menu.pinned_window = 0x1c00007;
        assert_eq!(config.menu.pinned(), Some(0x1c00007));
    }
}
