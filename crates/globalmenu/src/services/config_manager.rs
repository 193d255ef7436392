//! Configuration manager with live reload support.
//!
//! A file watcher thread monitors `config.toml` for modifications. On
//! change, the new config is parsed and validated; valid configs are
//! dispatched to the GTK main thread via glib::idle_add_once and fanned out
//! to the subsystems. A `style.css` next to the config file is watched too.
//!
//! Bar geometry and menu-bar layout reload live (with a rebuild flicker).
//! Discovery settings (`[wm]`, `[menu]` filters) are baked into the backend
//! thread at startup and only log a restart hint when they change.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use gtk4::glib;
use notify_debouncer_mini::{DebounceEventResult, new_debouncer, notify::RecursiveMode};
use tracing::{debug, error, info, warn};

use globalmenu_core::Config;

/// Debounce interval (in ms) for file change events. Editors often trigger
/// multiple events for a single save; this batches them into one reload.
const FILE_CHANGE_DEBOUNCE_MS: u64 = 300;

use crate::bar;

/// Messages sent from the file watcher thread to the GTK main thread.
#[derive(Debug)]
pub enum ConfigMessage {
    /// A new valid config was loaded.
    Reloaded(Box<Config>),
    /// Config file changed but failed to load/validate.
    Error(String),
    /// User style.css file changed and should be reloaded.
    StyleCssChanged,
}

/// Send a config message to the main thread via glib::idle_add_once.
fn send_config_message(msg: ConfigMessage) {
    glib::idle_add_once(move || {
        ConfigManager::global().handle_config_message(msg);
    });
}

/// Holds the current configuration and coordinates live reload.
pub struct ConfigManager {
    config: RefCell<Config>,
    /// Path to the config file being watched (if any).
    config_path: RefCell<Option<PathBuf>>,
    /// Shutdown flag for the file watcher thread.
    shutdown_flag: Arc<AtomicBool>,
}

thread_local! {
    static CONFIG_MANAGER_INSTANCE: RefCell<Option<Rc<ConfigManager>>> = const { RefCell::new(None) };
}

impl ConfigManager {
    fn new(config: Config, config_path: Option<PathBuf>) -> Rc<Self> {
        Rc::new(Self {
            config: RefCell::new(config),
            config_path: RefCell::new(config_path),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get the global ConfigManager singleton.
    ///
    /// Panics if `init_global` hasn't been called.
    pub fn global() -> Rc<Self> {
        CONFIG_MANAGER_INSTANCE.with(|cell| {
            cell.borrow()
                .as_ref()
                .expect("ConfigManager not initialized; call init_global first")
                .clone()
        })
    }

    /// Initialize the global ConfigManager singleton.
    ///
    /// Must be called once during application startup, before `global()`.
    pub fn init_global(config: Config, config_path: Option<PathBuf>) {
        CONFIG_MANAGER_INSTANCE.with(|cell| {
            let mut opt = cell.borrow_mut();
            if opt.is_some() {
                warn!("ConfigManager already initialized, ignoring init_global call");
                return;
            }
            *opt = Some(ConfigManager::new(config, config_path));
        });
    }

    /// A clone of the current configuration.
    pub fn config(&self) -> Config {
        self.config.borrow().clone()
    }

    /// Bar height in pixels.
    pub fn bar_size(&self) -> u32 {
        self.config.borrow().bar.size
    }

    pub fn screen_margin(&self) -> u32 {
        self.config.borrow().bar.screen_margin
    }

    /// Gap between a menu button and its popover.
    pub fn popover_offset(&self) -> u32 {
        self.config.borrow().bar.popover_offset
    }

    /// Collapse the menu bar into a single root button.
    pub fn compact(&self) -> bool {
        self.config.borrow().menu.compact
    }

    /// Start watching the config file for changes.
    ///
    /// Does nothing if no config file path is set (using defaults).
    pub fn start_watching(self: &Rc<Self>) {
        let config_path = self.config_path.borrow().clone();
        let Some(path) = config_path else {
            info!("No config file to watch (using defaults)");
            return;
        };

        if !path.exists() {
            warn!(
                "Config file does not exist, cannot watch: {}",
                path.display()
            );
            return;
        }

        info!("Starting config file watcher for: {}", path.display());

        let watch_path = path.clone();
        let shutdown_flag = self.shutdown_flag.clone();
        thread::spawn(move || {
            Self::run_file_watcher(watch_path, shutdown_flag);
        });
    }

    /// Run the file watcher loop (called on a background thread).
    fn run_file_watcher(path: PathBuf, shutdown_flag: Arc<AtomicBool>) {
        let debounce_duration = Duration::from_millis(FILE_CHANGE_DEBOUNCE_MS);

        // Canonicalize so paths from notify compare equal
        let path_for_handler = match path.canonicalize() {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to canonicalize config path: {}", e);
                return;
            }
        };

        // Also watch for style.css in the same directory
        let style_css_path = path_for_handler.parent().map(|p| p.join("style.css"));

        let mut debouncer =
            match new_debouncer(debounce_duration, move |res: DebounceEventResult| {
                match res {
                    Ok(events) => {
                        let config_changed = events.iter().any(|e| e.path == path_for_handler);
                        if config_changed {
                            debug!("Config file change detected");
                            Self::reload_and_send(&path_for_handler);
                        }

                        if let Some(ref style_path) = style_css_path {
                            let style_changed = events.iter().any(|e| e.path == *style_path);
                            if style_changed {
                                debug!("User style.css change detected");
                                send_config_message(ConfigMessage::StyleCssChanged);
                            }
                        }
                    }
                    Err(err) => {
                        error!("File watcher error: {}", err);
                    }
                }
            }) {
                Ok(d) => d,
                Err(e) => {
                    error!("Failed to create file watcher: {}", e);
                    return;
                }
            };

        // Watching the parent directory is more reliable than the file itself
        let watch_dir = path_for_handler.parent().unwrap_or(&path_for_handler);
        if let Err(e) = debouncer
            .watcher()
            .watch(watch_dir, RecursiveMode::NonRecursive)
        {
            error!("Failed to watch config directory: {}", e);
            return;
        }

        info!("File watcher started, watching: {}", watch_dir.display());

        while !shutdown_flag.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(500));
        }

        debug!("Config file watcher thread shutting down");
    }

    /// Reload config from file and send the result to the GTK thread.
    fn reload_and_send(path: &std::path::Path) {
        match Config::load(path) {
            Ok(new_config) => {
                if let Err(e) = new_config.validate() {
                    let msg = format!("Config validation failed: {}", e);
                    warn!("{}", msg);
                    send_config_message(ConfigMessage::Error(msg));
                    return;
                }

                info!("Config reloaded successfully from: {}", path.display());
                send_config_message(ConfigMessage::Reloaded(Box::new(new_config)));
            }
            Err(e) => {
                let msg = format!("Failed to reload config: {}", e);
                warn!("{}", msg);
                send_config_message(ConfigMessage::Error(msg));
            }
        }
    }

    /// Handle a config message from the file watcher.
    /// Called via glib::idle_add_once from send_config_message.
    pub(crate) fn handle_config_message(&self, msg: ConfigMessage) {
        match msg {
            ConfigMessage::Reloaded(new_config) => {
                self.apply_config(*new_config);
            }
            ConfigMessage::Error(err) => {
                // Keep using the old config
                error!("Config reload error: {}", err);
            }
            ConfigMessage::StyleCssChanged => {
                info!("Reloading user style.css...");
                bar::reload_user_css();
            }
        }
    }

    /// Apply a new configuration, updating all subsystems.
    fn apply_config(&self, new_config: Config) {
        let old_config = self.config.borrow().clone();

        info!("Applying new configuration...");

        if config_discovery_changed(&old_config, &new_config) {
            warn!("[wm]/[menu] discovery settings changed; they take effect on next start");
        }

        // Store the new config BEFORE rebuilding, so widgets created during
        // the rebuild see the new values
        *self.config.borrow_mut() = new_config.clone();

        if config_structure_changed(&old_config, &new_config) {
            info!("Structural configuration changed, rebuilding bar...");
            bar::load_css();
            bar::rebuild();
        }

        info!("Configuration applied successfully");
    }

    /// Stop watching the config file.
    pub fn stop_watching(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
        debug!("Config watcher stopped");
    }
}

/// Settings baked into the discovery backend thread at startup.
fn config_discovery_changed(old: &Config, new: &Config) -> bool {
    old.wm.backend != new.wm.backend
        || old.wm.recheck_delay_ms != new.wm.recheck_delay_ms
        || old.menu.filter_by_active != new.menu.filter_by_active
        || old.menu.filter_children != new.menu.filter_children
        || old.menu.pinned_window != new.menu.pinned_window
        || old.menu.screen_bounds != new.menu.screen_bounds
}

/// Settings that require tearing down and recreating the bar window.
fn config_structure_changed(old: &Config, new: &Config) -> bool {
    if old.bar.size != new.bar.size {
        debug!("bar.size changed ({} -> {})", old.bar.size, new.bar.size);
        return true;
    }

    if old.bar.screen_margin != new.bar.screen_margin {
        debug!(
            "bar.screen_margin changed ({} -> {})",
            old.bar.screen_margin, new.bar.screen_margin
        );
        return true;
    }

    if old.menu.compact != new.menu.compact {
        debug!(
            "menu.compact changed ({} -> {})",
            old.menu.compact, new.menu.compact
        );
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_changed_bar_size() {
        let old = Config::default();
        let mut new = Config::default();

        assert!(!config_structure_changed(&old, &new));

        new.bar.size = 40;
        assert!(config_structure_changed(&old, &new));
    }

    #[test]
    fn test_structure_changed_compact() {
        let old = Config::default();
        let mut new = Config::default();

        new.menu.compact = true;
        assert!(config_structure_changed(&old, &new));
    }

    #[test]
    fn test_discovery_changed_backend() {
        let old = Config::default();
        let mut new = Config::default();

        assert!(!config_discovery_changed(&old, &new));

        new.wm.backend = "x11".to_string();
        assert!(config_discovery_changed(&old, &new));
    }

    #[test]
    fn test_popover_offset_not_structural() {
        let old = Config::default();
        let mut new = Config::default();

        new.bar.popover_offset = 8;
        assert!(!config_structure_changed(&old, &new));
        assert!(!config_discovery_changed(&old, &new));
    }
}
