//! Bar window implementation using GTK4 and layer-shell.

use gtk4::prelude::*;
use gtk4::{Application, ApplicationWindow};
use gtk4_layer_shell::{Edge, KeyboardMode, Layer, LayerShell};
use std::cell::RefCell;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use globalmenu_core::Config;

use crate::services::config_manager::ConfigManager;
use crate::styles::class;
use crate::widgets::{BarState, MenuBarWidget};

/// Built-in stylesheet. User `style.css` layers on top with a higher
/// priority, so every rule here can be overridden.
const BASE_CSS: &str = include_str!("base.css");

struct BarHandle {
    window: ApplicationWindow,
    _state: BarState,
}

thread_local! {
    static BAR: RefCell<Option<BarHandle>> = const { RefCell::new(None) };
    static APP: RefCell<Option<Application>> = const { RefCell::new(None) };
}

/// Create the bar window and remember the application for later rebuilds.
pub fn show_bar(app: &Application) {
    APP.with(|cell| {
        *cell.borrow_mut() = Some(app.clone());
    });

    let config = ConfigManager::global().config();
    let mut state = BarState::new();
    let window = create_bar_window(app, &config, &mut state);
    window.present();

    BAR.with(|cell| {
        *cell.borrow_mut() = Some(BarHandle {
            window,
            _state: state,
        });
    });
}

/// Tear down and recreate the bar window with the current configuration.
///
/// Called by the config manager when a structural setting changes.
pub fn rebuild() {
    let Some(app) = APP.with(|cell| cell.borrow().clone()) else {
        warn!("Bar rebuild requested before the application was initialized");
        return;
    };

    BAR.with(|cell| {
        if let Some(handle) = cell.borrow_mut().take() {
            // Dropping BarState unhooks the widgets' service callbacks
            handle.window.destroy();
        }
    });

    show_bar(&app);
    info!("Bar window rebuilt");
}

/// Create and configure the bar window with layer-shell.
fn create_bar_window(app: &Application, config: &Config, state: &mut BarState) -> ApplicationWindow {
    let bar_height = config.bar.size as i32;

    let window = ApplicationWindow::builder()
        .application(app)
        .title("globalmenu")
        .decorated(false)
        .resizable(false)
        .default_height(bar_height)
        .build();

    window.add_css_class(class::BAR_WINDOW);

    window.init_layer_shell();
    window.set_layer(Layer::Top);

    // Anchor to top edge, stretch horizontally
    window.set_anchor(Edge::Top, true);
    window.set_anchor(Edge::Left, true);
    window.set_anchor(Edge::Right, true);
    window.set_anchor(Edge::Bottom, false);

    // Reserve space (exclusive zone) so other windows don't overlap
    window.auto_exclusive_zone_enable();

    // Menu popups take keys for Left/Right navigation while open
    window.set_keyboard_mode(KeyboardMode::OnDemand);

    let margin = config.bar.screen_margin as i32;
    window.set_margin(Edge::Top, margin);
    window.set_margin(Edge::Left, margin);
    window.set_margin(Edge::Right, margin);

    let bar_box = gtk4::Box::new(gtk4::Orientation::Horizontal, 0);
    bar_box.add_css_class(class::BAR);
    bar_box.set_hexpand(true);
    bar_box.set_vexpand(true);

    let menubar = MenuBarWidget::new();
    bar_box.append(menubar.widget());
    state.add_handle(Box::new(menubar));

    window.set_child(Some(&bar_box));

    info!(
        "Bar window created: size={}px, margin={}px, compact={}",
        config.bar.size, config.bar.screen_margin, config.menu.compact
    );

    window
}

/// Load and apply CSS styling to the application.
pub fn load_css() {
    let provider = gtk4::CssProvider::new();
    provider.load_from_string(BASE_CSS);

    // Apply to default display with USER priority to override GTK themes
    if let Some(display) = gtk4::gdk::Display::default() {
        gtk4::style_context_add_provider_for_display(
            &display,
            &provider,
            gtk4::STYLE_PROVIDER_PRIORITY_USER,
        );
        debug!("Base CSS loaded and applied");

        // Load user's custom style.css if it exists
        load_user_css(&display);
    } else {
        warn!("No default display available, CSS styling not applied");
    }
}

/// Priority for user CSS - above all internal styles so overrides work.
const USER_CSS_PRIORITY: u32 = gtk4::STYLE_PROVIDER_PRIORITY_USER + 100;

// Thread-local storage for the user CSS provider so we can replace it on reload
thread_local! {
    static USER_CSS_PROVIDER: RefCell<Option<gtk4::CssProvider>> = const { RefCell::new(None) };
}

/// Search paths for user style.css, following XDG conventions.
fn user_css_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. $XDG_CONFIG_HOME/globalmenu/style.css
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg_config).join("globalmenu/style.css"));
    }

    // 2. ~/.config/globalmenu/style.css
    if let Ok(home) = std::env::var("HOME") {
        paths.push(PathBuf::from(home).join(".config/globalmenu/style.css"));
    }

    // 3. ./style.css (current working directory)
    paths.push(PathBuf::from("style.css"));

    paths
}

/// Find user's style.css file if it exists.
fn find_user_css() -> Option<PathBuf> {
    user_css_search_paths()
        .into_iter()
        .find(|path| path.exists())
}

/// Load user's custom CSS from style.css with highest priority.
fn load_user_css(display: &gtk4::gdk::Display) {
    let Some(path) = find_user_css() else {
        debug!("No user style.css found");
        return;
    };

    match std::fs::read_to_string(&path) {
        Ok(css) => {
            let provider = gtk4::CssProvider::new();
            provider.load_from_string(&css);

            gtk4::style_context_add_provider_for_display(display, &provider, USER_CSS_PRIORITY);

            // Store the provider so we can remove it later on reload
            USER_CSS_PROVIDER.with(|cell| {
                *cell.borrow_mut() = Some(provider);
            });

            info!(
                "Loaded user CSS from: {} (priority={})",
                path.display(),
                USER_CSS_PRIORITY
            );
        }
        Err(e) => {
            warn!("Failed to read user CSS from {}: {}", path.display(), e);
        }
    }
}

/// Reload user's custom CSS (called when style.css file changes).
pub fn reload_user_css() {
    let Some(display) = gtk4::gdk::Display::default() else {
        warn!("No default display available for CSS reload");
        return;
    };

    // Remove the old provider if it exists
    USER_CSS_PROVIDER.with(|cell| {
        if let Some(old_provider) = cell.borrow_mut().take() {
            gtk4::style_context_remove_provider_for_display(&display, &old_provider);
            debug!("Removed old user CSS provider");
        }
    });

    // Load the new CSS
    load_user_css(&display);
}
