//! Window-manager backends and the discovery multiplexer.
//!
//! A backend watches the session's windowing layer (X11 properties or the
//! niri event stream) from a background thread, runs the shared
//! [`discovery::DiscoveryMachine`] over what it sees, and pushes
//! [`MenuUpdate`]s out through a thread-safe callback. [`WmManager`]
//! marshals those onto the GTK main loop for the widgets.

pub mod discovery;
pub mod manager;
mod wayland;
mod x11;

use std::sync::Arc;
use std::time::Duration;

pub use discovery::{DiscoveryConfig, MenuAddress, WindowId};
pub use manager::WmManager;

/// One discovery result pushed out of a backend thread.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MenuUpdate {
    /// Menu exporter for the tracked window, when one is available.
    pub address: Option<MenuAddress>,
    /// Verdict of the visibility filter for the tracked window.
    pub visible: bool,
}

/// Callback type for menu discovery updates. Invoked from the backend's
/// monitoring thread.
pub type MenuCallback = Arc<dyn Fn(MenuUpdate) + Send + Sync>;

/// A windowing-layer watcher. One instance per process, selected at startup;
/// there is no runtime backend switching.
pub trait WmBackend: Send + Sync {
    /// Start the monitoring thread. Updates flow through `on_menu_update`.
    fn start(&self, on_menu_update: MenuCallback);

    /// Stop the monitoring thread and wait for it to exit.
    fn stop(&self);

    fn name(&self) -> &'static str;
}

/// Which backend to run, from `[wm] backend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Auto,
    X11,
    Wayland,
}

impl BackendKind {
    pub fn from_config(value: &str) -> Self {
        match value {
            "x11" => Self::X11,
            "wayland" => Self::Wayland,
            _ => Self::Auto,
        }
    }
}

pub(crate) mod factory {
    use super::*;
    use tracing::debug;

    pub fn create_backend(
        kind: BackendKind,
        discovery: DiscoveryConfig,
        recheck_delay: Duration,
    ) -> Box<dyn WmBackend> {
        let resolved = match kind {
            BackendKind::Auto => detect(),
            other => other,
        };
        debug!(?kind, ?resolved, "selecting wm backend");
        match resolved {
            BackendKind::Wayland => {
                Box::new(wayland::WaylandBackend::new(discovery, recheck_delay))
            }
            _ => Box::new(x11::X11Backend::new(discovery)),
        }
    }

    fn detect() -> BackendKind {
        if std::env::var("NIRI_SOCKET").is_ok() || std::env::var("WAYLAND_DISPLAY").is_ok() {
            BackendKind::Wayland
        } else {
            BackendKind::X11
        }
    }
}
