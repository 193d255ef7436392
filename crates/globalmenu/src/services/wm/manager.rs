//! WmManager - main-thread singleton in front of the discovery backend.
//!
//! The backend thread pushes [`MenuUpdate`]s through `glib::idle_add_once`,
//! so everything past this point runs on the GTK main loop. Listeners
//! registering after startup immediately receive the last known state.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use globalmenu_core::Config;
use gtk4::glib;
use tracing::{debug, info};

use super::{BackendKind, DiscoveryConfig, MenuCallback, MenuUpdate, WmBackend, factory};
use crate::services::callbacks::{CallbackId, Callbacks};

thread_local! {
    static WM_MANAGER: RefCell<Option<Rc<WmManager>>> = const { RefCell::new(None) };
}

pub struct WmManager {
    backend: RefCell<Option<Box<dyn WmBackend>>>,
    menu_callbacks: Callbacks<MenuUpdate>,
    last_update: RefCell<MenuUpdate>,
}

impl WmManager {
    fn new(config: &Config) -> Rc<Self> {
        let manager = Rc::new(Self {
            backend: RefCell::new(None),
            menu_callbacks: Callbacks::new(),
            last_update: RefCell::new(MenuUpdate::default()),
        });
        Self::init_backend(&manager, config);
        manager
    }

    /// Initialize the global singleton. Must run once on the GTK main thread
    /// before any call to `global()`.
    pub fn init_global(config: &Config) {
        WM_MANAGER.with(|cell| {
            let mut opt = cell.borrow_mut();
            if opt.is_some() {
                debug!("WmManager already initialized, skipping re-init");
                return;
            }
            *opt = Some(WmManager::new(config));
        });
    }

    /// Get the global singleton. Panics if `init_global()` has not run.
    pub fn global() -> Rc<Self> {
        WM_MANAGER.with(|cell| {
            cell.borrow()
                .clone()
                .expect("WmManager::global() called before init_global()")
        })
    }

    /// Register for discovery updates. The callback immediately receives the
    /// current state.
    pub fn register_menu_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&MenuUpdate) + 'static,
    {
        let id = self.menu_callbacks.register(callback);
        self.menu_callbacks
            .notify_single(id, &self.last_update.borrow());
        id
    }

    pub fn unregister_menu_callback(&self, id: CallbackId) {
        self.menu_callbacks.unregister(id);
    }

    pub fn current(&self) -> MenuUpdate {
        self.last_update.borrow().clone()
    }

    pub fn backend_name(&self) -> &'static str {
        match &*self.backend.borrow() {
            Some(backend) => backend.name(),
            None => "unknown",
        }
    }

    /// Called via glib::idle_add_once from the backend thread.
    pub(crate) fn handle_menu_update(&self, update: MenuUpdate) {
        if *self.last_update.borrow() == update {
            return;
        }
        debug!(
            service = update.address.as_ref().map(|a| a.service.as_str()),
            visible = update.visible,
            "active menu changed"
        );
        *self.last_update.borrow_mut() = update.clone();
        self.menu_callbacks.notify(&update);
    }

    fn init_backend(this: &Rc<Self>, config: &Config) {
        let kind = BackendKind::from_config(&config.wm.backend);
        let discovery = DiscoveryConfig {
            filter_by_active: config.menu.filter_by_active,
            filter_children: config.menu.filter_children,
            pinned: config.menu.pinned(),
            bounds: config.menu.bounds(),
        };
        let recheck_delay = Duration::from_millis(config.wm.recheck_delay_ms);
        let backend = factory::create_backend(kind, discovery, recheck_delay);

        info!(
            "WmManager using backend: {} (config: {})",
            backend.name(),
            config.wm.backend,
        );

        let on_menu_update: MenuCallback = Arc::new(move |update| {
            glib::idle_add_once(move || {
                WmManager::global().handle_menu_update(update);
            });
        });
        backend.start(on_menu_update);

        *this.backend.borrow_mut() = Some(backend);
    }
}

impl Drop for WmManager {
    fn drop(&mut self) {
        if let Some(ref backend) = *self.backend.borrow() {
            backend.stop();
        }
        debug!("WmManager dropped");
    }
}
