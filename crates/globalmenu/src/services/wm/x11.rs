//! X11 discovery backend.
//!
//! Watches `_NET_ACTIVE_WINDOW` on the root window and reads the KDE appmenu
//! properties (`_KDE_NET_WM_APPMENU_SERVICE_NAME` / `_OBJECT_PATH`) off
//! application windows. The tracked window's property events stay watched:
//! before an announcement to catch it landing late, after one so
//! `_NET_WM_STATE` flips (minimize, restore) reach the visibility filter.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace, warn};
use x11rb::atom_manager;
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ChangeWindowAttributesAux, ConnectionExt, EventMask, Window,
};
use x11rb::rust_connection::RustConnection;

use super::discovery::{
    DiscoveryConfig, DiscoveryMachine, Effect, MenuAddress, WindowQuery,
};
use super::{MenuCallback, MenuUpdate, WmBackend};

const RECONNECT_INITIAL_MS: u64 = 1000;
const RECONNECT_MAX_MS: u64 = 30000;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

atom_manager! {
    Atoms:
    AtomsCookie {
        _NET_ACTIVE_WINDOW,
        _NET_WM_STATE,
        _NET_WM_STATE_HIDDEN,
        _NET_WM_STATE_SKIP_TASKBAR,
        _NET_WM_WINDOW_TYPE,
        _NET_WM_WINDOW_TYPE_DESKTOP,
        _NET_WM_WINDOW_TYPE_DOCK,
        _NET_WM_WINDOW_TYPE_UTILITY,
        _KDE_NET_WM_APPMENU_SERVICE_NAME,
        _KDE_NET_WM_APPMENU_OBJECT_PATH,
        UTF8_STRING,
    }
}

pub struct X11Backend {
    discovery: DiscoveryConfig,
    running: Arc<AtomicBool>,
    event_thread: Mutex<Option<JoinHandle<()>>>,
}

impl X11Backend {
    pub fn new(discovery: DiscoveryConfig) -> Self {
        Self {
            discovery,
            running: Arc::new(AtomicBool::new(false)),
            event_thread: Mutex::new(None),
        }
    }

    fn event_loop(running: Arc<AtomicBool>, discovery: DiscoveryConfig, callback: MenuCallback) {
        let mut backoff_ms = RECONNECT_INITIAL_MS;
        while running.load(Ordering::SeqCst) {
            match Self::watch(&running, &discovery, &callback) {
                Ok(()) => break,
                Err(err) => {
                    if running.load(Ordering::SeqCst) {
                        warn!("X11 connection lost: {err}. Retrying in {backoff_ms}ms");
                        thread::sleep(Duration::from_millis(backoff_ms));
                        backoff_ms = (backoff_ms * 2).min(RECONNECT_MAX_MS);
                    }
                }
            }
        }
        debug!("X11 event loop exiting");
    }

    fn watch(
        running: &AtomicBool,
        discovery: &DiscoveryConfig,
        callback: &MenuCallback,
    ) -> anyhow::Result<()> {
        let (conn, screen_num) = x11rb::connect(None)?;
        let atoms = Atoms::new(&conn)?.reply()?;
        let root = conn.setup().roots[screen_num].root;

        conn.change_window_attributes(
            root,
            &ChangeWindowAttributesAux::new()
                .event_mask(EventMask::PROPERTY_CHANGE | EventMask::SUBSTRUCTURE_NOTIFY),
        )?;
        conn.flush()?;

        let query = X11Query {
            conn: &conn,
            atoms,
            root,
            scale: gdk_scale(),
        };
        let mut machine = DiscoveryMachine::new(discovery.clone());

        let effects = machine.active_window_changed(query.active_window(), &query);
        Self::apply_effects(&query, &machine, effects, callback);

        loop {
            if !running.load(Ordering::SeqCst) {
                return Ok(());
            }

            while let Some(event) = conn.poll_for_event()? {
                let effects = match event {
                    Event::PropertyNotify(notify) => {
                        if notify.window == root && notify.atom == atoms._NET_ACTIVE_WINDOW {
                            machine.active_window_changed(query.active_window(), &query)
                        } else if notify.atom == atoms._KDE_NET_WM_APPMENU_SERVICE_NAME
                            || notify.atom == atoms._KDE_NET_WM_APPMENU_OBJECT_PATH
                            || notify.atom == atoms._NET_WM_STATE
                        {
                            machine.window_property_changed(notify.window, &query)
                        } else {
                            Vec::new()
                        }
                    }
                    Event::DestroyNotify(notify) => machine.window_removed(notify.window, &query),
                    _ => Vec::new(),
                };
                Self::apply_effects(&query, &machine, effects, callback);
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    fn apply_effects(
        query: &X11Query<'_>,
        machine: &DiscoveryMachine,
        effects: Vec<Effect>,
        callback: &MenuCallback,
    ) {
        let mut publish = false;
        for effect in effects {
            match effect {
                Effect::WatchWindow(window) => query.watch(window),
                Effect::UnwatchWindow(window) => query.unwatch(window),
                Effect::Publish(_) | Effect::SetVisible(_) => publish = true,
            }
        }
        if publish {
            callback(MenuUpdate {
                address: machine.current().cloned(),
                visible: machine.is_visible(),
            });
        }
    }
}

impl WmBackend for X11Backend {
    fn start(&self, on_menu_update: MenuCallback) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("X11Backend already running");
            return;
        }

        let running = Arc::clone(&self.running);
        let discovery = self.discovery.clone();
        let handle = thread::Builder::new()
            .name("x11-menu-watch".into())
            .spawn(move || {
                Self::event_loop(running, discovery, on_menu_update);
            })
            .ok();
        *self.event_thread.lock().unwrap_or_else(|e| e.into_inner()) = handle;
    }

    fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self
            .event_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = handle.join();
        }
    }

    fn name(&self) -> &'static str {
        "X11"
    }
}

impl Drop for X11Backend {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// GDK's integer scale factor, for the bounds-check center correction.
fn gdk_scale() -> i32 {
    std::env::var("GDK_SCALE")
        .ok()
        .and_then(|v| v.parse::<i32>().ok())
        .filter(|scale| *scale >= 1)
        .unwrap_or(1)
}

struct X11Query<'a> {
    conn: &'a RustConnection,
    atoms: Atoms,
    root: Window,
    scale: i32,
}

impl X11Query<'_> {
    fn active_window(&self) -> Option<Window> {
        let window = self
            .window_property(self.root, self.atoms._NET_ACTIVE_WINDOW)
            .unwrap_or(0);
        (window != 0).then_some(window)
    }

    fn watch(&self, window: Window) {
        let result = self.conn.change_window_attributes(
            window,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE),
        );
        if result.is_err() {
            trace!(window, "cannot watch window, it is probably gone");
        }
        let _ = self.conn.flush();
    }

    fn unwatch(&self, window: Window) {
        let _ = self.conn.change_window_attributes(
            window,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::NO_EVENT),
        );
        let _ = self.conn.flush();
    }

    fn utf8_property(&self, window: Window, property: Atom) -> Option<String> {
        let reply = self
            .conn
            .get_property(false, window, property, AtomEnum::ANY, 0, 1024)
            .ok()?
            .reply()
            .ok()?;
        if reply.value.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&reply.value).into_owned())
    }

    fn window_property(&self, window: Window, property: Atom) -> Option<u32> {
        let reply = self
            .conn
            .get_property(false, window, property, AtomEnum::WINDOW, 0, 1)
            .ok()?
            .reply()
            .ok()?;
        reply.value32()?.next()
    }

    fn atom_list(&self, window: Window, property: Atom) -> Vec<Atom> {
        self.conn
            .get_property(false, window, property, AtomEnum::ATOM, 0, 32)
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .and_then(|reply| reply.value32().map(|values| values.collect()))
            .unwrap_or_default()
    }
}

impl WindowQuery for X11Query<'_> {
    fn menu_address(&self, window: Window) -> Option<MenuAddress> {
        let service = self.utf8_property(window, self.atoms._KDE_NET_WM_APPMENU_SERVICE_NAME)?;
        let path = self.utf8_property(window, self.atoms._KDE_NET_WM_APPMENU_OBJECT_PATH)?;
        (!service.is_empty() && !path.is_empty()).then(|| MenuAddress::new(service, path))
    }

    fn transient_parent(&self, window: Window) -> Option<Window> {
        let parent = self.window_property(window, AtomEnum::WM_TRANSIENT_FOR.into())?;
        (parent != 0 && parent != self.root && parent != window).then_some(parent)
    }

    fn is_skipped(&self, window: Window) -> bool {
        let state = self.atom_list(window, self.atoms._NET_WM_STATE);
        if state.contains(&self.atoms._NET_WM_STATE_SKIP_TASKBAR) {
            return true;
        }
        let window_type = self.atom_list(window, self.atoms._NET_WM_WINDOW_TYPE);
        window_type.contains(&self.atoms._NET_WM_WINDOW_TYPE_DESKTOP)
            || window_type.contains(&self.atoms._NET_WM_WINDOW_TYPE_DOCK)
            || window_type.contains(&self.atoms._NET_WM_WINDOW_TYPE_UTILITY)
    }

    fn is_minimized(&self, window: Window) -> bool {
        self.atom_list(window, self.atoms._NET_WM_STATE)
            .contains(&self.atoms._NET_WM_STATE_HIDDEN)
    }

    fn center(&self, window: Window) -> Option<(i32, i32)> {
        let geometry = self.conn.get_geometry(window).ok()?.reply().ok()?;
        let translated = self
            .conn
            .translate_coordinates(window, self.root, 0, 0)
            .ok()?
            .reply()
            .ok()?;
        let x = translated.dst_x as i32 + geometry.width as i32 / 2;
        let y = translated.dst_y as i32 + geometry.height as i32 / 2;
        Some((x / self.scale, y / self.scale))
    }
}
