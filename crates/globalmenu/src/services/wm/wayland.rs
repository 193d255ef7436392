//! Wayland discovery backend for niri.
//!
//! niri exposes no per-window menu properties, so discovery goes through two
//! sources: the niri IPC event stream (who has focus) and the
//! com.canonical.AppMenu.Registrar service (which window ids have registered
//! a menu). Applications register late routinely here, so a missed lookup
//! arms a single-shot delayed re-check instead of a property watch.
//!
//! Protocol: JSON over $NIRI_SOCKET, one event per line.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use gtk4::gio;
use gtk4::gio::prelude::*;
use gtk4::glib::VariantTy;
use gtk4::glib::prelude::*;
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::discovery::{
    DiscoveryConfig, DiscoveryMachine, Effect, MenuAddress, WindowId, WindowQuery,
};
use super::{MenuCallback, MenuUpdate, WmBackend};

const RECONNECT_INITIAL_MS: u64 = 1000;
const RECONNECT_MAX_MS: u64 = 30000;
const READ_TIMEOUT: Duration = Duration::from_millis(100);

const REGISTRAR_SERVICE: &str = "com.canonical.AppMenu.Registrar";
const REGISTRAR_PATH: &str = "/com/canonical/AppMenu/Registrar";
const REGISTRAR_INTERFACE: &str = "com.canonical.AppMenu.Registrar";
const REGISTRAR_TIMEOUT_MS: i32 = 2_000;

pub struct WaylandBackend {
    discovery: DiscoveryConfig,
    recheck_delay: Duration,
    running: Arc<AtomicBool>,
    event_thread: Mutex<Option<JoinHandle<()>>>,
}

impl WaylandBackend {
    pub fn new(discovery: DiscoveryConfig, recheck_delay: Duration) -> Self {
        Self {
            discovery,
            recheck_delay,
            running: Arc::new(AtomicBool::new(false)),
            event_thread: Mutex::new(None),
        }
    }

    fn event_loop(
        running: Arc<AtomicBool>,
        discovery: DiscoveryConfig,
        recheck_delay: Duration,
        callback: MenuCallback,
    ) {
        let mut backoff_ms = RECONNECT_INITIAL_MS;
        while running.load(Ordering::SeqCst) {
            match Self::watch(&running, &discovery, recheck_delay, &callback) {
                Ok(()) => break,
                Err(err) => {
                    if running.load(Ordering::SeqCst) {
                        warn!("niri connection lost: {err}. Retrying in {backoff_ms}ms");
                        thread::sleep(Duration::from_millis(backoff_ms));
                        backoff_ms = (backoff_ms * 2).min(RECONNECT_MAX_MS);
                    }
                }
            }
        }
        debug!("wayland event loop exiting");
    }

    fn watch(
        running: &AtomicBool,
        discovery: &DiscoveryConfig,
        recheck_delay: Duration,
        callback: &MenuCallback,
    ) -> anyhow::Result<()> {
        let socket_path = std::env::var("NIRI_SOCKET")
            .map_err(|_| anyhow::anyhow!("NIRI_SOCKET not set"))?;

        let bus = gio::bus_get_sync(gio::BusType::Session, None::<&gio::Cancellable>)?;
        let query = RegistrarQuery { bus: &bus };
        let mut machine = DiscoveryMachine::new(discovery.clone());
        let mut recheck_at: Option<Instant> = None;

        let mut stream = UnixStream::connect(&socket_path)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        stream.write_all(b"\"EventStream\"\n")?;
        let mut reader = BufReader::new(stream);
        let mut line = String::new();

        loop {
            if !running.load(Ordering::SeqCst) {
                return Ok(());
            }

            if recheck_at.is_some_and(|at| Instant::now() >= at) {
                recheck_at = None;
                let effects = machine.recheck(&query);
                Self::apply_effects(&machine, effects, callback, recheck_delay, &mut recheck_at);
            }

            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => anyhow::bail!("niri closed the event stream"),
                Ok(_) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let event: Value = match serde_json::from_str(line) {
                        Ok(event) => event,
                        Err(err) => {
                            trace!("unparseable niri event: {err}");
                            continue;
                        }
                    };
                    if event.get("Ok").is_some() {
                        continue;
                    }
                    let effects = Self::handle_event(&mut machine, &query, &event);
                    Self::apply_effects(
                        &machine,
                        effects,
                        callback,
                        recheck_delay,
                        &mut recheck_at,
                    );
                }
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn handle_event(
        machine: &mut DiscoveryMachine,
        query: &RegistrarQuery<'_>,
        event: &Value,
    ) -> Vec<Effect> {
        if let Some(focus) = event.get("WindowFocusChanged") {
            let id = focus.get("id").and_then(|v| v.as_u64());
            return machine.active_window_changed(id.map(|id| id as WindowId), query);
        }

        if let Some(changed) = event.get("WindowsChanged") {
            let focused = changed
                .get("windows")
                .and_then(|v| v.as_array())
                .and_then(|windows| {
                    windows.iter().find(|w| {
                        w.get("is_focused").and_then(|v| v.as_bool()).unwrap_or(false)
                    })
                })
                .and_then(|w| w.get("id").and_then(|v| v.as_u64()));
            return machine.active_window_changed(focused.map(|id| id as WindowId), query);
        }

        if let Some(opened) = event.get("WindowOpenedOrChanged") {
            let window = opened.get("window");
            let focused = window
                .and_then(|w| w.get("is_focused"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if focused && let Some(id) = window.and_then(|w| w.get("id")).and_then(|v| v.as_u64())
            {
                return machine.active_window_changed(Some(id as WindowId), query);
            }
            return Vec::new();
        }

        if let Some(closed) = event.get("WindowClosed")
            && let Some(id) = closed.get("id").and_then(|v| v.as_u64())
        {
            return machine.window_removed(id as WindowId, query);
        }

        Vec::new()
    }

    fn apply_effects(
        machine: &DiscoveryMachine,
        effects: Vec<Effect>,
        callback: &MenuCallback,
        recheck_delay: Duration,
        recheck_at: &mut Option<Instant>,
    ) {
        let mut publish = false;
        for effect in effects {
            match effect {
                // No property events to subscribe to here: a watch request
                // on a still-unannounced window arms the single-shot delayed
                // re-check instead.
                Effect::WatchWindow(_) => {
                    if machine.current().is_none() {
                        *recheck_at = Some(Instant::now() + recheck_delay);
                    }
                }
                Effect::UnwatchWindow(_) => *recheck_at = None,
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

impl WmBackend for WaylandBackend {
    fn start(&self, on_menu_update: MenuCallback) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("WaylandBackend already running");
            return;
        }

        let running = Arc::clone(&self.running);
        let discovery = self.discovery.clone();
        let recheck_delay = self.recheck_delay;
        let handle = thread::Builder::new()
            .name("wayland-menu-watch".into())
            .spawn(move || {
                Self::event_loop(running, discovery, recheck_delay, on_menu_update);
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
        "Wayland"
    }
}

impl Drop for WaylandBackend {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Menu lookup through the AppMenu registrar. niri reports no transient or
/// geometry information over IPC, so those queries stay empty and the
/// delayed re-check carries the late-registration case.
struct RegistrarQuery<'a> {
    bus: &'a gio::DBusConnection,
}

impl WindowQuery for RegistrarQuery<'_> {
    fn menu_address(&self, window: WindowId) -> Option<MenuAddress> {
        let reply = self
            .bus
            .call_sync(
                Some(REGISTRAR_SERVICE),
                REGISTRAR_PATH,
                REGISTRAR_INTERFACE,
                "GetMenuForWindow",
                Some(&(window,).to_variant()),
                Some(VariantTy::new("(so)").unwrap()),
                gio::DBusCallFlags::NONE,
                REGISTRAR_TIMEOUT_MS,
                None::<&gio::Cancellable>,
            )
            .ok()?;
        let service = reply.try_child_value(0)?.get::<String>()?;
        let path = reply.try_child_value(1)?.get::<String>()?;
        (!service.is_empty() && path != "/").then(|| MenuAddress::new(service, path))
    }

    fn transient_parent(&self, _window: WindowId) -> Option<WindowId> {
        None
    }

    fn is_skipped(&self, _window: WindowId) -> bool {
        false
    }

    fn is_minimized(&self, _window: WindowId) -> bool {
        false
    }

    fn center(&self, _window: WindowId) -> Option<(i32, i32)> {
        None
    }
}
