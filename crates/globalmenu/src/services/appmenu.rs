//! AppMenuService - binds discovery to a menu importer and projects the
//! active menu's top level as an indexed row list.
//!
//! The service follows `WmManager`: a new (service, path) pair replaces the
//! importer wholesale, the same pair again only queues a root refresh. The
//! row list holds remote ids; widgets resolve labels and submenus through
//! the accessors here and never touch the importer directly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use gtk4::gio;
use tracing::{debug, warn};

use crate::services::callbacks::{CallbackId, Callbacks};
use crate::services::dbus::{SignalSubscription, SubscribeToSignal};
use crate::services::menu::mirror::MenuItem;
use crate::services::menu::{MenuId, MenuImporter, ROOT_ID};
use crate::services::wm::{MenuUpdate, WmManager};

thread_local! {
    static APP_MENU_SERVICE: RefCell<Option<Rc<AppMenuService>>> = const { RefCell::new(None) };
}

/// How the row list changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelEvent {
    /// Structure changed; rebuild everything.
    Reset,
    /// A single row's display properties changed.
    RowChanged(usize),
}

/// What activating a row means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAction {
    /// The row owns a submenu; present it (and call `request_show`).
    Submenu(MenuId),
    /// The row was a leaf and its clicked event has been sent.
    Triggered,
}

pub struct AppMenuService {
    connection: RefCell<Option<gio::DBusConnection>>,
    /// Discovery result that arrived before the bus connection did.
    pending_update: RefCell<Option<MenuUpdate>>,
    importer: RefCell<Option<Rc<MenuImporter>>>,
    rows: RefCell<Vec<MenuId>>,
    available: Cell<bool>,
    visible: Cell<bool>,
    /// Row list changes.
    pub model_events: Callbacks<ModelEvent>,
    /// The application asked the shell to open a top-level row.
    pub activate_requests: Callbacks<usize>,
    /// A submenu's contents became ready; open popups refresh on this.
    pub submenu_updated: Callbacks<MenuId>,
    name_watch: RefCell<Option<SignalSubscription>>,
    _wm_callback: RefCell<Option<CallbackId>>,
}

impl AppMenuService {
    fn new() -> Rc<Self> {
        let service = Rc::new(Self {
            connection: RefCell::new(None),
            pending_update: RefCell::new(None),
            importer: RefCell::new(None),
            rows: RefCell::new(Vec::new()),
            available: Cell::new(false),
            visible: Cell::new(false),
            model_events: Callbacks::new(),
            activate_requests: Callbacks::new(),
            submenu_updated: Callbacks::new(),
            name_watch: RefCell::new(None),
            _wm_callback: RefCell::new(None),
        });

        let weak = Rc::downgrade(&service);
        gio::bus_get(
            gio::BusType::Session,
            None::<&gio::Cancellable>,
            move |result| {
                let Some(this) = weak.upgrade() else { return };
                match result {
                    Ok(connection) => {
                        *this.connection.borrow_mut() = Some(connection);
                        if let Some(update) = this.pending_update.borrow_mut().take() {
                            this.handle_menu_update(&update);
                        }
                    }
                    Err(err) => warn!("session bus unavailable, menus disabled: {err}"),
                }
            },
        );

        let weak = Rc::downgrade(&service);
        let wm_callback = WmManager::global().register_menu_callback(move |update| {
            if let Some(this) = weak.upgrade() {
                this.handle_menu_update(update);
            }
        });
        *service._wm_callback.borrow_mut() = Some(wm_callback);

        service
    }

    /// Initialize the global singleton. `WmManager::init_global` must have
    /// run first.
    pub fn init_global() {
        APP_MENU_SERVICE.with(|cell| {
            let mut opt = cell.borrow_mut();
            if opt.is_some() {
                debug!("AppMenuService already initialized, skipping re-init");
                return;
            }
            *opt = Some(AppMenuService::new());
        });
    }

    /// Get the global singleton. Panics if `init_global()` has not run.
    pub fn global() -> Rc<Self> {
        APP_MENU_SERVICE.with(|cell| {
            cell.borrow()
                .clone()
                .expect("AppMenuService::global() called before init_global()")
        })
    }

    /// Whether the active window currently exports a usable menu.
    pub fn is_available(&self) -> bool {
        self.available.get()
    }

    /// Visibility verdict from discovery (active, not minimized, in bounds).
    pub fn is_visible(&self) -> bool {
        self.visible.get()
    }

    pub fn row_count(&self) -> usize {
        self.rows.borrow().len()
    }

    pub fn row_id(&self, index: usize) -> Option<MenuId> {
        self.rows.borrow().get(index).copied()
    }

    pub fn row_label(&self, index: usize) -> Option<String> {
        let id = self.row_id(index)?;
        Some(self.item(id)?.display_label())
    }

    pub fn item(&self, id: MenuId) -> Option<MenuItem> {
        self.importer.borrow().as_ref()?.item(id)
    }

    pub fn children_of(&self, id: MenuId) -> Vec<MenuId> {
        match &*self.importer.borrow() {
            Some(importer) => importer.children_of(id),
            None => Vec::new(),
        }
    }

    /// Resolve and act on a row. Submenu rows are handed back for display;
    /// everything else fires its clicked event remotely, with no layout
    /// fetch.
    pub fn activate_row(&self, index: usize) -> Option<RowAction> {
        let id = self.row_id(index)?;
        let importer = self.importer.borrow().clone()?;
        let item = importer.item(id)?;
        let action = row_action_for(&item, id);
        if action == RowAction::Triggered {
            importer.activate(id);
        }
        Some(action)
    }

    /// A popup for `menu` is about to open.
    pub fn request_show(&self, menu: MenuId) {
        if let Some(importer) = self.importer.borrow().clone() {
            importer.request_show(menu);
        }
    }

    /// A popup for `menu` closed.
    pub fn notify_closed(&self, menu: MenuId) {
        if let Some(importer) = self.importer.borrow().clone() {
            importer.notify_closed(menu);
        }
    }

    /// Activate a (possibly nested) leaf item from an open popup.
    pub fn activate_item(&self, id: MenuId) {
        if let Some(importer) = self.importer.borrow().clone() {
            importer.activate(id);
        }
    }

    fn handle_menu_update(&self, update: &MenuUpdate) {
        self.visible.set(update.visible);
        self.available.set(menu_available(update));

        let Some(address) = &update.address else {
            self.clear_menu();
            return;
        };

        let connection = match &*self.connection.borrow() {
            Some(connection) => connection.clone(),
            None => {
                *self.pending_update.borrow_mut() = Some(update.clone());
                return;
            }
        };

        let same_menu = self.importer.borrow().as_ref().is_some_and(|importer| {
            importer.service() == address.service && importer.path() == address.path
        });
        if same_menu {
            // Same exporter re-announced; the layout may still have moved.
            if let Some(importer) = self.importer.borrow().clone() {
                importer.refresh_menu(ROOT_ID);
            }
            return;
        }

        self.attach_importer(connection, &address.service, &address.path);
    }

    fn attach_importer(&self, connection: gio::DBusConnection, service: &str, path: &str) {
        debug!(service, path, "importing menu");

        let importer = MenuImporter::new(connection.clone(), service, path);

        let this = Rc::downgrade(&Self::global());
        importer.menu_updated.register(move |menu| {
            let Some(this) = this.upgrade() else { return };
            if *menu == ROOT_ID {
                this.rebuild_rows();
            } else {
                this.submenu_updated.notify(menu);
            }
        });

        let this = Rc::downgrade(&Self::global());
        importer.item_changed.register(move |id| {
            if let Some(this) = this.upgrade() {
                this.handle_item_changed(*id);
            }
        });

        let this = Rc::downgrade(&Self::global());
        importer.activation_requested.register(move |id| {
            let Some(this) = this.upgrade() else { return };
            if let Some(index) = this.rows.borrow().iter().position(|row| row == id) {
                this.activate_requests.notify(&index);
            }
        });

        // The menu dies with its exporter
        let this = Rc::downgrade(&Self::global());
        let watched = service.to_string();
        *self.name_watch.borrow_mut() = Some(connection.subscribe_to_signal(
            Some("org.freedesktop.DBus"),
            Some("org.freedesktop.DBus"),
            Some("NameOwnerChanged"),
            Some("/org/freedesktop/DBus"),
            Some(service),
            gio::DBusSignalFlags::NONE,
            move |signal| {
                let Some(this) = this.upgrade() else { return };
                let new_owner = signal
                    .parameters
                    .try_child_value(2)
                    .and_then(|v| v.get::<String>())
                    .unwrap_or_default();
                if new_owner.is_empty() {
                    debug!(service = watched, "menu exporter left the bus");
                    this.clear_menu();
                }
            },
        ));

        *self.importer.borrow_mut() = Some(importer);
        self.rebuild_rows();
    }

    fn clear_menu(&self) {
        let had_menu = self.importer.borrow().is_some() || !self.rows.borrow().is_empty();
        *self.importer.borrow_mut() = None;
        *self.name_watch.borrow_mut() = None;
        self.rows.borrow_mut().clear();
        self.available.set(false);
        if had_menu {
            self.model_events.notify(&ModelEvent::Reset);
        }
    }

    /// Every root child in remote order. Separators and hidden items keep
    /// their index so remote activation requests and spec-style row indices
    /// line up; the widget layer decides what to render.
    fn compute_rows(&self) -> Vec<MenuId> {
        match &*self.importer.borrow() {
            Some(importer) => importer.root_rows(),
            None => Vec::new(),
        }
    }

    fn rebuild_rows(&self) {
        *self.rows.borrow_mut() = self.compute_rows();
        self.model_events.notify(&ModelEvent::Reset);
        self.prefetch_first_layer();
    }

    /// Fetch the first submenu layer up front so the first click on a row
    /// does not wait on a GetLayout round-trip.
    fn prefetch_first_layer(&self) {
        let Some(importer) = self.importer.borrow().clone() else {
            return;
        };
        for id in self.rows.borrow().iter().copied() {
            let needs_fetch = importer.item(id).is_some_and(|item| item.has_submenu)
                && importer.children_of(id).is_empty();
            if needs_fetch {
                importer.refresh_menu(id);
            }
        }
    }

    fn handle_item_changed(&self, id: MenuId) {
        // The row id list only changes through reconciliation, which emits
        // its own root update; property changes map straight to a row.
        if let Some(index) = self.rows.borrow().iter().position(|row| *row == id) {
            self.model_events.notify(&ModelEvent::RowChanged(index));
        }
    }
}

/// What activating a resolved row does: submenu rows open, everything else
/// (leaves included) is clicked remotely.
fn row_action_for(item: &MenuItem, id: MenuId) -> RowAction {
    if item.has_submenu {
        RowAction::Submenu(id)
    } else {
        RowAction::Triggered
    }
}

/// Availability tracks discovery, not the row count: an exporter whose root
/// is momentarily empty is still an available menu.
fn menu_available(update: &MenuUpdate) -> bool {
    update.address.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::menu::mirror::ActionMirror;
    use crate::services::menu::types::{ItemKind, PropertyUpdate};
    use crate::services::wm::discovery::MenuAddress;

    #[test]
    fn test_rows_index_every_top_level_item() {
        // Root {1: File submenu, 2: separator, 3: Quit}: all three occupy a
        // row index, and activating index 2 resolves to the Quit leaf.
        let mut mirror = ActionMirror::new();
        mirror.create_or_update(
            ROOT_ID,
            1,
            &PropertyUpdate {
                label: Some("File".into()),
                has_submenu: Some(true),
                ..PropertyUpdate::default()
            },
            true,
        );
        mirror.create_or_update(
            ROOT_ID,
            2,
            &PropertyUpdate {
                kind: Some(ItemKind::Separator),
                ..PropertyUpdate::default()
            },
            true,
        );
        mirror.create_or_update(
            ROOT_ID,
            3,
            &PropertyUpdate {
                label: Some("Quit".into()),
                ..PropertyUpdate::default()
            },
            true,
        );

        let rows = mirror.children(ROOT_ID).to_vec();
        assert_eq!(rows, vec![1, 2, 3], "separators keep their row index");

        assert_eq!(
            row_action_for(mirror.item(rows[0]).unwrap(), rows[0]),
            RowAction::Submenu(1)
        );
        assert_eq!(
            row_action_for(mirror.item(rows[2]).unwrap(), rows[2]),
            RowAction::Triggered
        );
    }

    #[test]
    fn test_availability_follows_discovery_not_rows() {
        let discovered = MenuUpdate {
            address: Some(MenuAddress::new(":1.42", "/MenuBar")),
            visible: false,
        };
        assert!(menu_available(&discovered), "empty root is still a menu");

        let gone = MenuUpdate {
            address: None,
            visible: true,
        };
        assert!(!menu_available(&gone));
    }
}
