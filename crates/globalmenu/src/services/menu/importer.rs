//! Asynchronous com.canonical.dbusmenu importer.
//!
//! One importer instance mirrors one remote menu tree. Menus are fetched
//! lazily, one layer at a time (`GetLayout` with depth 1): the root layer on
//! construction, submenu layers when their popup is about to open.
//!
//! `LayoutUpdated` storms are coalesced through a zero-delay timer, and an
//! update for a menu we just refreshed via `AboutToShow` is dropped once so
//! the exporter's echo of our own request does not trigger a second fetch.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use gtk4::gio;
use gtk4::gio::prelude::*;
use gtk4::glib;
use gtk4::glib::prelude::*;
use gtk4::glib::{Variant, VariantTy};
use tracing::{debug, trace};

use super::mirror::{ActionMirror, ApplyResult, MenuItem};
use super::types::{MenuId, PropertyUpdate, ROOT_ID};
use crate::services::callbacks::Callbacks;
use crate::services::dbus::{SignalSubscription, SubscribeToSignal};

const DBUSMENU_INTERFACE: &str = "com.canonical.dbusmenu";
const DBUS_CALL_TIMEOUT_MS: i32 = 5_000;

/// Item properties the importer tracks; everything else is filtered out of
/// `GetLayout` replies on the exporter side.
const PROPERTY_FILTER: &[&str] = &[
    "type",
    "children-display",
    "toggle-type",
    "toggle-state",
    "label",
    "enabled",
    "visible",
    "icon-name",
    "icon-data",
    "shortcut",
];

fn property_filter() -> Vec<String> {
    PROPERTY_FILTER.iter().map(|s| s.to_string()).collect()
}

/// Coalescing state for `LayoutUpdated` signals.
///
/// Exporters fire `LayoutUpdated` in bursts, and they also echo one back for
/// refreshes we caused ourselves through `AboutToShow`. Pending ids collect
/// in a set until a zero-delay timer drains them; an id in the suppression
/// set swallows exactly one update (the set entry is consumed on first hit,
/// so a genuine change arriving after the echo still gets through).
#[derive(Default)]
pub struct UpdateCoalescer {
    pending: HashSet<MenuId>,
    refreshed_by_about_to_show: HashSet<MenuId>,
    timer_armed: bool,
}

impl UpdateCoalescer {
    /// Record that `id` was just refreshed because of our own `AboutToShow`.
    pub fn note_about_to_show_refresh(&mut self, id: MenuId) {
        self.refreshed_by_about_to_show.insert(id);
    }

    /// Record an incoming `LayoutUpdated` for `id`. Returns true when the
    /// caller should arm the flush timer.
    pub fn note_layout_updated(&mut self, id: MenuId) -> bool {
        if self.refreshed_by_about_to_show.remove(&id) {
            return false;
        }
        self.pending.insert(id);
        if self.timer_armed {
            false
        } else {
            self.timer_armed = true;
            true
        }
    }

    /// Drain the pending set. Called when the flush timer fires, before any
    /// refresh is issued, so updates arriving during the refreshes queue a
    /// fresh round instead of getting lost.
    pub fn take_pending(&mut self) -> Vec<MenuId> {
        self.timer_armed = false;
        let mut ids: Vec<MenuId> = self.pending.drain().collect();
        ids.sort_unstable();
        ids
    }
}

struct ParsedLayout {
    revision: u32,
    children: Vec<(MenuId, PropertyUpdate)>,
}

/// Parse a `GetLayout` reply of type `(u(ia{sv}av))`, one layer deep.
fn parse_layout(reply: &Variant) -> Option<ParsedLayout> {
    let revision = reply.try_child_value(0)?.get::<u32>()?;
    let layout = reply.try_child_value(1)?;
    let raw_children = layout.try_child_value(2)?;

    let mut children = Vec::new();
    for boxed in raw_children.iter() {
        let Some(child) = boxed.as_variant() else {
            continue;
        };
        let Some(id) = child.try_child_value(0).and_then(|v| v.get::<MenuId>()) else {
            continue;
        };
        let properties = child
            .try_child_value(1)
            .and_then(|v| v.get::<HashMap<String, Variant>>())
            .unwrap_or_default();
        children.push((id, PropertyUpdate::from_variant_map(&properties)));
    }

    Some(ParsedLayout { revision, children })
}

/// Reconcile one menu layer against a freshly fetched child list.
///
/// Children absent from the new list are removed (deferred if the menu is
/// open), survivors get their updates applied and are moved to the tail so
/// the final order matches the remote order. Returns whether anything
/// observable changed.
fn reconcile(
    mirror: &mut ActionMirror,
    parent: MenuId,
    children: &[(MenuId, PropertyUpdate)],
) -> bool {
    if !mirror.contains(parent) {
        // Children of an unknown parent would be unreachable from any menu
        // and never freed.
        return false;
    }
    let surviving: HashSet<MenuId> = children.iter().map(|(id, _)| *id).collect();
    let previous_order: Vec<MenuId> = mirror.children(parent).to_vec();
    let removed = mirror.remove_if_absent(parent, &surviving);
    let mut changed = !removed.is_empty();

    for (id, update) in children {
        match mirror.create_or_update(parent, *id, update, true) {
            ApplyResult::Created | ApplyResult::Updated => changed = true,
            ApplyResult::Unchanged => {}
        }
        mirror.move_to_tail(parent, *id);
    }

    if mirror.children(parent) != previous_order {
        changed = true;
    }
    changed
}

/// Importer for one remote dbusmenu tree.
///
/// Owns the mirror arena and the signal subscriptions; hands out callback
/// registration for the widget layer. Lives on the GTK main thread.
pub struct MenuImporter {
    connection: gio::DBusConnection,
    service: String,
    path: String,
    mirror: RefCell<ActionMirror>,
    coalescer: RefCell<UpdateCoalescer>,
    /// A menu's contents are ready or changed; popups rebuild on this.
    pub menu_updated: Callbacks<MenuId>,
    /// A single item's observable properties changed.
    pub item_changed: Callbacks<MenuId>,
    /// The application asked for an item's menu to be presented.
    pub activation_requested: Callbacks<MenuId>,
    subscriptions: RefCell<Vec<SignalSubscription>>,
}

impl MenuImporter {
    pub fn new(connection: gio::DBusConnection, service: &str, path: &str) -> Rc<Self> {
        let importer = Rc::new(Self {
            connection,
            service: service.to_string(),
            path: path.to_string(),
            mirror: RefCell::new(ActionMirror::new()),
            coalescer: RefCell::new(UpdateCoalescer::default()),
            menu_updated: Callbacks::new(),
            item_changed: Callbacks::new(),
            activation_requested: Callbacks::new(),
            subscriptions: RefCell::new(Vec::new()),
        });

        importer.subscribe_signals();
        importer.refresh_menu(ROOT_ID);
        importer
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Ids of the root menu's entries, in remote order.
    pub fn root_rows(&self) -> Vec<MenuId> {
        self.mirror.borrow().children(ROOT_ID).to_vec()
    }

    pub fn children_of(&self, id: MenuId) -> Vec<MenuId> {
        self.mirror.borrow().children(id).to_vec()
    }

    pub fn item(&self, id: MenuId) -> Option<MenuItem> {
        self.mirror.borrow().item(id).cloned()
    }

    fn subscribe_signals(self: &Rc<Self>) {
        let mut subscriptions = self.subscriptions.borrow_mut();

        let weak = Rc::downgrade(self);
        subscriptions.push(self.connection.subscribe_to_signal(
            Some(&self.service),
            Some(DBUSMENU_INTERFACE),
            Some("LayoutUpdated"),
            Some(&self.path),
            None,
            gio::DBusSignalFlags::NONE,
            move |signal| {
                let Some(this) = weak.upgrade() else { return };
                // (u revision, i parent)
                let parent = signal
                    .parameters
                    .try_child_value(1)
                    .and_then(|v| v.get::<MenuId>())
                    .unwrap_or(ROOT_ID);
                this.handle_layout_updated(parent);
            },
        ));

        let weak = Rc::downgrade(self);
        subscriptions.push(self.connection.subscribe_to_signal(
            Some(&self.service),
            Some(DBUSMENU_INTERFACE),
            Some("ItemsPropertiesUpdated"),
            Some(&self.path),
            None,
            gio::DBusSignalFlags::NONE,
            move |signal| {
                let Some(this) = weak.upgrade() else { return };
                this.handle_properties_updated(&signal.parameters);
            },
        ));

        let weak = Rc::downgrade(self);
        subscriptions.push(self.connection.subscribe_to_signal(
            Some(&self.service),
            Some(DBUSMENU_INTERFACE),
            Some("ItemActivationRequested"),
            Some(&self.path),
            None,
            gio::DBusSignalFlags::NONE,
            move |signal| {
                let Some(this) = weak.upgrade() else { return };
                // (i id, u timestamp)
                if let Some(id) = signal
                    .parameters
                    .try_child_value(0)
                    .and_then(|v| v.get::<MenuId>())
                {
                    this.activation_requested.notify(&id);
                }
            },
        ));
    }

    fn handle_layout_updated(self: &Rc<Self>, parent: MenuId) {
        if !self.mirror.borrow().contains(parent) {
            // A parent we never fetched has nothing cached to invalidate.
            trace!(menu = parent, "layout update for an unknown menu ignored");
            return;
        }
        let arm = self.coalescer.borrow_mut().note_layout_updated(parent);
        if !arm {
            return;
        }
        let weak = Rc::downgrade(self);
        glib::timeout_add_local_once(Duration::ZERO, move || {
            if let Some(this) = weak.upgrade() {
                for id in this.coalescer.borrow_mut().take_pending() {
                    this.refresh_menu(id);
                }
            }
        });
    }

    fn handle_properties_updated(&self, parameters: &Variant) {
        let Some(updated) = parameters.try_child_value(0) else {
            return;
        };
        let Some(removed) = parameters.try_child_value(1) else {
            return;
        };

        let mut changed = Vec::new();
        {
            let mut mirror = self.mirror.borrow_mut();

            // a(ia{sv})
            for entry in updated.iter() {
                let Some(id) = entry.try_child_value(0).and_then(|v| v.get::<MenuId>()) else {
                    continue;
                };
                let Some(properties) = entry
                    .try_child_value(1)
                    .and_then(|v| v.get::<HashMap<String, Variant>>())
                else {
                    continue;
                };
                let update = PropertyUpdate::from_variant_map(&properties);
                if mirror.update_existing(id, &update) == ApplyResult::Updated {
                    changed.push(id);
                }
            }

            // a(ias): removed keys reset to their documented defaults
            for entry in removed.iter() {
                let Some(id) = entry.try_child_value(0).and_then(|v| v.get::<MenuId>()) else {
                    continue;
                };
                let Some(keys) = entry
                    .try_child_value(1)
                    .and_then(|v| v.get::<Vec<String>>())
                else {
                    continue;
                };
                let update = PropertyUpdate::from_removed_keys(&keys);
                if mirror.update_existing(id, &update) == ApplyResult::Updated {
                    changed.push(id);
                }
            }
        }

        for id in changed {
            self.item_changed.notify(&id);
        }
    }

    /// Fetch one layer of menu `id` and reconcile the mirror against it.
    ///
    /// Overlapping refreshes for the same id are not deduplicated: each one
    /// completes and reconciles in arrival order, last reply wins. The only
    /// sanctioned coalescing happens in [`UpdateCoalescer`] before this is
    /// called.
    ///
    /// `menu_updated` fires exactly once per call, even when the call fails,
    /// so a popup waiting on a refresh is never left hanging. The one
    /// exception is a reply for a menu that left the mirror while the call
    /// was in flight; that reply is discarded without notification.
    pub fn refresh_menu(self: &Rc<Self>, id: MenuId) {
        let weak = Rc::downgrade(self);
        let args = (id, 1i32, property_filter()).to_variant();
        self.connection.call(
            Some(&self.service),
            &self.path,
            DBUSMENU_INTERFACE,
            "GetLayout",
            Some(&args),
            Some(VariantTy::new("(u(ia{sv}av))").unwrap()),
            gio::DBusCallFlags::NONE,
            DBUS_CALL_TIMEOUT_MS,
            None::<&gio::Cancellable>,
            move |result| {
                let Some(this) = weak.upgrade() else { return };
                match result {
                    Ok(reply) => match parse_layout(&reply) {
                        Some(layout) => {
                            trace!(
                                menu = id,
                                revision = layout.revision,
                                items = layout.children.len(),
                                "layout fetched"
                            );
                            let mut mirror = this.mirror.borrow_mut();
                            if !mirror.contains(id) {
                                debug!(menu = id, "menu left the mirror mid-fetch, reply dropped");
                                return;
                            }
                            reconcile(&mut mirror, id, &layout.children);
                        }
                        None => debug!(menu = id, "malformed GetLayout reply"),
                    },
                    Err(err) => debug!(menu = id, "GetLayout failed: {err}"),
                }
                this.menu_updated.notify(&id);
            },
        );
    }

    /// A popup for menu `id` is about to be shown.
    ///
    /// Sends the legacy "opened" event first, then `AboutToShow`; the menu is
    /// refetched only when the exporter asks for it or when we have nothing
    /// cached. Either way `menu_updated` eventually fires for `id`.
    pub fn request_show(self: &Rc<Self>, id: MenuId) {
        self.mirror.borrow_mut().mark_open(id);
        self.send_event(id, "opened");

        let weak = Rc::downgrade(self);
        self.connection.call(
            Some(&self.service),
            &self.path,
            DBUSMENU_INTERFACE,
            "AboutToShow",
            Some(&(id,).to_variant()),
            Some(VariantTy::new("(b)").unwrap()),
            gio::DBusCallFlags::NONE,
            DBUS_CALL_TIMEOUT_MS,
            None::<&gio::Cancellable>,
            move |result| {
                let Some(this) = weak.upgrade() else { return };
                let need_refresh = match result {
                    Ok(reply) => reply
                        .try_child_value(0)
                        .and_then(|v| v.get::<bool>())
                        .unwrap_or(false),
                    Err(err) => {
                        debug!(menu = id, "AboutToShow failed: {err}");
                        false
                    }
                };
                let empty = this.mirror.borrow().children(id).is_empty();
                if need_refresh || empty {
                    this.coalescer.borrow_mut().note_about_to_show_refresh(id);
                    this.refresh_menu(id);
                } else {
                    this.menu_updated.notify(&id);
                }
            },
        );
    }

    /// A popup for menu `id` closed. Retired items under it become free to
    /// collect.
    pub fn notify_closed(&self, id: MenuId) {
        self.send_event(id, "closed");
        self.mirror.borrow_mut().mark_closed(id);
    }

    /// The user activated leaf item `id`. Fire-and-forget; no layout fetch
    /// happens on this path.
    pub fn activate(&self, id: MenuId) {
        self.send_event(id, "clicked");
    }

    fn send_event(&self, id: MenuId, kind: &str) {
        let timestamp = (glib::real_time() / 1_000) as u32;
        // The event data slot carries an empty string; some exporters reject
        // a bare unit variant here.
        let args = (id, kind, "".to_variant(), timestamp).to_variant();
        self.connection.call(
            Some(&self.service),
            &self.path,
            DBUSMENU_INTERFACE,
            "Event",
            Some(&args),
            None,
            gio::DBusCallFlags::NONE,
            DBUS_CALL_TIMEOUT_MS,
            None::<&gio::Cancellable>,
            move |result| {
                if let Err(err) = result {
                    trace!("menu event delivery failed: {err}");
                }
            },
        );
    }
}

/// Synchronous dbusmenu client for the `inspect` CLI subcommand.
pub struct MenuCli {
    connection: gio::DBusConnection,
}

impl MenuCli {
    pub fn new() -> anyhow::Result<Self> {
        let connection = gio::bus_get_sync(gio::BusType::Session, None::<&gio::Cancellable>)?;
        Ok(Self { connection })
    }

    /// Fetch the full tree from an exporter and print it, one line per item.
    pub fn inspect(&self, service: &str, path: &str) -> anyhow::Result<()> {
        let args = (ROOT_ID, -1i32, property_filter()).to_variant();
        let reply = self.connection.call_sync(
            Some(service),
            path,
            DBUSMENU_INTERFACE,
            "GetLayout",
            Some(&args),
            Some(VariantTy::new("(u(ia{sv}av))").unwrap()),
            gio::DBusCallFlags::NONE,
            DBUS_CALL_TIMEOUT_MS,
            None::<&gio::Cancellable>,
        )?;

        let revision = reply
            .try_child_value(0)
            .and_then(|v| v.get::<u32>())
            .unwrap_or(0);
        println!("{service} {path} (revision {revision})");

        let Some(root) = reply.try_child_value(1) else {
            anyhow::bail!("malformed GetLayout reply from {service}");
        };
        Self::print_node(&root, 0);
        Ok(())
    }

    fn print_node(node: &Variant, depth: usize) {
        let id = node
            .try_child_value(0)
            .and_then(|v| v.get::<MenuId>())
            .unwrap_or(ROOT_ID);
        let properties = node
            .try_child_value(1)
            .and_then(|v| v.get::<HashMap<String, Variant>>())
            .unwrap_or_default();
        let update = PropertyUpdate::from_variant_map(&properties);

        if depth > 0 {
            let indent = "  ".repeat(depth);
            let label = update
                .label
                .as_deref()
                .map(super::types::strip_mnemonic)
                .unwrap_or_default();
            let mut flags = Vec::new();
            if update.kind == Some(super::types::ItemKind::Separator) {
                flags.push("separator");
            }
            if update.has_submenu == Some(true) {
                flags.push("submenu");
            }
            if update.enabled == Some(false) {
                flags.push("disabled");
            }
            if update.visible == Some(false) {
                flags.push("hidden");
            }
            let suffix = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };
            println!("{indent}{id}: {label}{suffix}");
        }

        if let Some(children) = node.try_child_value(2) {
            for boxed in children.iter() {
                if let Some(child) = boxed.as_variant() {
                    Self::print_node(&child, depth + 1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod coalescer {
        use super::*;

        #[test]
        fn test_first_update_arms_timer_once() {
            let mut coalescer = UpdateCoalescer::default();
            assert!(coalescer.note_layout_updated(1));
            assert!(!coalescer.note_layout_updated(2));
            assert!(!coalescer.note_layout_updated(1));
            assert_eq!(coalescer.take_pending(), vec![1, 2]);
        }

        #[test]
        fn test_timer_rearms_after_drain() {
            let mut coalescer = UpdateCoalescer::default();
            assert!(coalescer.note_layout_updated(1));
            coalescer.take_pending();
            assert!(coalescer.note_layout_updated(1));
            assert_eq!(coalescer.take_pending(), vec![1]);
        }

        #[test]
        fn test_about_to_show_echo_suppressed_once() {
            let mut coalescer = UpdateCoalescer::default();
            coalescer.note_about_to_show_refresh(7);

            // The exporter's echo of our own refresh is dropped...
            assert!(!coalescer.note_layout_updated(7));
            assert!(coalescer.take_pending().is_empty());

            // ...but a later genuine update for the same id goes through.
            assert!(coalescer.note_layout_updated(7));
            assert_eq!(coalescer.take_pending(), vec![7]);
        }

        #[test]
        fn test_suppression_is_per_id() {
            let mut coalescer = UpdateCoalescer::default();
            coalescer.note_about_to_show_refresh(7);
            assert!(coalescer.note_layout_updated(8));
            assert_eq!(coalescer.take_pending(), vec![8]);
        }
    }

    mod layout {
        use super::*;
        use gtk4::glib::prelude::*;

        fn node(id: MenuId, properties: &[(&str, Variant)], children: Vec<Variant>) -> Variant {
            let map: HashMap<String, Variant> = properties
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect();
            (id, map, children).to_variant()
        }

        fn reply(revision: u32, root_children: Vec<Variant>) -> Variant {
            (revision, node(ROOT_ID, &[], root_children)).to_variant()
        }

        #[test]
        fn test_parse_layout_one_layer() {
            let reply = reply(
                3,
                vec![
                    node(1, &[("label", "_File".to_variant())], vec![]),
                    node(2, &[("type", "separator".to_variant())], vec![]),
                ],
            );

            let parsed = parse_layout(&reply).unwrap();
            assert_eq!(parsed.revision, 3);
            assert_eq!(parsed.children.len(), 2);
            assert_eq!(parsed.children[0].0, 1);
            assert_eq!(parsed.children[0].1.label.as_deref(), Some("_File"));
            assert_eq!(
                parsed.children[1].1.kind,
                Some(crate::services::menu::types::ItemKind::Separator)
            );
        }

        #[test]
        fn test_parse_layout_rejects_wrong_shape() {
            assert!(parse_layout(&"nonsense".to_variant()).is_none());
        }

        #[test]
        fn test_reconcile_removes_and_reorders() {
            let mut mirror = ActionMirror::new();
            let first = parse_layout(&reply(
                1,
                vec![
                    node(1, &[("label", "A".to_variant())], vec![]),
                    node(2, &[("label", "B".to_variant())], vec![]),
                    node(3, &[("label", "C".to_variant())], vec![]),
                ],
            ))
            .unwrap();
            assert!(reconcile(&mut mirror, ROOT_ID, &first.children));
            assert_eq!(mirror.children(ROOT_ID), &[1, 2, 3]);

            // Remote drops 2 and swaps the rest
            let second = parse_layout(&reply(
                2,
                vec![
                    node(3, &[("label", "C".to_variant())], vec![]),
                    node(1, &[("label", "A".to_variant())], vec![]),
                ],
            ))
            .unwrap();
            assert!(reconcile(&mut mirror, ROOT_ID, &second.children));
            assert_eq!(mirror.children(ROOT_ID), &[3, 1]);
            assert!(!mirror.contains(2));
        }

        #[test]
        fn test_reconcile_unknown_parent_is_dropped() {
            let mut mirror = ActionMirror::new();
            let layout = parse_layout(&reply(
                1,
                vec![node(50, &[("label", "Orphan".to_variant())], vec![])],
            ))
            .unwrap();

            assert!(!reconcile(&mut mirror, 5, &layout.children));
            assert!(!mirror.contains(50), "no orphan node may be created");
            assert!(mirror.children(5).is_empty());
        }

        #[test]
        fn test_overlapping_replies_reconcile_in_arrival_order() {
            // Two refreshes for the same menu may be in flight at once; both
            // replies apply, the later one wins.
            let mut mirror = ActionMirror::new();
            let first = parse_layout(&reply(
                1,
                vec![node(1, &[("label", "Old".to_variant())], vec![])],
            ))
            .unwrap();
            let second = parse_layout(&reply(
                2,
                vec![
                    node(1, &[("label", "New".to_variant())], vec![]),
                    node(2, &[("label", "Extra".to_variant())], vec![]),
                ],
            ))
            .unwrap();

            assert!(reconcile(&mut mirror, ROOT_ID, &first.children));
            assert!(reconcile(&mut mirror, ROOT_ID, &second.children));
            assert_eq!(mirror.children(ROOT_ID), &[1, 2]);
            assert_eq!(mirror.item(1).unwrap().label, "New");
        }

        #[test]
        fn test_reconcile_identical_layer_reports_no_change() {
            let mut mirror = ActionMirror::new();
            let layout = parse_layout(&reply(
                1,
                vec![node(1, &[("label", "A".to_variant())], vec![])],
            ))
            .unwrap();
            assert!(reconcile(&mut mirror, ROOT_ID, &layout.children));
            assert!(!reconcile(&mut mirror, ROOT_ID, &layout.children));
        }
    }
}
