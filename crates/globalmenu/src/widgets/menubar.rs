//! Menu bar widget backed by the AppMenuService.
//!
//! Displays the active window's top-level menus as a row of buttons. Each
//! button opens a popup that navigates the remote menu tree in place: a
//! submenu entry pushes a level onto the popup's stack, a back row pops it.
//! In compact mode the whole bar collapses into a single root button whose
//! popup starts at the remote root.
//!
//! Popup lifecycle drives the dbusmenu session: opening a level calls
//! `request_show`, closing it calls `notify_closed`, and clicking a leaf
//! sends its activation without any layout fetch.

use std::cell::RefCell;
use std::rc::Rc;

use gtk4::prelude::*;
use gtk4::{
    Box as GtkBox, Button, EventControllerKey, Image, Label, Orientation, Popover, Separator,
    Widget, gdk, glib,
};
use tracing::debug;

use crate::services::appmenu::{AppMenuService, ModelEvent, RowAction};
use crate::services::callbacks::CallbackId;
use crate::services::config_manager::ConfigManager;
use crate::services::menu::types::{IconSource, ItemKind, ToggleKind};
use crate::services::menu::{MenuId, ROOT_ID};
use crate::services::wm::WmManager;
use crate::styles::{button as btn, menu, surface};
use crate::widgets::base::{BaseWidget, MenuHandle, configure_popover};

const COMPACT_LABEL: &str = "Menu";

/// One open (non-compact) popup: the popover, which top-level row owns it,
/// and the navigation stack of menu ids, root-most first.
struct PopupState {
    popover: Popover,
    row_index: usize,
    stack: Rc<RefCell<Vec<MenuId>>>,
}

struct WidgetState {
    compact: bool,
    /// Top-level buttons, index-aligned with the service's row list.
    buttons: Vec<Button>,
    popup: Option<PopupState>,
    /// Compact-mode navigation stack, shared with the MenuHandle builder.
    compact_stack: Rc<RefCell<Vec<MenuId>>>,
    compact_menu: Option<Rc<MenuHandle>>,
}

/// Menu bar widget displaying the active window's menus.
pub struct MenuBarWidget {
    base: BaseWidget,
    state: Rc<RefCell<WidgetState>>,
    model_cb: Option<CallbackId>,
    activate_cb: Option<CallbackId>,
    submenu_cb: Option<CallbackId>,
    wm_cb: Option<CallbackId>,
}

impl MenuBarWidget {
    pub fn new() -> Self {
        let compact = ConfigManager::global().compact();
        let base = BaseWidget::new(&[menu::BAR]);

        let state = Rc::new(RefCell::new(WidgetState {
            compact,
            buttons: Vec::new(),
            popup: None,
            compact_stack: Rc::new(RefCell::new(Vec::new())),
            compact_menu: None,
        }));

        if compact {
            setup_compact(&base, &state);
        }

        let mut widget = Self {
            base,
            state,
            model_cb: None,
            activate_cb: None,
            submenu_cb: None,
            wm_cb: None,
        };
        widget.bind_service();
        widget
    }

    /// Get the root GTK widget.
    pub fn widget(&self) -> &GtkBox {
        self.base.widget()
    }

    fn bind_service(&mut self) {
        let service = AppMenuService::global();

        {
            let state = self.state.clone();
            let content = self.base.content().clone();
            let root = self.base.widget().clone();
            self.model_cb = Some(service.model_events.register(move |event| {
                let event = *event;
                let state = state.clone();
                let content = content.clone();
                let root = root.clone();
                glib::idle_add_local_once(move || match event {
                    ModelEvent::Reset => sync_rows(&state, &content, &root),
                    ModelEvent::RowChanged(index) => update_row(&state, index),
                });
            }));
        }

        {
            let state = self.state.clone();
            self.activate_cb = Some(service.activate_requests.register(move |index| {
                let index = *index;
                let state = state.clone();
                glib::idle_add_local_once(move || {
                    debug!("remote activation request for row {index}");
                    open_row(&state, index);
                });
            }));
        }

        {
            let state = self.state.clone();
            self.submenu_cb = Some(service.submenu_updated.register(move |id| {
                refresh_open_level(&state, *id);
            }));
        }

        // Pure visibility flips (window minimized, moved out of bounds) come
        // from discovery without a model event.
        {
            let state = self.state.clone();
            let root = self.base.widget().clone();
            self.wm_cb = Some(WmManager::global().register_menu_callback(move |update| {
                let visible = update.visible;
                let state = state.clone();
                let root = root.clone();
                glib::idle_add_local_once(move || {
                    let service = AppMenuService::global();
                    root.set_visible(service.is_available() && visible);
                    if !visible {
                        close_popup(&state);
                    }
                });
            }));
        }

        // Initial sync
        {
            let state = self.state.clone();
            let content = self.base.content().clone();
            let root = self.base.widget().clone();
            glib::idle_add_local_once(move || {
                sync_rows(&state, &content, &root);
            });
        }
    }
}

impl Default for MenuBarWidget {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MenuBarWidget {
    fn drop(&mut self) {
        let service = AppMenuService::global();
        if let Some(id) = self.model_cb {
            service.model_events.unregister(id);
        }
        if let Some(id) = self.activate_cb {
            service.activate_requests.unregister(id);
        }
        if let Some(id) = self.submenu_cb {
            service.submenu_updated.unregister(id);
        }
        if let Some(id) = self.wm_cb {
            WmManager::global().unregister_menu_callback(id);
        }
    }
}

/// Compact mode: a single root button whose popup starts at the remote root.
fn setup_compact(base: &BaseWidget, state: &Rc<RefCell<WidgetState>>) {
    base.add_label(Some(COMPACT_LABEL), &[menu::COMPACT_BUTTON]);

    let stack = state.borrow().compact_stack.clone();
    let state_for_builder = state.clone();
    let handle = base.create_menu("root", move || {
        let rerender = compact_rerender(&state_for_builder);
        let close = compact_close(&state_for_builder);
        build_level(&stack, &rerender, &close).upcast::<Widget>()
    });

    // Opening the popup is a fresh session from the root
    let stack = state.borrow().compact_stack.clone();
    handle.connect_opening(move || {
        *stack.borrow_mut() = vec![ROOT_ID];
        AppMenuService::global().request_show(ROOT_ID);
    });

    let stack = state.borrow().compact_stack.clone();
    handle.connect_closed(move || {
        let ids: Vec<MenuId> = stack.borrow_mut().drain(..).collect();
        let service = AppMenuService::global();
        for id in ids.into_iter().rev() {
            service.notify_closed(id);
        }
    });

    state.borrow_mut().compact_menu = Some(handle);
}

fn compact_rerender(state: &Rc<RefCell<WidgetState>>) -> Rc<dyn Fn()> {
    let state = state.clone();
    Rc::new(move || {
        if let Some(handle) = state.borrow().compact_menu.clone() {
            handle.refresh_if_visible();
        }
    })
}

fn compact_close(state: &Rc<RefCell<WidgetState>>) -> Rc<dyn Fn()> {
    let state = state.clone();
    Rc::new(move || {
        if let Some(handle) = state.borrow().compact_menu.clone() {
            handle.hide();
        }
    })
}

/// Rebuild the top-level button row from the service's row list.
fn sync_rows(state: &Rc<RefCell<WidgetState>>, content: &GtkBox, root: &GtkBox) {
    let service = AppMenuService::global();
    root.set_visible(service.is_available() && service.is_visible());

    if state.borrow().compact {
        // The single root button never changes; an open popup may need a
        // refresh if the level it shows was rebuilt.
        let rerender = compact_rerender(state);
        rerender();
        return;
    }

    // The open popup is parented to a button that may be about to go away
    close_popup(state);

    let old_buttons: Vec<Button> = std::mem::take(&mut state.borrow_mut().buttons);
    for button in old_buttons {
        content.remove(&button);
    }

    let count = service.row_count();
    let mut buttons = Vec::with_capacity(count);
    for index in 0..count {
        let label = service.row_label(index).unwrap_or_default();
        let button = create_row_button(state, index, &label);
        button.set_visible(row_shown(&service, index));
        content.append(&button);
        buttons.push(button);
    }
    state.borrow_mut().buttons = buttons;

    debug!("menu bar rebuilt with {count} row(s)");
}

/// Whether a row gets a visible button. Separators and hidden items keep
/// their index in the row list but never render on the bar.
fn row_shown(service: &AppMenuService, index: usize) -> bool {
    service
        .row_id(index)
        .and_then(|id| service.item(id))
        .is_some_and(|item| item.visible && item.kind == ItemKind::Standard)
}

fn update_row(state: &Rc<RefCell<WidgetState>>, index: usize) {
    let service = AppMenuService::global();
    let st = state.borrow();
    if let (Some(button), Some(label)) = (st.buttons.get(index), service.row_label(index)) {
        if let Some(child) = button.child().and_then(|c| c.downcast::<Label>().ok()) {
            child.set_text(&label);
        }
        let enabled = service
            .row_id(index)
            .and_then(|id| service.item(id))
            .is_some_and(|item| item.enabled);
        button.set_sensitive(enabled);
        button.set_visible(row_shown(&service, index));
    }
}

fn create_row_button(state: &Rc<RefCell<WidgetState>>, index: usize, text: &str) -> Button {
    let button = Button::new();
    button.set_has_frame(false);
    button.set_focusable(false);
    button.set_focus_on_click(false);
    button.add_css_class(menu::BAR_BUTTON);
    button.add_css_class(btn::COMPACT);

    let label = Label::new(Some(text));
    button.set_child(Some(&label));

    let state_for_click = state.clone();
    button.connect_clicked(move |_| {
        toggle_row(&state_for_click, index);
    });

    button
}

/// Toggle the popup for a top-level row: close it if it's the one open,
/// otherwise open it (closing any other).
fn toggle_row(state: &Rc<RefCell<WidgetState>>, index: usize) {
    let was_open = state
        .borrow()
        .popup
        .as_ref()
        .is_some_and(|popup| popup.row_index == index);
    if was_open {
        close_popup(state);
        return;
    }
    open_row(state, index);
}

fn open_row(state: &Rc<RefCell<WidgetState>>, index: usize) {
    close_popup(state);

    let service = AppMenuService::global();
    let menu_id = match service.activate_row(index) {
        Some(RowAction::Submenu(id)) => id,
        // Leaf or stale index: the clicked event (if any) is already sent
        Some(RowAction::Triggered) | None => return,
    };

    let button = match state.borrow().buttons.get(index) {
        Some(button) => button.clone(),
        None => return,
    };

    service.request_show(menu_id);

    let popover = Popover::new();
    popover.set_parent(&button);
    popover.set_can_focus(false);
    configure_popover(&popover);

    let stack = Rc::new(RefCell::new(vec![menu_id]));
    let rerender = popup_rerender(state);
    let close = popup_closer(state);
    popover.set_child(Some(&build_level(&stack, &rerender, &close)));

    attach_key_navigation(&popover, state, &stack);

    button.add_css_class(menu::BAR_BUTTON_OPEN);

    // Click-away and Escape close the popover without going through
    // close_popup; settle the session from the closed signal instead.
    let state_for_close = state.clone();
    let button_for_close = button.clone();
    popover.connect_closed(move |p| {
        let stack = {
            let mut st = state_for_close.borrow_mut();
            match st.popup.take() {
                Some(popup) => popup.stack,
                None => return,
            }
        };
        button_for_close.remove_css_class(menu::BAR_BUTTON_OPEN);
        let ids: Vec<MenuId> = stack.borrow_mut().drain(..).collect();
        let service = AppMenuService::global();
        for id in ids.into_iter().rev() {
            service.notify_closed(id);
        }
        if p.parent().is_some() {
            p.unparent();
        }
    });

    state.borrow_mut().popup = Some(PopupState {
        popover: popover.clone(),
        row_index: index,
        stack,
    });

    popover.popup();
}

fn close_popup(state: &Rc<RefCell<WidgetState>>) {
    // Clear state before popdown to avoid borrow conflict in closed signal
    let popover = {
        let mut st = state.borrow_mut();
        match st.popup.take() {
            Some(popup) => {
                // connect_closed already ran or will run without state; send
                // the closed events here since the state entry is gone.
                let ids: Vec<MenuId> = popup.stack.borrow_mut().drain(..).collect();
                let service = AppMenuService::global();
                drop(st);
                for id in ids.into_iter().rev() {
                    service.notify_closed(id);
                }
                popup.popover
            }
            None => return,
        }
    };
    if let Some(parent) = popover.parent() {
        if let Some(button) = parent.downcast_ref::<Button>() {
            button.remove_css_class(menu::BAR_BUTTON_OPEN);
        }
        popover.popdown();
        popover.unparent();
    }
}

fn popup_rerender(state: &Rc<RefCell<WidgetState>>) -> Rc<dyn Fn()> {
    let state = state.clone();
    Rc::new(move || {
        let (popover, stack) = {
            let st = state.borrow();
            match &st.popup {
                Some(popup) => (popup.popover.clone(), popup.stack.clone()),
                None => return,
            }
        };
        let rerender = popup_rerender(&state);
        let close = popup_closer(&state);
        popover.set_child(Some(&build_level(&stack, &rerender, &close)));
    })
}

fn popup_closer(state: &Rc<RefCell<WidgetState>>) -> Rc<dyn Fn()> {
    let state = state.clone();
    Rc::new(move || close_popup(&state))
}

/// An open popup showing `id` on top of its stack picks up a layout refresh.
fn refresh_open_level(state: &Rc<RefCell<WidgetState>>, id: MenuId) {
    let (compact, on_top) = {
        let st = state.borrow();
        let stack = if st.compact {
            st.compact_stack.clone()
        } else {
            match &st.popup {
                Some(popup) => popup.stack.clone(),
                None => return,
            }
        };
        let on_top = stack.borrow().last() == Some(&id);
        (st.compact, on_top)
    };
    if !on_top {
        return;
    }
    let rerender = if compact {
        compact_rerender(state)
    } else {
        popup_rerender(state)
    };
    rerender();
}

/// Left/Right at the top popup level move to the adjacent top-level menu;
/// Left inside a submenu goes back one level.
fn attach_key_navigation(
    popover: &Popover,
    state: &Rc<RefCell<WidgetState>>,
    stack: &Rc<RefCell<Vec<MenuId>>>,
) {
    let keys = EventControllerKey::new();
    let state = state.clone();
    let stack = stack.clone();
    keys.connect_key_pressed(move |_, keyval, _, _| {
        let current = match state.borrow().popup.as_ref() {
            Some(popup) => popup.row_index,
            None => return glib::Propagation::Proceed,
        };
        match keyval {
            gdk::Key::Left => {
                if stack.borrow().len() > 1 {
                    pop_level(&state, &stack);
                } else if let Some(target) = adjacent_shown_row(current, false) {
                    open_row(&state, target);
                }
                glib::Propagation::Stop
            }
            gdk::Key::Right if stack.borrow().len() == 1 => {
                if let Some(target) = adjacent_shown_row(current, true) {
                    open_row(&state, target);
                }
                glib::Propagation::Stop
            }
            _ => glib::Propagation::Proceed,
        }
    });
    popover.add_controller(keys);
}

/// Nearest shown row next to `current` in the given direction; `None` at
/// the edge of the bar.
fn adjacent_shown_row(current: usize, forward: bool) -> Option<usize> {
    let service = AppMenuService::global();
    let count = service.row_count();
    let mut index = current;
    loop {
        index = if forward {
            if index + 1 >= count {
                return None;
            }
            index + 1
        } else {
            if index == 0 {
                return None;
            }
            index - 1
        };
        if row_shown(&service, index) {
            return Some(index);
        }
    }
}

fn pop_level(state: &Rc<RefCell<WidgetState>>, stack: &Rc<RefCell<Vec<MenuId>>>) {
    let popped = stack.borrow_mut().pop();
    if let Some(id) = popped {
        AppMenuService::global().notify_closed(id);
    }
    popup_rerender(state)();
}

/// Build the entry list for the menu id on top of `stack`.
///
/// `rerender` rebuilds the owning popup's content after the stack changes;
/// `close` dismisses the popup after a leaf activation.
fn build_level(
    stack: &Rc<RefCell<Vec<MenuId>>>,
    rerender: &Rc<dyn Fn()>,
    close: &Rc<dyn Fn()>,
) -> GtkBox {
    let container = GtkBox::new(Orientation::Vertical, 0);
    container.add_css_class(menu::POPUP);
    container.add_css_class(surface::POPOVER);

    let service = AppMenuService::global();
    let Some(&current) = stack.borrow().last() else {
        return container;
    };

    if stack.borrow().len() > 1 {
        let back = create_back_row(stack, rerender);
        container.append(&back);
        container.append(&Separator::new(Orientation::Horizontal));
    }

    for child in service.children_of(current) {
        let Some(item) = service.item(child) else {
            continue;
        };
        if !item.visible {
            continue;
        }
        if item.kind == ItemKind::Separator {
            let separator = Separator::new(Orientation::Horizontal);
            separator.add_css_class(menu::SEPARATOR);
            container.append(&separator);
            continue;
        }

        let entry = create_entry(child, &item, stack, rerender, close);
        container.append(&entry);
    }

    container
}

fn create_back_row(stack: &Rc<RefCell<Vec<MenuId>>>, rerender: &Rc<dyn Fn()>) -> Button {
    let service = AppMenuService::global();
    let title = stack
        .borrow()
        .last()
        .and_then(|&id| service.item(id))
        .map(|item| item.display_label())
        .unwrap_or_default();

    let button = Button::new();
    button.set_has_frame(false);
    button.add_css_class(menu::ENTRY);
    button.add_css_class(menu::BACK);

    let row = GtkBox::new(Orientation::Horizontal, 6);
    let chevron = Image::from_icon_name("go-previous-symbolic");
    chevron.add_css_class(menu::ENTRY_CHEVRON);
    row.append(&chevron);
    let label = Label::new(Some(&title));
    label.add_css_class(menu::ENTRY_LABEL);
    row.append(&label);
    button.set_child(Some(&row));

    let stack = stack.clone();
    let rerender = rerender.clone();
    button.connect_clicked(move |_| {
        let popped = stack.borrow_mut().pop();
        if let Some(id) = popped {
            AppMenuService::global().notify_closed(id);
        }
        rerender();
    });

    button
}

fn create_entry(
    id: MenuId,
    item: &crate::services::menu::mirror::MenuItem,
    stack: &Rc<RefCell<Vec<MenuId>>>,
    rerender: &Rc<dyn Fn()>,
    close: &Rc<dyn Fn()>,
) -> Button {
    let button = Button::new();
    button.set_has_frame(false);
    button.add_css_class(menu::ENTRY);
    button.set_sensitive(item.enabled);

    let row = GtkBox::new(Orientation::Horizontal, 6);

    if item.toggle_kind != ToggleKind::None {
        let mark = match (item.toggle_kind, item.toggle_state) {
            (ToggleKind::Checkmark, Some(true)) => "✓",
            (ToggleKind::Radio, Some(true)) => "•",
            _ => "",
        };
        let toggle = Label::new(Some(mark));
        toggle.add_css_class(menu::ENTRY_TOGGLE);
        toggle.set_width_chars(1);
        row.append(&toggle);
    }

    if let Some(image) = entry_icon(&item.icon) {
        row.append(&image);
    }

    let label = Label::new(Some(&item.display_label()));
    label.add_css_class(menu::ENTRY_LABEL);
    label.set_halign(gtk4::Align::Start);
    label.set_hexpand(true);
    row.append(&label);

    if let Some(shortcut) = &item.shortcut {
        let hint = Label::new(Some(&shortcut.display()));
        hint.add_css_class(menu::ENTRY_SHORTCUT);
        hint.set_halign(gtk4::Align::End);
        row.append(&hint);
    }

    if item.has_submenu {
        let chevron = Image::from_icon_name("go-next-symbolic");
        chevron.add_css_class(menu::ENTRY_CHEVRON);
        row.append(&chevron);
    }

    button.set_child(Some(&row));

    let has_submenu = item.has_submenu;
    let stack = stack.clone();
    let rerender = rerender.clone();
    let close = close.clone();
    button.connect_clicked(move |_| {
        let service = AppMenuService::global();
        if has_submenu {
            service.request_show(id);
            stack.borrow_mut().push(id);
            rerender();
        } else {
            service.activate_item(id);
            close();
        }
    });

    button
}

fn entry_icon(icon: &IconSource) -> Option<Image> {
    let image = match icon {
        IconSource::None => return None,
        IconSource::Named(name) => Image::from_icon_name(name),
        IconSource::Data { bytes, .. } => {
            let gbytes = glib::Bytes::from(bytes.as_slice());
            let texture = gdk::Texture::from_bytes(&gbytes).ok()?;
            Image::from_paintable(Some(&texture))
        }
    };
    Some(image)
}
