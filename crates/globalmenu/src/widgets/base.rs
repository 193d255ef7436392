//! Shared base widget abstraction.
//!
//! Provides a thin, reusable wrapper around a root `gtk4::Box` with
//! common CSS classes and a popover handle for menus.

use gtk4::prelude::*;
use gtk4::{Align, Box as GtkBox, GestureClick, Label, Orientation, Popover, PositionType};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

use crate::services::config_manager::ConfigManager;
use crate::styles::{class, surface};

/// Minimum distance from screen edge before switching alignment (in pixels).
const EDGE_MARGIN: i32 = 8;

/// Configure a popover with standard settings used across the application.
///
/// This applies:
/// - No arrow
/// - Autohide enabled
/// - `widget-menu` CSS class
/// - Bottom position
/// - Center alignment (adjusted dynamically when shown)
/// - Configurable vertical offset (from `bar.popover_offset`)
pub fn configure_popover(popover: &Popover) {
    popover.set_has_arrow(false);
    popover.set_autohide(true);
    popover.add_css_class(surface::WIDGET_MENU);
    popover.set_position(PositionType::Bottom);
    popover.set_halign(Align::Center);

    let offset = ConfigManager::global().popover_offset() as i32;
    popover.set_offset(0, offset);
}

/// Get widget position and monitor width for smart popover positioning.
///
/// Returns (widget_x, widget_width, monitor_width) or None if unavailable.
fn get_widget_and_monitor_info(widget: &gtk4::Widget) -> Option<(i32, i32, i32)> {
    let native = widget.native()?;
    let bounds = widget.compute_bounds(&native)?;

    let widget_x = bounds.x() as i32;
    let widget_width = bounds.width() as i32;

    let root = widget.root()?;
    let window = root.downcast_ref::<gtk4::Window>()?;
    let surface = window.surface()?;
    let display = gtk4::gdk::Display::default()?;
    let monitor = display.monitor_at_surface(&surface)?;
    let monitor_width = monitor.geometry().width();

    Some((widget_x, widget_width, monitor_width))
}

/// Calculate smart horizontal alignment for a popover based on screen position.
///
/// - Centers the popover if it fits
/// - Aligns to left edge if too close to left side of screen
/// - Aligns to right edge if too close to right side of screen
fn calculate_smart_alignment(
    widget_x: i32,
    widget_width: i32,
    popover_width: i32,
    monitor_width: i32,
) -> Align {
    let widget_center_x = widget_x + widget_width / 2;
    let half_popover = popover_width / 2;

    let popover_left = widget_center_x - half_popover;
    let popover_right = widget_center_x + half_popover;

    if popover_left < EDGE_MARGIN {
        Align::Start
    } else if popover_right > monitor_width - EDGE_MARGIN {
        Align::End
    } else {
        Align::Center
    }
}

/// Handle for managing a widget menu popover.
pub struct MenuHandle {
    popover: Popover,
    builder: Rc<dyn Fn() -> gtk4::Widget>,
    parent: GtkBox,
    on_show: RefCell<Option<Box<dyn Fn()>>>,
}

impl MenuHandle {
    fn new(popover: Popover, builder: Rc<dyn Fn() -> gtk4::Widget>, parent: GtkBox) -> Self {
        Self {
            popover,
            builder,
            parent,
            on_show: RefCell::new(None),
        }
    }

    /// Build or rebuild the popover content.
    ///
    /// On the first call, this creates the content widget and attaches it to
    /// the popover. On subsequent calls it rebuilds the content in place so
    /// dynamic levels stay fresh.
    ///
    /// Returns the content widget's preferred width for positioning.
    fn refresh_content(&self) -> i32 {
        let content = (self.builder)();
        content.add_css_class(surface::WIDGET_MENU_CONTENT);
        content.add_css_class(surface::POPOVER);

        self.popover.set_child(Some(&content));

        let (_, natural_width, _, _) = content.measure(Orientation::Horizontal, -1);
        natural_width
    }

    /// Apply smart positioning based on widget location on screen.
    fn apply_smart_positioning(&self, popover_width: i32) {
        let Some((widget_x, widget_width, monitor_width)) =
            get_widget_and_monitor_info(self.parent.upcast_ref())
        else {
            // Fallback to end alignment if we can't determine position
            self.popover.set_halign(Align::End);
            return;
        };

        let alignment =
            calculate_smart_alignment(widget_x, widget_width, popover_width, monitor_width);

        debug!(
            "Smart popover positioning: widget_x={}, widget_width={}, popover_width={}, monitor_width={}, alignment={:?}",
            widget_x, widget_width, popover_width, monitor_width, alignment
        );

        self.popover.set_halign(alignment);
    }

    pub fn show(&self) {
        if let Some(hook) = &*self.on_show.borrow() {
            hook();
        }

        // Update popover offset from config (enables hot reload)
        let offset = ConfigManager::global().popover_offset() as i32;
        self.popover.set_offset(0, offset);

        // Rebuild content on each show so that it always reflects the
        // latest mirror state, even if things changed while the menu was
        // closed.
        let popover_width = self.refresh_content();
        self.apply_smart_positioning(popover_width);
        self.popover.popup();
    }

    pub fn hide(&self) {
        self.popover.popdown();
    }

    pub fn toggle(&self) {
        // Use get_visible() instead of is_visible() to avoid ancestry checks
        if self.popover.get_visible() {
            self.hide();
        } else {
            self.show();
        }
    }

    /// Refresh the popover content if it's currently visible.
    ///
    /// This is how open popups pick up layout updates that arrive while
    /// they're on screen.
    pub fn refresh_if_visible(&self) {
        if self.popover.get_visible() {
            let popover_width = self.refresh_content();
            self.apply_smart_positioning(popover_width);
        }
    }

    /// Run `handler` just before the popover content is (re)built on show.
    pub fn connect_opening<F>(&self, handler: F)
    where
        F: Fn() + 'static,
    {
        *self.on_show.borrow_mut() = Some(Box::new(handler));
    }

    /// Run `handler` when the popover closes for any reason (click-away,
    /// Escape, explicit popdown).
    pub fn connect_closed<F>(&self, handler: F)
    where
        F: Fn() + 'static,
    {
        self.popover.connect_closed(move |_| handler());
    }
}

/// Shared base widget container.
///
/// Each widget owns a `BaseWidget` instance and exposes the underlying
/// `gtk4::Box` as its root widget.
///
/// The BaseWidget automatically creates an inner `.content` box for consistent
/// padding and theming. Widgets should add their children to `content()`
/// rather than `widget()` directly.
pub struct BaseWidget {
    container: GtkBox,
    content: GtkBox,
    menus: Rc<RefCell<HashMap<String, Rc<MenuHandle>>>>,
    _gesture_click: GestureClick,
}

impl BaseWidget {
    /// Create a new base widget container.
    ///
    /// - Uses a horizontal box with zero internal spacing.
    /// - Always adds the `widget` CSS class.
    /// - Creates an inner `.content` box for consistent padding/margins.
    /// - Applies any additional CSS classes passed in `extra_classes`.
    pub fn new(extra_classes: &[&str]) -> Self {
        let container = GtkBox::new(Orientation::Horizontal, 0);
        container.add_css_class(class::WIDGET);
        container.set_hexpand(false);
        for cls in extra_classes {
            container.add_css_class(cls);
        }

        let content = GtkBox::new(Orientation::Horizontal, 0);
        content.add_css_class(class::CONTENT);
        // Fill the widget height so children can be properly centered within
        content.set_vexpand(true);
        content.set_valign(Align::Fill);
        // Disable baseline alignment - it can cause vertical offset issues with text
        content.set_baseline_position(gtk4::BaselinePosition::Center);
        container.append(&content);

        let menus: Rc<RefCell<HashMap<String, Rc<MenuHandle>>>> =
            Rc::new(RefCell::new(HashMap::new()));

        let gesture_click = GestureClick::new();
        {
            let menus_for_cb = menus.clone();
            gesture_click.connect_pressed(move |gesture, n_press, x, y| {
                // Clicks on buttons belong to the button, not the widget menu
                if let Some(widget) = gesture.widget()
                    && let Some(target) = widget.pick(x, y, gtk4::PickFlags::DEFAULT)
                {
                    let mut current: Option<gtk4::Widget> = Some(target);
                    while let Some(w) = current {
                        if w.downcast_ref::<gtk4::Button>().is_some() {
                            return;
                        }
                        current = w.parent();
                    }
                }

                if n_press == 1 && gesture.current_button() == 1 {
                    if let Some((_name, menu)) = menus_for_cb.borrow().iter().next() {
                        menu.toggle();
                    }
                }
            });
        }

        container.add_controller(gesture_click.clone());

        Self {
            container,
            content,
            menus,
            _gesture_click: gesture_click,
        }
    }

    /// Get the root GTK container for this widget.
    pub fn widget(&self) -> &GtkBox {
        &self.container
    }

    /// Get the inner content box for adding widget children.
    pub fn content(&self) -> &GtkBox {
        &self.content
    }

    /// Create a label and append it to the content box.
    pub fn add_label(&self, text: Option<&str>, css_classes: &[&str]) -> Label {
        let label = Label::new(text);
        for class in css_classes {
            label.add_css_class(class);
        }
        self.content.append(&label);
        label
    }

    /// Create a menu popover parented to this widget.
    pub fn create_menu<F>(&self, name: &str, builder: F) -> Rc<MenuHandle>
    where
        F: Fn() -> gtk4::Widget + 'static,
    {
        let popover = Popover::new();
        popover.set_parent(&self.container);
        configure_popover(&popover);

        let builder_rc: Rc<dyn Fn() -> gtk4::Widget> = Rc::new(builder);
        let handle = Rc::new(MenuHandle::new(
            popover,
            builder_rc,
            self.container.clone(),
        ));
        self.menus
            .borrow_mut()
            .insert(name.to_string(), handle.clone());
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_centers_when_room() {
        // Widget in the middle of a 1920px monitor, 200px popover
        assert_eq!(calculate_smart_alignment(900, 80, 200, 1920), Align::Center);
    }

    #[test]
    fn alignment_snaps_to_left_edge() {
        // Popover would start at -60px
        assert_eq!(calculate_smart_alignment(0, 80, 200, 1920), Align::Start);
    }

    #[test]
    fn alignment_snaps_to_right_edge() {
        assert_eq!(calculate_smart_alignment(1850, 60, 200, 1920), Align::End);
    }

    #[test]
    fn alignment_respects_edge_margin() {
        // Fits geometrically but within EDGE_MARGIN of the left edge
        assert_eq!(calculate_smart_alignment(60, 20, 130, 1920), Align::Start);
    }
}
