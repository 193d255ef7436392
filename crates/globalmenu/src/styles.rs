//! Shared CSS class constants for globalmenu.
//!
//! This module centralizes all CSS class names used across the codebase,
//! making them discoverable, avoiding typos, and enabling IDE autocompletion.
//!
//! # Usage
//!
//! ```ignore
//! use crate::styles::{class, menu};
//!
//! widget.add_css_class(class::WIDGET);
//! button.add_css_class(menu::BAR_BUTTON);
//! ```

/// Core structural/layout CSS classes.
pub mod class {
    /// Base widget container class (`.widget`).
    pub const WIDGET: &str = "widget";

    /// Widget content inner box (`.content`).
    pub const CONTENT: &str = "content";

    /// Bar window class (`.bar-window`).
    pub const BAR_WINDOW: &str = "bar-window";

    /// Main bar class (`.bar`).
    pub const BAR: &str = "bar";
}

/// Button style classes.
pub mod button {
    /// Reset button - strips all GTK chrome (`.gm-btn-reset`).
    pub const RESET: &str = "gm-btn-reset";

    /// Compact button - minimal chrome, zero padding (`.gm-btn-compact`).
    pub const COMPACT: &str = "gm-btn-compact";
}

/// Popover surface classes.
pub mod surface {
    /// Widget menu popover (`.widget-menu`).
    pub const WIDGET_MENU: &str = "widget-menu";

    /// Popover content container (`.widget-menu-content`).
    pub const WIDGET_MENU_CONTENT: &str = "widget-menu-content";

    /// Generic popover surface (`.gm-popover`).
    pub const POPOVER: &str = "gm-popover";
}

/// Menu bar and popup entry classes.
pub mod menu {
    /// The menu bar widget (`.menubar`).
    pub const BAR: &str = "menubar";

    /// A top-level menu button in the bar (`.menubar-button`).
    pub const BAR_BUTTON: &str = "menubar-button";

    /// Top-level button whose popup is open (`.menubar-button--open`).
    pub const BAR_BUTTON_OPEN: &str = "menubar-button--open";

    /// The single root button in compact mode (`.menubar-compact`).
    pub const COMPACT_BUTTON: &str = "menubar-compact";

    /// Vertical list of entries inside a popup (`.menu-popup`).
    pub const POPUP: &str = "menu-popup";

    /// One entry row in a popup (`.menu-entry`).
    pub const ENTRY: &str = "menu-entry";

    /// Entry label (`.menu-entry-label`).
    pub const ENTRY_LABEL: &str = "menu-entry-label";

    /// Right-aligned shortcut hint (`.menu-entry-shortcut`).
    pub const ENTRY_SHORTCUT: &str = "menu-entry-shortcut";

    /// Toggle indicator (checkmark/radio) box (`.menu-entry-toggle`).
    pub const ENTRY_TOGGLE: &str = "menu-entry-toggle";

    /// Submenu chevron (`.menu-entry-chevron`).
    pub const ENTRY_CHEVRON: &str = "menu-entry-chevron";

    /// Separator row (`.menu-separator`).
    pub const SEPARATOR: &str = "menu-separator";

    /// Back row returning to the parent level (`.menu-back`).
    pub const BACK: &str = "menu-back";
}
