//! Widget implementations for the globalmenu bar.
//!
//! The bar hosts a single widget: the menu bar itself. `BaseWidget` carries
//! the shared container/popover plumbing, and `BarState` owns widget handles
//! to keep their Rust-side state (callbacks, popovers) alive for the lifetime
//! of the bar window.

mod base;
mod menubar;

pub use base::{BaseWidget, MenuHandle, configure_popover};
pub use menubar::MenuBarWidget;

use std::any::Any;

/// Holds widget handles to keep them alive for the lifetime of the bar.
pub struct BarState {
    widget_handles: Vec<Box<dyn Any>>,
}

impl BarState {
    pub fn new() -> Self {
        Self {
            widget_handles: Vec::new(),
        }
    }

    /// Add a widget handle to be kept alive.
    pub fn add_handle(&mut self, handle: Box<dyn Any>) {
        self.widget_handles.push(handle);
    }

    pub fn handle_count(&self) -> usize {
        self.widget_handles.len()
    }
}

impl Default for BarState {
    fn default() -> Self {
        Self::new()
    }
}
