//! Service singletons and shared infrastructure.

pub mod appmenu;
pub mod callbacks;
pub mod config_manager;
pub mod dbus;
pub mod menu;
pub mod wm;
