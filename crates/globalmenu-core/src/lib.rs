//! Core library for globalmenu: configuration schema and loading, error
//! types, and logging setup. Everything GTK- or D-Bus-specific lives in the
//! `globalmenu` binary crate.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, ConfigLoadResult, ScreenBounds};
pub use error::{Error, Result};
