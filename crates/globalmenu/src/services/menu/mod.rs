//! dbusmenu consumption: wire types, the local item mirror, and the
//! asynchronous importer that keeps the mirror in sync with a remote
//! com.canonical.dbusmenu exporter.

pub mod importer;
pub mod mirror;
pub mod shortcut;
pub mod types;

pub use importer::{MenuCli, MenuImporter};
pub use mirror::{ActionMirror, ApplyResult, MenuItem};
pub use types::{MenuId, PropertyUpdate, ROOT_ID};
