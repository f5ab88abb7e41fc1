//! HomeVault Core Library
//!
//! Snapshot and restore a user's personal state: files under the home
//! directory plus a hierarchical key-value configuration store, driven by a
//! user-curated manifest of backup items. Provides:
//! - the ordered, diffable backup manifest and its derived path lists
//! - recursive capture/restore of configuration trees (dconf-style stores)
//! - the backup run engine (hard-link-first file copy, per-user layout)
//! - a live editing session with debounced writes and external-change pickup

pub mod apps;
pub mod confstore;
pub mod conftree;
pub mod livesync;
pub mod manifest;
pub mod paths;
pub mod snapshot;

// Re-export main types
pub use apps::AppInfo;
pub use confstore::{ConfigStore, DconfStore, MemoryStore};
pub use conftree::ConfigSnapshot;
pub use livesync::LiveSync;
pub use manifest::{Item, Manifest, ManifestDiff};
pub use paths::HomeDir;
pub use snapshot::Action;
