//! Configuration tree capture and restore.
//!
//! Export walks the requested groups depth-first and captures them into a
//! portable tree document. Import distinguishes two kinds of root entries:
//! a group entry completely replaces the subtree it names (stale keys are
//! removed, not merely overwritten), while a key entry sets that single key
//! and leaves its siblings alone.
//!
//! The document (`config.json` in a backup) has two optional lists:
//!
//! 1. "keys" - entries with "name" (starting but not ending with a slash)
//!    and "value" pairs.
//! 2. "groups" - entries with "name" (starting and ending with a slash),
//!    an optional "keys" list (names without any slash this time) and an
//!    optional nested "groups" list (names ending but not starting with a
//!    slash), recursively.

use crate::confstore::ConfigStore;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// One captured key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    pub name: String,
    pub value: Value,
}

/// One captured group and everything below it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Group>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<Key>,
}

/// The root of a captured configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Group>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<Key>,
}

impl ConfigSnapshot {
    /// True when nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.keys.is_empty()
    }

    /// Read a snapshot document from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config snapshot {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Cannot parse config snapshot {}", path.display()))
    }

    /// Write a snapshot document to disk.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content =
            serde_json::to_string_pretty(self).context("Cannot serialize config snapshot")?;
        fs::write(path, content)
            .with_context(|| format!("Cannot write config snapshot {}", path.display()))?;
        Ok(())
    }
}

// ============ EXPORT ============

/// Capture the given config entries from the store.
///
/// Entries ending with `/` are groups and are walked recursively; other
/// entries are single keys. Entries not starting with `/` are logged and
/// excluded -- the entry list is a hint, not a guarantee, so garbage must
/// not fail the export.
pub fn export(store: &dyn ConfigStore, entries: &[String]) -> ConfigSnapshot {
    let mut snapshot = ConfigSnapshot::default();
    for entry in entries {
        if !entry.starts_with('/') {
            warn!(entry = entry.as_str(), "ignoring configuration entry");
            continue;
        }
        if entry.ends_with('/') {
            debug!(group = entry.as_str(), "exporting group");
            if let Some(group) = export_group(store, "", entry) {
                snapshot.groups.push(group);
            }
        } else {
            export_key(store, &mut snapshot.keys, "", entry);
        }
    }
    snapshot
}

/// Capture one group. Returns `None` when the group holds nothing at all --
/// empty containers are never emitted.
fn export_group(store: &dyn ConfigStore, parent: &str, name: &str) -> Option<Group> {
    let path = format!("{}{}", parent, name);
    let children = match store.list(&path) {
        Ok(children) => children,
        Err(err) => {
            warn!(group = path.as_str(), %err, "cannot list group");
            return None;
        }
    };

    let mut groups = Vec::new();
    let mut keys = Vec::new();
    for child in &children {
        if child.ends_with('/') {
            if let Some(subgroup) = export_group(store, &path, child) {
                groups.push(subgroup);
            }
        } else {
            export_key(store, &mut keys, &path, child);
        }
    }

    if groups.is_empty() && keys.is_empty() {
        None
    } else {
        Some(Group {
            name: name.to_string(),
            groups,
            keys,
        })
    }
}

/// Capture one key into `keys`. A key without a value is skipped; absence
/// is not an error.
fn export_key(store: &dyn ConfigStore, keys: &mut Vec<Key>, group: &str, name: &str) {
    let path = format!("{}{}", group, name);
    match store.read(&path) {
        Ok(Some(value)) => {
            debug!(key = path.as_str(), %value, "exporting");
            keys.push(Key {
                name: name.to_string(),
                value,
            });
        }
        Ok(None) => {
            debug!(key = path.as_str(), "doesn't exist");
        }
        Err(err) => {
            warn!(key = path.as_str(), %err, "cannot read key");
        }
    }
}

// ============ IMPORT ============

/// Restore a captured tree into the store.
///
/// Groups are applied first (each one a destructive whole-subtree replace),
/// then root-level keys. The store is synced once per class, not once per
/// key, to bound synchronization overhead.
pub fn import(store: &dyn ConfigStore, snapshot: &ConfigSnapshot) -> Result<()> {
    if !snapshot.groups.is_empty() {
        for group in &snapshot.groups {
            if group.name.starts_with('/') && group.name.ends_with('/') {
                // Clear the subtree so keys absent from the backup disappear
                if let Err(err) = store.clear(&group.name) {
                    warn!(group = group.name.as_str(), %err, "cannot clear group");
                }
                restore_subgroups(store, &group.name, &group.groups);
                restore_subkeys(store, &group.name, &group.keys);
            } else {
                warn!(group = group.name.as_str(), "ignoring configuration group");
            }
        }
        store.sync()?;
    }

    if !snapshot.keys.is_empty() {
        for key in &snapshot.keys {
            if key.name.starts_with('/') && !key.name.ends_with('/') {
                restore_key(store, &key.name, &key.value);
            } else {
                warn!(key = key.name.as_str(), "ignoring configuration key");
            }
        }
        store.sync()?;
    }

    Ok(())
}

fn restore_subgroups(store: &dyn ConfigStore, prefix: &str, groups: &[Group]) {
    for group in groups {
        if !group.name.starts_with('/') && group.name.ends_with('/') {
            let path = format!("{}{}", prefix, group.name);
            restore_subgroups(store, &path, &group.groups);
            restore_subkeys(store, &path, &group.keys);
        } else {
            warn!(
                subgroup = group.name.as_str(),
                "ignoring configuration subgroup"
            );
        }
    }
}

fn restore_subkeys(store: &dyn ConfigStore, prefix: &str, keys: &[Key]) {
    for key in keys {
        if !key.name.starts_with('/') && !key.name.ends_with('/') {
            let path = format!("{}{}", prefix, key.name);
            restore_key(store, &path, &key.value);
        } else {
            warn!(subkey = key.name.as_str(), "ignoring configuration subkey");
        }
    }
}

/// Write one key back. A value the store rejects is reported and skipped,
/// never coerced.
fn restore_key(store: &dyn ConfigStore, key: &str, value: &Value) {
    if value.is_null() {
        debug!(key, "skipping unset value");
        return;
    }
    debug!(key, %value, "restoring");
    if let Err(err) = store.write(key, value) {
        warn!(key, %err, "cannot restore key");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confstore::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_export_builds_nested_groups() {
        let store = MemoryStore::new();
        store.insert("/apps/foo/a", json!(1));
        store.insert("/apps/foo/sub/b", json!("two"));

        let snapshot = export(&store, &["/apps/foo/".to_string()]);
        assert_eq!(snapshot.groups.len(), 1);
        let foo = &snapshot.groups[0];
        assert_eq!(foo.name, "/apps/foo/");
        assert_eq!(foo.keys, vec![Key { name: "a".into(), value: json!(1) }]);
        assert_eq!(foo.groups.len(), 1);
        assert_eq!(foo.groups[0].name, "sub/");
        assert_eq!(
            foo.groups[0].keys,
            vec![Key { name: "b".into(), value: json!("two") }]
        );
    }

    #[test]
    fn test_export_drops_empty_groups() {
        let store = MemoryStore::new();
        let snapshot = export(&store, &["/apps/nothing/".to_string()]);
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_export_ignores_garbage_entries() {
        let store = MemoryStore::new();
        store.insert("/apps/foo/a", json!(1));

        let entries = vec![
            "not-absolute".to_string(),
            "/apps/foo/".to_string(),
        ];
        let snapshot = export(&store, &entries);
        assert_eq!(snapshot.groups.len(), 1);
        assert!(snapshot.keys.is_empty());
    }

    #[test]
    fn test_export_single_key() {
        let store = MemoryStore::new();
        store.insert("/apps/foo/a", json!(1));

        let snapshot = export(&store, &["/apps/foo/a".to_string(), "/apps/foo/b".to_string()]);
        // /apps/foo/b has no value and is skipped without error
        assert_eq!(
            snapshot.keys,
            vec![Key { name: "/apps/foo/a".into(), value: json!(1) }]
        );
    }

    #[test]
    fn test_import_group_replaces_whole_subtree() {
        let source = MemoryStore::new();
        source.insert("/apps/foo/a", json!(1));
        source.insert("/apps/foo/b", json!(2));
        let snapshot = export(&source, &["/apps/foo/".to_string()]);

        let target = MemoryStore::new();
        target.insert("/apps/foo/c", json!(3));
        import(&target, &snapshot).unwrap();

        assert_eq!(target.get("/apps/foo/a"), Some(json!(1)));
        assert_eq!(target.get("/apps/foo/b"), Some(json!(2)));
        // The stale key is gone, not merely left behind
        assert_eq!(target.get("/apps/foo/c"), None);
    }

    #[test]
    fn test_import_single_key_leaves_siblings_alone() {
        let snapshot = ConfigSnapshot {
            groups: Vec::new(),
            keys: vec![Key { name: "/apps/foo/a".into(), value: json!(10) }],
        };

        let target = MemoryStore::new();
        target.insert("/apps/foo/a", json!(1));
        target.insert("/apps/foo/b", json!(2));
        import(&target, &snapshot).unwrap();

        assert_eq!(target.get("/apps/foo/a"), Some(json!(10)));
        assert_eq!(target.get("/apps/foo/b"), Some(json!(2)));
    }

    #[test]
    fn test_import_syncs_once_per_class() {
        let store = MemoryStore::new();
        let snapshot = ConfigSnapshot {
            groups: vec![Group {
                name: "/apps/foo/".into(),
                groups: Vec::new(),
                keys: vec![
                    Key { name: "a".into(), value: json!(1) },
                    Key { name: "b".into(), value: json!(2) },
                ],
            }],
            keys: vec![
                Key { name: "/apps/x".into(), value: json!(3) },
                Key { name: "/apps/y".into(), value: json!(4) },
            ],
        };

        import(&store, &snapshot).unwrap();
        assert_eq!(store.sync_count(), 2);
    }

    #[test]
    fn test_import_skips_malformed_names() {
        let store = MemoryStore::new();
        let snapshot = ConfigSnapshot {
            groups: vec![Group {
                name: "no-slashes".into(),
                groups: Vec::new(),
                keys: vec![Key { name: "a".into(), value: json!(1) }],
            }],
            keys: vec![Key { name: "/ends-with/".into(), value: json!(2) }],
        };

        import(&store, &snapshot).unwrap();
        assert!(store.keys().is_empty());
    }

    #[test]
    fn test_snapshot_document_round_trip() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.json");

        let store = MemoryStore::new();
        store.insert("/apps/foo/a", json!(1));
        let snapshot = export(&store, &["/apps/foo/".to_string()]);

        snapshot.save(&path).unwrap();
        let loaded = ConfigSnapshot::load(&path).unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_empty_group_lists_are_omitted_from_document() {
        let store = MemoryStore::new();
        store.insert("/apps/foo/a", json!(1));
        let snapshot = export(&store, &["/apps/foo/".to_string()]);

        let text = serde_json::to_string(&snapshot).unwrap();
        assert!(!text.contains("\"groups\":[]"));
    }
}
