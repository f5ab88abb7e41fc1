//! The backup manifest: an ordered list of items plus last-run timestamps.
//!
//! Items keep the order the user gave them -- it is display and reorder
//! order, never sorted. The manifest derives two flattened views for a
//! backup run: the file list (home-relative, redundancy-pruned) and the
//! config list (absolute store paths, same pruning).

use crate::apps::AppInfo;
use crate::paths::HomeDir;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const APP_NAME: &str = "homevault";
const MANIFEST_FILE: &str = "backup.json";
const DATA_DIR: &str = ".local/share";

const TYPE_APP: &str = "app";
const TYPE_PATH: &str = "path";
const TYPE_CONFIG: &str = "config";

/// One unit the user chose to back up.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// An application's declared state, keyed by its desktop file.
    App { desktop_file: String, info: AppInfo },
    /// An explicit filesystem path.
    Path { path: String },
    /// An explicit config key or group.
    Config { path: String },
}

impl Item {
    /// Build an item of the given type. `App` items read their metadata from
    /// the desktop file; an application that no longer declares backup data
    /// yields `None`, as does an empty path.
    pub fn create(kind: &str, path: &str, home: &HomeDir) -> Option<Self> {
        if path.is_empty() {
            return None;
        }
        match kind {
            TYPE_APP => {
                let info = AppInfo::load(Path::new(path), home)?;
                Some(Item::App {
                    desktop_file: path.to_string(),
                    info,
                })
            }
            TYPE_PATH => Some(Item::Path {
                path: path.to_string(),
            }),
            TYPE_CONFIG => Some(Item::Config {
                path: path.to_string(),
            }),
            _ => None,
        }
    }

    /// The serialized type tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Item::App { .. } => TYPE_APP,
            Item::Path { .. } => TYPE_PATH,
            Item::Config { .. } => TYPE_CONFIG,
        }
    }

    /// The identifying path: desktop file for apps, the stored path
    /// otherwise.
    pub fn path(&self) -> &str {
        match self {
            Item::App { desktop_file, .. } => desktop_file,
            Item::Path { path } | Item::Config { path } => path,
        }
    }

    /// Identity comparison: same type and same path. App metadata does not
    /// participate -- two records naming the same desktop file are the same
    /// app even if the application changed underneath.
    pub fn same_source(&self, other: &Item) -> bool {
        self.kind() == other.kind() && self.path() == other.path()
    }

    /// Human-facing name for listings.
    pub fn display_name(&self, home: &HomeDir) -> String {
        match self {
            Item::App { info, .. } => info.name.clone(),
            Item::Path { path } => home.beautify(path.trim_end_matches('/')),
            Item::Config { path } => {
                let trimmed = path.trim_end_matches('/');
                if trimmed.is_empty() {
                    "/".to_string()
                } else {
                    trimmed.to_string()
                }
            }
        }
    }

    /// Filesystem paths this item contributes to a backup.
    fn path_entries(&self) -> &[String] {
        match self {
            Item::App { info, .. } => &info.backup_paths,
            Item::Path { path } => std::slice::from_ref(path),
            Item::Config { .. } => &[],
        }
    }

    /// Config entries this item contributes to a backup.
    fn config_entries(&self) -> &[String] {
        match self {
            Item::App { info, .. } => &info.backup_config,
            Item::Config { path } => std::slice::from_ref(path),
            Item::Path { .. } => &[],
        }
    }
}

/// Which parts of two manifests differ.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManifestDiff {
    pub items: bool,
    pub last_backup: bool,
    pub last_restore: bool,
}

impl ManifestDiff {
    /// True when nothing differs.
    pub fn is_empty(&self) -> bool {
        !(self.items || self.last_backup || self.last_restore)
    }
}

/// On-disk record of one item; only the type tag and the path are persisted.
/// App metadata is re-read from the live desktop file at load time.
#[derive(Debug, Serialize, Deserialize)]
struct ItemRecord {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    path: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestDoc {
    #[serde(default)]
    items: Vec<ItemRecord>,
    #[serde(rename = "lastBackup", default, skip_serializing_if = "Option::is_none")]
    last_backup: Option<String>,
    #[serde(rename = "lastRestore", default, skip_serializing_if = "Option::is_none")]
    last_restore: Option<String>,
}

/// Ordered, persisted list of backup items plus last-run timestamps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    items: Vec<Item>,
    last_backup: Option<DateTime<Utc>>,
    last_restore: Option<DateTime<Utc>>,
}

impl Manifest {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// The manifest's data directory under the given home.
    pub fn data_dir(home: &HomeDir) -> PathBuf {
        Path::new(home.as_str()).join(DATA_DIR).join(APP_NAME)
    }

    /// The manifest file under the given home.
    pub fn file_in(home: &HomeDir) -> PathBuf {
        Self::data_dir(home).join(MANIFEST_FILE)
    }

    /// The manifest file of the current user.
    pub fn default_file() -> PathBuf {
        Self::file_in(&HomeDir::current())
    }

    /// Load a manifest from disk. A missing file is an empty manifest;
    /// malformed item records are skipped, and an `App` record whose desktop
    /// file no longer yields metadata is silently dropped.
    pub fn load(path: &Path, home: &HomeDir) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("Cannot read {}", path.display()))
            }
        };
        let doc: ManifestDoc = serde_json::from_str(&content)
            .with_context(|| format!("Cannot parse {}", path.display()))?;

        let mut items = Vec::with_capacity(doc.items.len());
        for record in &doc.items {
            match Item::create(&record.kind, &record.path, home) {
                Some(item) => items.push(item),
                None => debug!(kind = record.kind.as_str(), path = record.path.as_str(), "dropping item"),
            }
        }

        Ok(Self {
            items,
            last_backup: parse_timestamp(doc.last_backup.as_deref()),
            last_restore: parse_timestamp(doc.last_restore.as_deref()),
        })
    }

    /// Write the manifest to disk, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let doc = ManifestDoc {
            items: self
                .items
                .iter()
                .map(|item| ItemRecord {
                    kind: item.kind().to_string(),
                    path: item.path().to_string(),
                })
                .collect(),
            last_backup: self.last_backup.map(format_timestamp),
            last_restore: self.last_restore.map(format_timestamp),
        };
        let content = serde_json::to_string_pretty(&doc).context("Cannot serialize manifest")?;
        fs::write(path, content).with_context(|| format!("Cannot write {}", path.display()))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn item_at(&self, index: usize) -> Option<&Item> {
        self.items.get(index)
    }

    /// Append an item at the end. Duplicates are allowed here; deciding
    /// whether adding the same path twice makes sense is the caller's call.
    pub fn push(&mut self, item: Item) {
        self.items.push(item);
    }

    /// Move an item to a new position. Out-of-range indices are a failed
    /// no-op.
    pub fn move_item(&mut self, from: usize, to: usize) -> bool {
        let n = self.items.len();
        if from >= n || to >= n {
            return false;
        }
        let item = self.items.remove(from);
        self.items.insert(to, item);
        true
    }

    /// Remove the item at `index`. Out-of-range indices are a failed no-op.
    pub fn remove_at(&mut self, index: usize) -> Option<Item> {
        if index < self.items.len() {
            Some(self.items.remove(index))
        } else {
            None
        }
    }

    pub fn last_backup(&self) -> Option<DateTime<Utc>> {
        self.last_backup
    }

    pub fn last_restore(&self) -> Option<DateTime<Utc>> {
        self.last_restore
    }

    /// Stamp the last-backup time with the current time.
    pub fn touch_last_backup(&mut self) {
        self.last_backup = Some(Utc::now().trunc_subsecs(0));
    }

    /// Stamp the last-restore time with the current time.
    pub fn touch_last_restore(&mut self) {
        self.last_restore = Some(Utc::now().trunc_subsecs(0));
    }

    /// Compare two manifests part by part. Items compare positionally with
    /// full equality (for apps that includes the metadata); timestamps
    /// compare with equality, both-unset included.
    pub fn diff(&self, other: &Manifest) -> ManifestDiff {
        ManifestDiff {
            items: self.items != other.items,
            last_backup: self.last_backup != other.last_backup,
            last_restore: self.last_restore != other.last_restore,
        }
    }

    /// Derive the deduplicated, home-relative file list for a backup run.
    ///
    /// Every contributed path is normalized (entries outside home are
    /// dropped), the list is sorted, entries covered by an earlier directory
    /// entry are removed, and exact duplicates collapse.
    pub fn file_list(&self, home: &HomeDir, extra: Option<&str>) -> Vec<String> {
        let mut list: Vec<String> = Vec::new();
        for item in &self.items {
            for entry in item.path_entries() {
                if entry.is_empty() {
                    continue;
                }
                match home.relative(entry) {
                    Some(rel) => list.push(rel),
                    None => debug!(entry = entry.as_str(), "dropping path outside home"),
                }
            }
        }
        if let Some(extra) = extra {
            if !extra.is_empty() {
                list.push(extra.to_string());
            }
        }
        finish_list(&mut list);
        list
    }

    /// Derive the deduplicated config entry list for a backup run. Config
    /// entries are absolute store paths; anything else is dropped.
    pub fn config_list(&self, extra: Option<&str>) -> Vec<String> {
        let mut list: Vec<String> = Vec::new();
        for item in &self.items {
            for entry in item.config_entries() {
                if entry.starts_with('/') {
                    list.push(entry.clone());
                } else if !entry.is_empty() {
                    warn!(entry = entry.as_str(), "dropping config entry");
                }
            }
        }
        if let Some(extra) = extra {
            if extra.starts_with('/') {
                list.push(extra.to_string());
            }
        }
        finish_list(&mut list);
        list
    }
}

/// Sort, prune entries covered by an earlier directory entry, and drop
/// exact duplicates. `Documents/` covers `Documents/notes.txt`; backing up
/// both must retain only the directory.
fn finish_list(list: &mut Vec<String>) {
    list.sort();
    let mut k = 0;
    while k < list.len() {
        if list[k].ends_with('/') {
            let prefix = list[k].clone();
            while k + 1 < list.len() && list[k + 1].starts_with(&prefix) {
                debug!(entry = list[k + 1].as_str(), "dropping covered entry");
                list.remove(k + 1);
            }
        }
        k += 1;
    }
    list.dedup();
}

fn parse_timestamp(text: Option<&str>) -> Option<DateTime<Utc>> {
    let text = text?;
    match DateTime::parse_from_rfc3339(text) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(err) => {
            warn!(text, %err, "ignoring malformed timestamp");
            None
        }
    }
}

fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}
