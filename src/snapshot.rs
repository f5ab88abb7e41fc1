//! The backup run: copying files and capturing config to a backup root.
//!
//! On-disk layout under the backup root:
//!
//! ```text
//! <root>/users/<euid>/files/...    mirrored home-relative files
//! <root>/users/<euid>/config.json  captured configuration tree
//! ```
//!
//! The manifest's own data directory is part of the file list, so the
//! manifest mirror lives inside `files/` under the same relative path it
//! has in the live home.
//!
//! Individual entries that cannot be copied are logged and skipped; a run
//! that skips entries still completes successfully. The only fatal failure
//! is not being able to tell what the run should do.

use crate::confstore::ConfigStore;
use crate::conftree::{self, ConfigSnapshot};
use crate::manifest::Manifest;
use crate::paths::HomeDir;
use anyhow::Result;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const USERS_DIR: &str = "users";
const FILES_DIR: &str = "files";
const CONFIG_STORE_FILE: &str = "config.json";

/// What a backup run should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Copy home state into the backup root.
    Export,
    /// Restore home state from the backup root.
    Import,
}

/// The per-user directory inside a backup root.
pub fn user_root(backup_root: &Path) -> PathBuf {
    backup_root
        .join(USERS_DIR)
        .join(effective_user_id().to_string())
}

/// Where mirrored files live inside a backup root.
pub fn files_dir(backup_root: &Path) -> PathBuf {
    user_root(backup_root).join(FILES_DIR)
}

/// Where the captured config tree lives inside a backup root.
pub fn config_snapshot_path(backup_root: &Path) -> PathBuf {
    user_root(backup_root).join(CONFIG_STORE_FILE)
}

#[cfg(unix)]
fn effective_user_id() -> u32 {
    // SAFETY: geteuid has no failure modes and touches no memory.
    unsafe { libc::geteuid() }
}

#[cfg(not(unix))]
fn effective_user_id() -> u32 {
    0
}

/// Perform a backup run.
///
/// Export loads the live manifest, stamps and persists `lastBackup`, then
/// copies the file list and captures the config list. Import loads the
/// manifest from the backup mirror, restores files then config, then stamps
/// `lastRestore` on the live manifest.
pub fn run(
    action: Action,
    home: &Path,
    backup_root: &Path,
    store: &dyn ConfigStore,
) -> Result<()> {
    let home = HomeDir::new(home);
    let live_file = Manifest::file_in(&home);
    // The manifest's own directory is backed up alongside everything else
    let data_dir = Manifest::data_dir(&home);
    let extra = home.relative(&format!("{}/", data_dir.to_string_lossy()));

    match action {
        Action::Export => {
            let mut manifest = Manifest::load(&live_file, &home)?;
            manifest.touch_last_backup();
            manifest.save(&live_file)?;

            debug!(home = home.as_str(), root = %backup_root.display(), "backing up files");
            copy_entries(
                &files_dir(backup_root),
                Path::new(home.as_str()),
                &manifest.file_list(&home, extra.as_deref()),
            );

            let snapshot = conftree::export(store, &manifest.config_list(None));
            snapshot.save(&config_snapshot_path(backup_root))?;
        }
        Action::Import => {
            // The manifest travels with the backup; read the mirrored copy
            let rel = home
                .relative(&live_file.to_string_lossy())
                .unwrap_or_default();
            let mirror = files_dir(backup_root).join(&rel);
            let mut manifest = Manifest::load(&mirror, &home)?;

            debug!(root = %backup_root.display(), home = home.as_str(), "restoring files");
            copy_entries(
                Path::new(home.as_str()),
                &files_dir(backup_root),
                &manifest.file_list(&home, extra.as_deref()),
            );

            match ConfigSnapshot::load(&config_snapshot_path(backup_root)) {
                Ok(snapshot) => conftree::import(store, &snapshot)?,
                Err(err) => warn!(%err, "no config snapshot restored"),
            }

            manifest.touch_last_restore();
            manifest.save(&live_file)?;
        }
    }
    Ok(())
}

// ============ FILE COPY ============

/// Copy every derived entry between two roots. Entries are home-relative;
/// an entry ending with `/` names a directory tree.
pub fn copy_entries(dest_root: &Path, src_root: &Path, entries: &[String]) {
    for entry in entries {
        copy_entry(dest_root, src_root, entry);
    }
}

fn copy_entry(dest_root: &Path, src_root: &Path, entry: &str) {
    let copy_tree = entry.ends_with('/');
    let entry = entry.trim_end_matches('/');
    if entry.is_empty() || entry == "." {
        // "./" would name the whole home; a manifest never derives it
        return;
    }

    let src = src_root.join(entry);
    let dest = dest_root.join(entry);
    let meta = match fs::metadata(&src) {
        Ok(meta) => meta,
        Err(_) => {
            // Not an error, just skip non-existing sources
            debug!(src = %src.display(), "doesn't exist");
            return;
        }
    };

    if copy_tree {
        if meta.is_dir() {
            copy_dir(&dest, &src);
        } else {
            warn!(src = %src.display(), "is not a directory");
        }
    } else if meta.is_file() {
        copy_file(&dest, &src);
    } else {
        warn!(src = %src.display(), "is not a file");
    }
}

/// Copy one file, preferring a hard link because it is so much faster.
/// A copy that fails because the destination directory is missing creates
/// the directory (replicating the source directory's mode and ownership)
/// and retries once.
fn copy_file(dest: &Path, src: &Path) {
    if dest.exists() {
        // Hard links refuse to overwrite; the byte copy below would cope,
        // but a stale destination must not survive a failed link either
        let _ = fs::remove_file(dest);
    }
    if fs::hard_link(src, dest).is_ok() {
        debug!(src = %src.display(), dest = %dest.display(), "linked");
        return;
    }
    match fs::copy(src, dest) {
        Ok(_) => {
            debug!(src = %src.display(), dest = %dest.display(), "copied");
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            // The source exists, so the missing piece is the destination
            // directory. Create it and make another attempt.
            let Some(src_dir) = src.parent() else { return };
            let Some(dest_dir) = dest.parent() else { return };
            if !replicate_dir(dest_dir, src_dir) {
                return;
            }
            match fs::copy(src, dest) {
                Ok(_) => debug!(src = %src.display(), dest = %dest.display(), "copied"),
                Err(err) => warn!(src = %src.display(), %err, "cannot copy"),
            }
        }
        Err(err) => {
            warn!(src = %src.display(), %err, "cannot copy");
        }
    }
}

/// Recursively copy a directory tree.
fn copy_dir(dest: &Path, src: &Path) {
    if !replicate_dir(dest, src) {
        return;
    }
    let entries = match fs::read_dir(src) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(src = %src.display(), %err, "cannot read directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let child_src = entry.path();
        let child_dest = dest.join(entry.file_name());
        match fs::metadata(&child_src) {
            Ok(meta) if meta.is_dir() => copy_dir(&child_dest, &child_src),
            Ok(meta) if meta.is_file() => copy_file(&child_dest, &child_src),
            Ok(_) => debug!(src = %child_src.display(), "skipping special file"),
            Err(_) => debug!(src = %child_src.display(), "skipping unreadable entry"),
        }
    }
}

/// Ensure `dest` exists as a directory, replicating `src`'s mode and
/// ownership as far as this process is allowed to.
fn replicate_dir(dest: &Path, src: &Path) -> bool {
    if dest.is_dir() {
        return true;
    }
    // In case there's a file with the same name
    let _ = fs::remove_file(dest);
    if let Err(err) = fs::create_dir_all(dest) {
        warn!(dest = %dest.display(), %err, "cannot create directory");
        return false;
    }
    debug!(dest = %dest.display(), "created");

    #[cfg(unix)]
    {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};
        if let Ok(meta) = fs::metadata(src) {
            let mode = meta.mode() & 0o7777;
            if let Err(err) = fs::set_permissions(dest, fs::Permissions::from_mode(mode)) {
                warn!(dest = %dest.display(), %err, "cannot chmod");
            }
            if let Err(err) = std::os::unix::fs::chown(dest, Some(meta.uid()), Some(meta.gid())) {
                warn!(dest = %dest.display(), %err, "cannot chown");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = src;

    true
}
