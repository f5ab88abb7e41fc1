//! Live manifest session: debounced writes and external-change pickup.
//!
//! A long-running editing session (the GUI, `hv watch`) owns one manifest
//! that is both the live edit target and a file on disk which another
//! process may rewrite at any time. This controller serializes the two
//! directions onto a single-threaded timeline:
//!
//! - edits are persisted with a holdoff window between writes and a save
//!   timer bounding staleness under continuous edits;
//! - a suppression counter keeps our own writes from echoing back through
//!   the file watcher as phantom external changes.

use crate::manifest::{Item, Manifest, ManifestDiff};
use crate::paths::HomeDir;
use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Minimum spacing between consecutive writes.
pub const HOLDOFF_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on staleness: the state is saved at least this often while
/// changes keep happening in quick succession.
pub const SAVE_INTERVAL: Duration = Duration::from_secs(10);

/// Controller for one live manifest mirrored on disk.
pub struct LiveSync {
    manifest: Manifest,
    home: HomeDir,
    file: PathBuf,
    watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    watching_file: bool,
    suppress: u32,
    holdoff: Duration,
    save_interval: Duration,
    holdoff_until: Option<Instant>,
    save_deadline: Option<Instant>,
}

impl LiveSync {
    /// Open a session on the given manifest file with the default timers.
    pub fn open(file: PathBuf, home: HomeDir) -> Result<Self> {
        Self::with_intervals(file, home, HOLDOFF_INTERVAL, SAVE_INTERVAL)
    }

    /// Open a session with explicit holdoff and save timers.
    pub fn with_intervals(
        file: PathBuf,
        home: HomeDir,
        holdoff: Duration,
        save_interval: Duration,
    ) -> Result<Self> {
        let dir = file
            .parent()
            .context("Manifest file has no parent directory")?
            .to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create {}", dir.display()))?;

        debug!(file = %file.display(), "loading");
        let manifest = Manifest::load(&file, &home)?;

        let (tx, rx) = channel();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Cannot watch {}", dir.display()))?;

        let mut sync = Self {
            manifest,
            home,
            file,
            watcher,
            rx,
            watching_file: false,
            suppress: 0,
            holdoff,
            save_interval,
            holdoff_until: None,
            save_deadline: None,
        };
        // The file may not exist yet on a first run; the directory watch
        // re-arms this once it appears
        sync.watch_file();
        Ok(sync)
    }

    /// The current in-memory manifest.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Append an item and schedule a write.
    pub fn add_item(&mut self, item: Item) {
        self.manifest.push(item);
        self.changed();
    }

    /// Remove an item and schedule a write. Fails on an out-of-range index.
    pub fn remove_item(&mut self, index: usize) -> bool {
        if self.manifest.remove_at(index).is_some() {
            self.changed();
            true
        } else {
            false
        }
    }

    /// Reorder an item and schedule a write. Fails on out-of-range indices.
    pub fn move_item(&mut self, from: usize, to: usize) -> bool {
        if self.manifest.move_item(from, to) {
            self.changed();
            true
        } else {
            false
        }
    }

    /// Drive timers and the watcher. Returns the applied difference when an
    /// external edit was picked up, so the caller can refresh only what
    /// actually changed.
    pub fn poll(&mut self) -> Option<ManifestDiff> {
        let mut file_changed = false;
        let mut dir_changed = false;
        while let Ok(result) = self.rx.try_recv() {
            let Ok(event) = result else { continue };
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                continue;
            }
            if event
                .paths
                .iter()
                .any(|p| p.file_name() == self.file.file_name())
            {
                file_changed = true;
            } else {
                dir_changed = true;
            }
        }

        if (dir_changed || file_changed) && !self.watching_file {
            // First-run creation: the file-level watch could not be armed
            // at setup time because the file did not exist yet
            self.watch_file();
        }

        let diff = if file_changed { self.file_event() } else { None };

        let now = Instant::now();
        if let Some(until) = self.holdoff_until {
            if now >= until {
                self.holdoff_until = None;
                if self.save_deadline.take().is_some() {
                    // Holdoff ran out with changes still pending
                    self.write_state();
                }
            }
        }
        if let Some(deadline) = self.save_deadline {
            if now >= deadline {
                self.save_deadline = None;
                self.holdoff_until = Some(now + self.holdoff);
                self.write_state();
            }
        }

        diff
    }

    /// Write any pending changes out immediately.
    pub fn flush(&mut self) {
        if self.save_deadline.take().is_some() {
            self.write_state();
        }
    }

    /// A mutation happened: write now if we are idle, otherwise make sure
    /// the save timer is armed so the write happens eventually even under
    /// continuous rapid edits. The holdoff window restarts either way.
    fn changed(&mut self) {
        let now = Instant::now();
        let in_holdoff = self.holdoff_until.is_some_and(|until| now < until);
        if !in_holdoff {
            self.save_deadline = None;
            self.write_state();
        } else if self.save_deadline.is_none() {
            self.save_deadline = Some(now + self.save_interval);
        }
        self.holdoff_until = Some(now + self.holdoff);
    }

    fn write_state(&mut self) {
        debug!(file = %self.file.display(), "writing");
        // The watcher will echo this write back; eat exactly one event
        self.suppress += 1;
        if let Err(err) = self.manifest.save(&self.file) {
            warn!(file = %self.file.display(), %err, "cannot save manifest");
            self.suppress -= 1;
            // Leave the save timer armed so the next tick tries again
            self.save_deadline = Some(Instant::now() + self.save_interval);
            return;
        }
        if !self.watching_file {
            self.watch_file();
        }
    }

    /// The manifest file changed on disk: either our own write echoing
    /// back, or a genuine external edit to reload.
    fn file_event(&mut self) -> Option<ManifestDiff> {
        if self.suppress > 0 {
            self.suppress -= 1;
            debug!(file = %self.file.display(), "ignoring own write");
            return None;
        }
        debug!(file = %self.file.display(), "changed externally");
        let reloaded = match Manifest::load(&self.file, &self.home) {
            Ok(manifest) => manifest,
            Err(err) => {
                // Stale but valid beats empty
                warn!(file = %self.file.display(), %err, "cannot reload manifest");
                return None;
            }
        };
        let diff = self.manifest.diff(&reloaded);
        if diff.is_empty() {
            return None;
        }
        self.manifest = reloaded;
        Some(diff)
    }

    fn watch_file(&mut self) {
        if self.file.exists()
            && self
                .watcher
                .watch(&self.file, RecursiveMode::NonRecursive)
                .is_ok()
        {
            debug!(file = %self.file.display(), "watching");
            self.watching_file = true;
        }
    }
}

impl Drop for LiveSync {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread::sleep;
    use tempfile::TempDir;

    const TEST_HOLDOFF: Duration = Duration::from_millis(150);
    const TEST_SAVE: Duration = Duration::from_millis(600);

    fn item(path: &str) -> Item {
        Item::Path {
            path: path.to_string(),
        }
    }

    fn open(temp: &TempDir) -> LiveSync {
        let home = HomeDir::new(temp.path());
        let file = temp.path().join("data/backup.json");
        LiveSync::with_intervals(file, home, TEST_HOLDOFF, TEST_SAVE).unwrap()
    }

    fn items_on_disk(temp: &TempDir) -> usize {
        let home = HomeDir::new(temp.path());
        Manifest::load(&temp.path().join("data/backup.json"), &home)
            .unwrap()
            .len()
    }

    /// Poll until an external diff is reported or the deadline passes.
    fn poll_for_diff(sync: &mut LiveSync, deadline: Duration) -> Option<ManifestDiff> {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if let Some(diff) = sync.poll() {
                return Some(diff);
            }
            sleep(Duration::from_millis(20));
        }
        None
    }

    #[test]
    fn test_first_mutation_writes_immediately() {
        let temp = TempDir::new().unwrap();
        let mut sync = open(&temp);

        sync.add_item(item("~/a"));
        assert_eq!(items_on_disk(&temp), 1);
    }

    #[test]
    fn test_rapid_mutations_coalesce_into_one_write() {
        let temp = TempDir::new().unwrap();
        let mut sync = open(&temp);

        // Enter holdoff with a first write...
        sync.add_item(item("~/a"));
        assert_eq!(items_on_disk(&temp), 1);

        // ...then burst three edits inside the window
        sync.add_item(item("~/b"));
        sync.add_item(item("~/c"));
        sync.add_item(item("~/d"));
        assert_eq!(items_on_disk(&temp), 1);

        // One holdoff after the last mutation the burst hits the disk in a
        // single write
        sleep(TEST_HOLDOFF + Duration::from_millis(50));
        sync.poll();
        assert_eq!(items_on_disk(&temp), 4);
    }

    #[test]
    fn test_save_timer_bounds_staleness() {
        let temp = TempDir::new().unwrap();
        let mut sync = open(&temp);

        sync.add_item(item("~/a"));
        // Keep mutating so the holdoff window never expires
        let start = Instant::now();
        while start.elapsed() < TEST_SAVE + TEST_HOLDOFF {
            sync.add_item(item("~/more"));
            sync.poll();
            sleep(TEST_HOLDOFF / 3);
        }
        // The save timer must have fired at least once in between
        assert!(items_on_disk(&temp) > 1);
    }

    #[test]
    fn test_own_writes_are_suppressed() {
        let temp = TempDir::new().unwrap();
        let mut sync = open(&temp);

        sync.add_item(item("~/a"));
        // Give the watcher time to deliver the echo of our own write
        sleep(Duration::from_millis(300));
        assert!(sync.poll().is_none());
        assert_eq!(sync.manifest().len(), 1);
    }

    #[test]
    fn test_external_edit_is_reloaded_with_diff() {
        let temp = TempDir::new().unwrap();
        let home = HomeDir::new(temp.path());
        let mut sync = open(&temp);

        sync.add_item(item("~/a"));
        sleep(Duration::from_millis(300));
        assert!(sync.poll().is_none());

        // Another process rewrites the manifest
        let mut external = Manifest::load(&temp.path().join("data/backup.json"), &home).unwrap();
        external.push(item("~/b"));
        external.save(&temp.path().join("data/backup.json")).unwrap();

        let diff = poll_for_diff(&mut sync, Duration::from_secs(5)).expect("change picked up");
        assert!(diff.items);
        assert!(!diff.last_backup);
        assert_eq!(sync.manifest().len(), 2);
    }

    #[test]
    fn test_file_created_after_open_is_picked_up() {
        let temp = TempDir::new().unwrap();
        let home = HomeDir::new(temp.path());
        let mut sync = open(&temp);
        assert!(sync.manifest().is_empty());

        let mut external = Manifest::new();
        external.push(item("~/a"));
        external.save(&temp.path().join("data/backup.json")).unwrap();

        let diff = poll_for_diff(&mut sync, Duration::from_secs(5)).expect("creation picked up");
        assert!(diff.items);
        assert_eq!(sync.manifest().len(), 1);
    }

    #[test]
    fn test_drop_flushes_pending_changes() {
        let temp = TempDir::new().unwrap();
        {
            let mut sync = open(&temp);
            sync.add_item(item("~/a"));
            sync.add_item(item("~/b"));
        }
        assert_eq!(items_on_disk(&temp), 2);
    }
}
