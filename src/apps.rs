//! Desktop-file metadata for application backup items.
//!
//! Applications opt into backup by carrying an `[X-HomeVault]` group in
//! their `.desktop` file, declaring the paths and config entries that make
//! up their state:
//!
//! ```ini
//! [X-HomeVault]
//! BackupPathList=~/.local/share/foo/;~/.config/foo/
//! BackupConfigList=/apps/foo/
//! ```

use crate::paths::HomeDir;
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// System directory scanned for backup-capable applications.
pub const APPLICATIONS_DIR: &str = "/usr/share/applications";

const DESKTOP_GROUP: &str = "Desktop Entry";
const BACKUP_GROUP: &str = "X-HomeVault";
const KEY_NAME: &str = "Name";
const KEY_ICON: &str = "Icon";
const KEY_PATH_LIST: &str = "BackupPathList";
const KEY_CONFIG_LIST: &str = "BackupConfigList";
const LIST_SEPARATORS: &[char] = &[';', ':', ','];

/// Backup metadata declared by one application.
#[derive(Debug, Clone, PartialEq)]
pub struct AppInfo {
    /// Display name from the desktop entry (file stem when absent).
    pub name: String,
    /// Icon reference from the desktop entry, verbatim.
    pub icon: String,
    /// Declared backup paths, already home-relative.
    pub backup_paths: Vec<String>,
    /// Declared config entries, verbatim.
    pub backup_config: Vec<String>,
}

impl AppInfo {
    /// Parse one desktop file.
    ///
    /// Returns `None` when the file cannot be read or does not carry the
    /// `[X-HomeVault]` group -- such applications simply do not participate
    /// in backup. Declared paths outside home are dropped here: they are
    /// typically read-only for the backup process and could not be restored.
    pub fn load(desktop_file: &Path, home: &HomeDir) -> Option<Self> {
        let content = fs::read_to_string(desktop_file).ok()?;
        let mut group = "";
        let mut name = String::new();
        let mut icon = String::new();
        let mut path_list = String::new();
        let mut config_list = String::new();
        let mut has_backup_group = false;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                group = match header {
                    DESKTOP_GROUP => DESKTOP_GROUP,
                    BACKUP_GROUP => {
                        has_backup_group = true;
                        BACKUP_GROUP
                    }
                    _ => "",
                };
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            match (group, key) {
                (DESKTOP_GROUP, KEY_NAME) if name.is_empty() => name = value.to_string(),
                (DESKTOP_GROUP, KEY_ICON) if icon.is_empty() => icon = value.to_string(),
                (BACKUP_GROUP, KEY_PATH_LIST) => path_list = value.to_string(),
                (BACKUP_GROUP, KEY_CONFIG_LIST) => config_list = value.to_string(),
                _ => {}
            }
        }

        if !has_backup_group {
            return None;
        }
        debug!(file = %desktop_file.display(), "checking");

        if name.is_empty() {
            name = desktop_file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }

        let backup_paths = split_list(&path_list)
            .filter_map(|entry| home.relative(entry))
            .collect();
        let backup_config = split_list(&config_list).map(str::to_string).collect();

        Some(Self {
            name,
            icon,
            backup_paths,
            backup_config,
        })
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(LIST_SEPARATORS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// List every backup-capable application installed on the system.
pub fn scan_applications(home: &HomeDir) -> Result<Vec<(PathBuf, AppInfo)>> {
    scan_applications_in(Path::new(APPLICATIONS_DIR), home)
}

/// List backup-capable applications under an explicit directory.
pub fn scan_applications_in(dir: &Path, home: &HomeDir) -> Result<Vec<(PathBuf, AppInfo)>> {
    let mut apps = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(apps),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "desktop") {
            if let Some(info) = AppInfo::load(&path, home) {
                apps.push((path, info));
            }
        }
    }
    apps.sort_by(|a, b| a.1.name.cmp(&b.1.name));
    Ok(apps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn home() -> HomeDir {
        HomeDir::new(&PathBuf::from("/home/user"))
    }

    fn write_desktop(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_parses_backup_declarations() {
        let temp = TempDir::new().unwrap();
        let path = write_desktop(
            temp.path(),
            "foo.desktop",
            "[Desktop Entry]\n\
             Name=Foo App\n\
             Icon=foo-icon\n\
             [X-HomeVault]\n\
             BackupPathList=~/.local/share/foo/;/etc/foo.conf:~/.config/foo/\n\
             BackupConfigList=/apps/foo/,/desktop/sound\n",
        );

        let info = AppInfo::load(&path, &home()).unwrap();
        assert_eq!(info.name, "Foo App");
        assert_eq!(info.icon, "foo-icon");
        // /etc/foo.conf is outside home and dropped
        assert_eq!(info.backup_paths, vec![".local/share/foo/", ".config/foo/"]);
        assert_eq!(info.backup_config, vec!["/apps/foo/", "/desktop/sound"]);
    }

    #[test]
    fn test_load_requires_backup_group() {
        let temp = TempDir::new().unwrap();
        let path = write_desktop(
            temp.path(),
            "plain.desktop",
            "[Desktop Entry]\nName=Plain\n",
        );
        assert!(AppInfo::load(&path, &home()).is_none());
    }

    #[test]
    fn test_load_name_falls_back_to_file_stem() {
        let temp = TempDir::new().unwrap();
        let path = write_desktop(
            temp.path(),
            "bare.desktop",
            "[X-HomeVault]\nBackupPathList=~/.config/bare/\n",
        );
        let info = AppInfo::load(&path, &home()).unwrap();
        assert_eq!(info.name, "bare");
    }

    #[test]
    fn test_scan_applications_in() {
        let temp = TempDir::new().unwrap();
        write_desktop(
            temp.path(),
            "b.desktop",
            "[Desktop Entry]\nName=Beta\n[X-HomeVault]\nBackupPathList=~/.config/b/\n",
        );
        write_desktop(
            temp.path(),
            "a.desktop",
            "[Desktop Entry]\nName=Alpha\n[X-HomeVault]\nBackupPathList=~/.config/a/\n",
        );
        write_desktop(temp.path(), "plain.desktop", "[Desktop Entry]\nName=Plain\n");

        let apps = scan_applications_in(temp.path(), &home()).unwrap();
        let names: Vec<&str> = apps.iter().map(|(_, i)| i.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Beta"]);
    }
}
