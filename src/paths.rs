//! Home-relative path handling.
//!
//! Everything HomeVault backs up lives under the user's home directory.
//! Paths are stored and transported in home-relative form (`Documents/`,
//! `./` for home itself) and shown to the user in tilde form (`~/Documents`).

use std::path::Path;

const TILDE: &str = "~";
const HOME_PREFIX: &str = "~/";
const DOT_SLASH: &str = "./";

/// The user's home directory, with trailing separators trimmed.
#[derive(Debug, Clone)]
pub struct HomeDir {
    path: String,
}

impl HomeDir {
    /// Wrap an explicit home directory path.
    pub fn new(path: &Path) -> Self {
        let mut path = path.to_string_lossy().into_owned();
        while path.len() > 1 && path.ends_with('/') {
            path.pop();
        }
        Self { path }
    }

    /// The home directory of the current process.
    pub fn current() -> Self {
        Self::new(&dirs::home_dir().unwrap_or_default())
    }

    /// The canonical home path string (no trailing separator).
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Convert a path to home-relative form.
    ///
    /// Returns `Some("./")` for home itself, `Some(tail)` for anything under
    /// home (leading separator runs collapsed), the input unchanged if it is
    /// already a bare relative path, and `None` for absolute paths outside
    /// home -- those cannot be backed up and must be dropped by the caller.
    pub fn relative(&self, path: &str) -> Option<String> {
        if path.is_empty() {
            return None;
        }
        if let Some(rest) = path.strip_prefix(self.path.as_str()) {
            if rest.is_empty() {
                // Exactly the home path
                return Some(DOT_SLASH.to_string());
            }
            if rest.starts_with('/') {
                // /home/user//////foo => foo, /home/user////// => ./
                let tail = strip_leading_slashes(rest);
                return Some(if tail.is_empty() {
                    DOT_SLASH.to_string()
                } else {
                    tail.to_string()
                });
            }
            // Some sibling like /home/username2 falls through
        }
        if let Some(rest) = path.strip_prefix(HOME_PREFIX) {
            // ~//////foo => foo, ~////// => ./
            let tail = strip_leading_slashes(rest);
            return Some(if tail.is_empty() {
                DOT_SLASH.to_string()
            } else {
                tail.to_string()
            });
        }
        if path.starts_with(TILDE) {
            return Some(DOT_SLASH.to_string());
        }
        if !path.starts_with('/') {
            // Looks like it's already relative to home
            return Some(path.to_string());
        }
        // Any other absolute path is not backupable
        None
    }

    /// Produce the human-facing form of a path.
    ///
    /// Home itself becomes `~`, anything under home becomes `~/tail`,
    /// `./`-prefixed paths are rewritten with the `~/` prefix and bare
    /// relative paths get it prepended. Absolute paths outside home and
    /// already-tilde'd paths pass through unchanged; unlike [`relative`],
    /// this never fails.
    ///
    /// [`relative`]: HomeDir::relative
    pub fn beautify(&self, path: &str) -> String {
        if let Some(rest) = path.strip_prefix(self.path.as_str()) {
            if rest.is_empty() {
                return TILDE.to_string();
            }
            if rest.starts_with('/') {
                let tail = strip_leading_slashes(rest);
                return if tail.is_empty() {
                    TILDE.to_string()
                } else {
                    format!("{}{}", HOME_PREFIX, tail)
                };
            }
            // Weird absolute path, leave it alone
            return path.to_string();
        }
        if path.starts_with('/') || path.starts_with(TILDE) {
            // Either already beautiful or irreparably ugly
            return path.to_string();
        }
        if let Some(rest) = path.strip_prefix(DOT_SLASH) {
            return format!("{}{}", HOME_PREFIX, strip_leading_slashes(rest));
        }
        format!("{}{}", HOME_PREFIX, path)
    }
}

fn strip_leading_slashes(path: &str) -> &str {
    path.trim_start_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn home() -> HomeDir {
        HomeDir::new(&PathBuf::from("/home/user"))
    }

    #[test]
    fn test_relative_home_itself() {
        let h = home();
        assert_eq!(h.relative("/home/user"), Some("./".to_string()));
        assert_eq!(h.relative("/home/user//////"), Some("./".to_string()));
        assert_eq!(h.relative("~"), Some("./".to_string()));
        assert_eq!(h.relative("~//////"), Some("./".to_string()));
    }

    #[test]
    fn test_relative_under_home() {
        let h = home();
        assert_eq!(
            h.relative("/home/user/Documents"),
            Some("Documents".to_string())
        );
        assert_eq!(
            h.relative("/home/user//////Documents/a.txt"),
            Some("Documents/a.txt".to_string())
        );
        assert_eq!(h.relative("~/Pictures/"), Some("Pictures/".to_string()));
    }

    #[test]
    fn test_relative_passes_bare_relative_through() {
        let h = home();
        assert_eq!(h.relative("Documents/"), Some("Documents/".to_string()));
    }

    #[test]
    fn test_relative_rejects_outside_home() {
        let h = home();
        assert_eq!(h.relative("/etc/passwd"), None);
        // A sibling user's directory shares the prefix but not the path
        assert_eq!(h.relative("/home/user2/Documents"), None);
        assert_eq!(h.relative(""), None);
    }

    #[test]
    fn test_beautify() {
        let h = home();
        assert_eq!(h.beautify("/home/user"), "~");
        assert_eq!(h.beautify("/home/user//////"), "~");
        assert_eq!(h.beautify("/home/user/Documents"), "~/Documents");
        assert_eq!(h.beautify("Documents/notes.txt"), "~/Documents/notes.txt");
        assert_eq!(h.beautify(".///Documents"), "~/Documents");
        assert_eq!(h.beautify("/etc/passwd"), "/etc/passwd");
        assert_eq!(h.beautify("~/Documents"), "~/Documents");
    }

    #[test]
    fn test_relative_beautify_round_trip() {
        let h = home();
        for p in ["Documents/", "Documents/a.txt", ".config/app/state", "./"] {
            assert_eq!(h.relative(&h.beautify(p)).as_deref(), Some(p));
        }
    }
}
