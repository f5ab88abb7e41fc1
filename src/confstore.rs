//! Hierarchical configuration store access.
//!
//! The store is a slash-delimited key-value namespace (dconf on a real
//! system): `/apps/foo/bar` is a key, `/apps/foo/` is a group. HomeVault
//! only needs five operations, expressed by the [`ConfigStore`] trait so the
//! codec and the backup run can be driven against an in-memory store in
//! tests.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::debug;

/// Access to a hierarchical key-value configuration store.
pub trait ConfigStore {
    /// List the immediate children of a group path. Subgroup names end with
    /// `/`, key names do not. Unknown groups list as empty.
    fn list(&self, dir: &str) -> Result<Vec<String>>;

    /// Read a key's value. `Ok(None)` means the key is not set.
    fn read(&self, key: &str) -> Result<Option<Value>>;

    /// Write a single key.
    fn write(&self, key: &str, value: &Value) -> Result<()>;

    /// Remove a single key, or an entire subtree when `path` ends with `/`.
    fn clear(&self, path: &str) -> Result<()>;

    /// Flush pending writes to durable storage.
    fn sync(&self) -> Result<()>;
}

// ============ DCONF BACKEND ============

/// Store backed by the system `dconf` command-line tool.
pub struct DconfStore {
    dconf_path: PathBuf,
}

impl DconfStore {
    /// Create a store using the system `dconf` binary.
    pub fn new() -> Self {
        Self {
            dconf_path: PathBuf::from("dconf"),
        }
    }

    /// Create a store using an explicit `dconf` binary path.
    pub fn with_binary(dconf_path: PathBuf) -> Self {
        Self { dconf_path }
    }

    /// Run a dconf subcommand and return its stdout.
    fn run_dconf(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.dconf_path)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .context("Cannot execute dconf")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("dconf {} failed: {}", args.first().unwrap_or(&""), stderr);
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for DconfStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for DconfStore {
    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let output = self.run_dconf(&["list", dir])?;
        Ok(output
            .lines()
            .map(|line| line.to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    fn read(&self, key: &str) -> Result<Option<Value>> {
        let output = self.run_dconf(&["read", key])?;
        let text = output.trim();
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(variant_to_json(text)))
    }

    fn write(&self, key: &str, value: &Value) -> Result<()> {
        let variant = json_to_variant(value)
            .with_context(|| format!("Unsupported value for {}", key))?;
        self.run_dconf(&["write", key, &variant])?;
        Ok(())
    }

    fn clear(&self, path: &str) -> Result<()> {
        // -f removes a whole subtree when given a group path
        self.run_dconf(&["reset", "-f", path])?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        // Each dconf invocation syncs on exit; nothing is buffered here.
        Ok(())
    }
}

/// Convert GVariant text output to a JSON value, preserving scalar types.
fn variant_to_json(text: &str) -> Value {
    // Strip explicit type annotations like "int32 5" or "uint64 5"
    let text = match text.split_once(' ') {
        Some((prefix, rest))
            if matches!(
                prefix,
                "int16" | "uint16" | "int32" | "uint32" | "int64" | "uint64" | "double" | "byte"
            ) =>
        {
            rest
        }
        _ => text,
    };

    if text == "true" {
        return Value::Bool(true);
    }
    if text == "false" {
        return Value::Bool(false);
    }
    if let Ok(n) = text.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = text.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    if text.len() >= 2 && (text.starts_with('\'') && text.ends_with('\'')) {
        return Value::String(text[1..text.len() - 1].replace("\\'", "'").replace("\\\\", "\\"));
    }
    if text.len() >= 2 && (text.starts_with('"') && text.ends_with('"')) {
        return Value::String(text[1..text.len() - 1].replace("\\\"", "\"").replace("\\\\", "\\"));
    }
    // Anything else (tuples, arrays, ...) is carried as its textual form
    Value::String(text.to_string())
}

/// Render a JSON scalar as GVariant text for `dconf write`.
fn json_to_variant(value: &Value) -> Result<String> {
    match value {
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))),
        other => bail!("Value {} is not a storable scalar", other),
    }
}

// ============ IN-MEMORY STORE ============

/// In-memory [`ConfigStore`] used by tests and dry runs.
///
/// Keys are stored flat under their absolute paths; groups exist implicitly
/// as common prefixes, which matches how dconf reports its namespace.
#[derive(Default)]
pub struct MemoryStore {
    entries: RefCell<BTreeMap<String, Value>>,
    sync_count: Cell<usize>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key directly, bypassing the trait (test setup).
    pub fn insert(&self, key: &str, value: Value) {
        self.entries.borrow_mut().insert(key.to_string(), value);
    }

    /// Snapshot of all keys currently set.
    pub fn keys(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }

    /// Direct value lookup (test assertions).
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.borrow().get(key).cloned()
    }

    /// How many times `sync()` has been called.
    pub fn sync_count(&self) -> usize {
        self.sync_count.get()
    }
}

impl ConfigStore for MemoryStore {
    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let entries = self.entries.borrow();
        let mut children: Vec<String> = Vec::new();
        for key in entries.keys() {
            let Some(rest) = key.strip_prefix(dir) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            let child = match rest.split_once('/') {
                Some((name, _)) => format!("{}/", name),
                None => rest.to_string(),
            };
            if children.last() != Some(&child) {
                children.push(child);
            }
        }
        children.dedup();
        Ok(children)
    }

    fn read(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn write(&self, key: &str, value: &Value) -> Result<()> {
        match value {
            Value::Bool(_) | Value::Number(_) | Value::String(_) => {
                self.entries
                    .borrow_mut()
                    .insert(key.to_string(), value.clone());
                Ok(())
            }
            other => bail!("Value {} is not a storable scalar", other),
        }
    }

    fn clear(&self, path: &str) -> Result<()> {
        let mut entries = self.entries.borrow_mut();
        if path.ends_with('/') {
            let stale: Vec<String> = entries
                .keys()
                .filter(|k| k.starts_with(path))
                .cloned()
                .collect();
            for key in stale {
                debug!(%key, "clearing");
                entries.remove(&key);
            }
        } else {
            entries.remove(path);
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.sync_count.set(self.sync_count.get() + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_store_list_immediate_children() {
        let store = MemoryStore::new();
        store.insert("/apps/foo/a", json!(1));
        store.insert("/apps/foo/b", json!(2));
        store.insert("/apps/foo/sub/c", json!(3));
        store.insert("/apps/other", json!(4));

        let children = store.list("/apps/foo/").unwrap();
        assert_eq!(children, vec!["a", "b", "sub/"]);

        let top = store.list("/apps/").unwrap();
        assert_eq!(top, vec!["foo/", "other"]);
    }

    #[test]
    fn test_memory_store_clear_subtree() {
        let store = MemoryStore::new();
        store.insert("/apps/foo/a", json!(1));
        store.insert("/apps/foo/sub/c", json!(3));
        store.insert("/apps/bar", json!(4));

        store.clear("/apps/foo/").unwrap();
        assert_eq!(store.keys(), vec!["/apps/bar"]);
    }

    #[test]
    fn test_memory_store_rejects_composite_values() {
        let store = MemoryStore::new();
        assert!(store.write("/apps/foo/a", &json!({"x": 1})).is_err());
        assert!(store.write("/apps/foo/a", &json!(1)).is_ok());
    }

    #[test]
    fn test_variant_to_json_scalars() {
        assert_eq!(variant_to_json("true"), json!(true));
        assert_eq!(variant_to_json("42"), json!(42));
        assert_eq!(variant_to_json("int32 42"), json!(42));
        assert_eq!(variant_to_json("2.5"), json!(2.5));
        assert_eq!(variant_to_json("'hello'"), json!("hello"));
        assert_eq!(variant_to_json("'it\\'s'"), json!("it's"));
    }

    #[test]
    fn test_json_to_variant_scalars() {
        assert_eq!(json_to_variant(&json!(true)).unwrap(), "true");
        assert_eq!(json_to_variant(&json!(42)).unwrap(), "42");
        assert_eq!(json_to_variant(&json!("it's")).unwrap(), "'it\\'s'");
        assert!(json_to_variant(&json!([1, 2])).is_err());
    }
}
