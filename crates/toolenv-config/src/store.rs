use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::ConfigError;

/// Flat mapping from key to arbitrary JSON value. Keys are namespaced by
/// convention only.
pub type Configuration = Map<String, Value>;

/// Mapping written on first run.
pub fn default_configuration() -> Configuration {
    let mut values = Configuration::new();
    values.insert("node_path".into(), Value::String(String::new()));
    values.insert("java_path".into(), Value::String(String::new()));
    values
}

/// Identity of the backing file as observed on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

impl Fingerprint {
    pub(crate) fn of(path: &Path) -> Option<Self> {
        let metadata = fs::metadata(path).ok()?;
        Some(Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }
}

/// Last fingerprint the process itself produced or accepted. Shared with the
/// watcher; every save updates it while holding the lock.
pub(crate) type Baseline = Arc<Mutex<Option<Fingerprint>>>;

/// Outcome of a successful [`ConfigStore::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub path: PathBuf,
    /// Silent saves must not surface a "restart required" notice.
    pub silent: bool,
    /// Copy of an unreadable document taken before it was replaced.
    pub backup: Option<PathBuf>,
}

/// JSON-backed configuration document.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    values: Configuration,
    baseline: Baseline,
    unreadable_on_disk: bool,
}

impl ConfigStore {
    /// Opens the document at `path`, creating it with the default mapping
    /// when it does not exist.
    ///
    /// An unreadable or unparseable document is left untouched on disk and
    /// the in-memory mapping falls back to the defaults.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut store = Self {
            path: path.into(),
            values: Configuration::new(),
            baseline: Arc::new(Mutex::new(None)),
            unreadable_on_disk: false,
        };
        store.reload()?;
        Ok(store)
    }

    /// Re-reads the backing document using the same rules as [`open`](Self::open).
    pub fn reload(&mut self) -> Result<&Configuration, ConfigError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str::<Configuration>(&raw) {
                Ok(values) => {
                    self.values = values;
                    self.unreadable_on_disk = false;
                }
                Err(err) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %err,
                        "configuration is not a JSON object, falling back to defaults"
                    );
                    self.values = default_configuration();
                    self.unreadable_on_disk = true;
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "creating default configuration");
                self.values = default_configuration();
                self.unreadable_on_disk = false;
                self.save(true)?;
                return Ok(&self.values);
            }
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to read configuration, falling back to defaults"
                );
                self.values = default_configuration();
                self.unreadable_on_disk = true;
            }
        }
        *self.baseline.lock() = Fingerprint::of(&self.path);
        Ok(&self.values)
    }

    /// Serializes the mapping and atomically replaces the backing document.
    pub fn save(&mut self, silent: bool) -> Result<SaveReport, ConfigError> {
        let json = serde_json::to_string_pretty(&self.values)?;

        let mut baseline = self.baseline.lock();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| ConfigError::io(parent, err))?;
        }

        let backup = if self.unreadable_on_disk {
            let backup = sibling(&self.path, "bak");
            match fs::copy(&self.path, &backup) {
                Ok(_) => {
                    tracing::warn!(
                        backup = %backup.display(),
                        "kept a copy of the unreadable configuration"
                    );
                    Some(backup)
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => None,
                Err(err) => return Err(ConfigError::io(&backup, err)),
            }
        } else {
            None
        };

        let staging = sibling(&self.path, "tmp");
        fs::write(&staging, json).map_err(|err| ConfigError::io(&staging, err))?;
        if let Err(err) = fs::rename(&staging, &self.path) {
            let _ = fs::remove_file(&staging);
            return Err(ConfigError::io(&self.path, err));
        }

        *baseline = Fingerprint::of(&self.path);
        drop(baseline);
        self.unreadable_on_disk = false;

        tracing::debug!(path = %self.path.display(), silent, "configuration saved");
        Ok(SaveReport {
            path: self.path.clone(),
            silent,
            backup,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Stores `value` under `key` in memory and returns the previous value.
    /// Call [`save`](Self::save) to persist.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn values(&self) -> &Configuration {
        &self.values
    }

    /// True when the last load could not parse the document on disk.
    pub fn fell_back_to_defaults(&self) -> bool {
        self.unreadable_on_disk
    }

    pub(crate) fn baseline(&self) -> Baseline {
        Arc::clone(&self.baseline)
    }
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(extension);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn first_open_persists_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let store = ConfigStore::open(&path).unwrap();
        assert_eq!(store.values(), &default_configuration());

        let raw = fs::read_to_string(&path).unwrap();
        let on_disk: Configuration = serde_json::from_str(&raw).unwrap();
        assert_eq!(on_disk, default_configuration());
    }

    #[test]
    fn set_save_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"node_path": "", "java_path": ""}"#).unwrap();

        let mut store = ConfigStore::open(&path).unwrap();
        store.set("node_path", json!("C:/nodejs"));
        store.save(false).unwrap();

        let reopened = ConfigStore::open(&path).unwrap();
        let expected: Configuration =
            serde_json::from_value(json!({"node_path": "C:/nodejs", "java_path": ""})).unwrap();
        assert_eq!(reopened.values(), &expected);
    }

    #[test]
    fn plugin_values_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut store = ConfigStore::open(&path).unwrap();
        let nested = json!({
            "versions": ["7.6", "8.5"],
            "home": "/opt/gradle",
            "pinned": true,
            "retries": 3,
            "mirror": null
        });
        store.set("gradle", nested.clone());
        store.save(true).unwrap();

        let reopened = ConfigStore::open(&path).unwrap();
        assert_eq!(reopened.get("gradle"), Some(&nested));
    }

    #[test]
    fn corrupt_document_is_not_overwritten_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let store = ConfigStore::open(&path).unwrap();
        assert!(store.fell_back_to_defaults());
        assert_eq!(store.values(), &default_configuration());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn saving_over_corrupt_document_keeps_a_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        let mut store = ConfigStore::open(&path).unwrap();
        store.set("java_path", json!("/opt/jdk"));
        let report = store.save(false).unwrap();

        let backup = report.backup.expect("backup of unreadable document");
        assert_eq!(fs::read_to_string(backup).unwrap(), "[1, 2, 3]");
        assert!(!store.fell_back_to_defaults());
        let reopened = ConfigStore::open(&path).unwrap();
        assert_eq!(reopened.get("java_path"), Some(&json!("/opt/jdk")));
    }

    #[test]
    fn save_leaves_no_staging_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut store = ConfigStore::open(&path).unwrap();
        store.save(false).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("config.json")]);
    }
}
