use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::ManifestError;

/// Ordered, duplicate-free list of installed plugin filenames.
#[derive(Debug, Clone)]
pub struct PluginManifest {
    path: PathBuf,
    filenames: Vec<String>,
}

impl PluginManifest {
    /// Reads the manifest. A missing file is an empty manifest; an
    /// unreadable one is logged and treated as empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filenames = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(filenames) => dedup(filenames),
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "plugin manifest is unreadable, starting with no plugins"
                    );
                    Vec::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read plugin manifest, starting with no plugins"
                );
                Vec::new()
            }
        };
        Self { path, filenames }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.filenames.iter().any(|name| name == filename)
    }

    /// Persists `filenames` (first occurrence wins) and adopts them. On
    /// failure the in-memory list is left untouched.
    pub fn replace(&mut self, filenames: Vec<String>) -> Result<(), ManifestError> {
        let filenames = dedup(filenames);
        let json = serde_json::to_string_pretty(&filenames)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ManifestError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, json)
            .and_then(|()| fs::rename(&staging, &self.path))
            .map_err(|source| {
                let _ = fs::remove_file(&staging);
                ManifestError::Io {
                    path: self.path.clone(),
                    source,
                }
            })?;
        self.filenames = filenames;
        tracing::debug!(path = %self.path.display(), count = self.filenames.len(), "plugin manifest saved");
        Ok(())
    }
}

fn dedup(filenames: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(filenames.len());
    for name in filenames {
        if !unique.contains(&name) {
            unique.push(name);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn missing_manifest_is_empty() {
        let dir = tempdir().unwrap();
        let manifest = PluginManifest::load(dir.path().join("plugins.json"));
        assert!(manifest.filenames().is_empty());
    }

    #[test]
    fn replace_deduplicates_and_persists_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plugins.json");
        let mut manifest = PluginManifest::load(&path);
        manifest
            .replace(vec!["b.so".into(), "a.so".into(), "b.so".into()])
            .unwrap();
        assert_eq!(manifest.filenames(), ["b.so", "a.so"]);

        let reloaded = PluginManifest::load(&path);
        assert_eq!(reloaded.filenames(), ["b.so", "a.so"]);
        assert!(!dir.path().join("plugins.json.tmp").exists());
    }

    #[test]
    fn duplicated_entries_on_disk_are_collapsed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plugins.json");
        fs::write(&path, r#"["a.so", "a.so", "c.so"]"#).unwrap();
        assert_eq!(PluginManifest::load(&path).filenames(), ["a.so", "c.so"]);
    }

    #[test]
    fn corrupt_manifest_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plugins.json");
        fs::write(&path, "{not json").unwrap();
        assert!(PluginManifest::load(&path).filenames().is_empty());
    }

    #[test]
    fn failed_write_keeps_previous_list() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file, not a directory").unwrap();
        let mut manifest = PluginManifest::load(blocker.join("plugins.json"));
        assert!(manifest.replace(vec!["a.so".into()]).is_err());
        assert!(manifest.filenames().is_empty());
    }
}
