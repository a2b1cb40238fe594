use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ChangeBroadcast, EnvError, EnvStore, PathEntry, PathSyntax, Scope};

/// Upper bound on how long a change broadcast may wait for listeners.
pub const BROADCAST_TIMEOUT: Duration = Duration::from_secs(5);

/// Every variable persisted in one scope at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvSnapshot {
    pub scope: Scope,
    pub variables: BTreeMap<String, String>,
}

/// Front door to the persistent environment.
///
/// Each mutating call goes straight to the backing [`EnvStore`], updates the
/// current process's environment on success, and then broadcasts the change
/// exactly once. A failed broadcast is logged and never fails the call.
pub struct EnvironmentRegistry {
    store: Box<dyn EnvStore>,
    broadcast: Box<dyn ChangeBroadcast>,
    mirror_process: bool,
    timeout: Duration,
}

impl EnvironmentRegistry {
    pub fn new(store: impl EnvStore + 'static, broadcast: impl ChangeBroadcast + 'static) -> Self {
        Self {
            store: Box::new(store),
            broadcast: Box::new(broadcast),
            mirror_process: true,
            timeout: BROADCAST_TIMEOUT,
        }
    }

    /// Registry store plus `WM_SETTINGCHANGE`.
    #[cfg(windows)]
    pub fn for_current_platform() -> Result<Self, EnvError> {
        Ok(Self::new(crate::RegistryStore::new(), crate::WindowsBroadcast))
    }

    /// Shell profile files; new login shells read them on start.
    #[cfg(unix)]
    pub fn for_current_platform() -> Result<Self, EnvError> {
        Ok(Self::new(
            crate::ProfileStore::default_locations()?,
            crate::NoopBroadcast,
        ))
    }

    #[cfg(not(any(windows, unix)))]
    pub fn for_current_platform() -> Result<Self, EnvError> {
        Err(EnvError::UnsupportedPlatform)
    }

    /// Leaves the current process's environment untouched.
    pub fn without_process_mirror(mut self) -> Self {
        self.mirror_process = false;
        self
    }

    pub fn with_broadcast_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path_syntax(&self) -> PathSyntax {
        self.store.path_syntax()
    }

    pub fn get(&self, name: &str, scope: Scope) -> Result<Option<String>, EnvError> {
        self.store.read(name, scope)
    }

    pub fn set(&self, name: &str, value: &str, scope: Scope) -> Result<(), EnvError> {
        self.store.check_name(name)?;
        self.store.write(name, value, scope)?;
        tracing::info!(%name, %scope, "environment variable updated");
        self.mirror_set(name, value);
        self.announce();
        Ok(())
    }

    pub fn remove(&self, name: &str, scope: Scope) -> Result<(), EnvError> {
        self.store.delete(name, scope)?;
        tracing::info!(%name, %scope, "environment variable removed");
        if self.mirror_process {
            env::remove_var(name);
        }
        self.announce();
        Ok(())
    }

    /// Appends `entry` to the scope's search path unless an identical
    /// segment is already present. Returns whether the stored value changed.
    pub fn append_to_path(
        &self,
        entry: impl Into<PathEntry>,
        scope: Scope,
    ) -> Result<bool, EnvError> {
        let syntax = self.store.path_syntax();
        let entry = entry.into().render(&syntax);
        let current = self.store.read(syntax.variable, scope)?;

        let present = current
            .as_deref()
            .is_some_and(|value| syntax.split(value).any(|segment| segment == entry));
        let changed = !entry.is_empty() && !present;
        if changed {
            let updated = match current.as_deref() {
                None | Some("") => entry.clone(),
                Some(value) => format!("{value}{}{entry}", syntax.separator),
            };
            self.store.write(syntax.variable, &updated, scope)?;
            tracing::info!(%scope, %entry, "search path entry added");
            self.mirror_path(&syntax, &entry, true);
        } else {
            tracing::debug!(%scope, %entry, "search path already contains entry");
        }
        self.announce();
        Ok(changed)
    }

    /// Removes every segment equal to `entry`. Returns whether the stored
    /// value changed.
    pub fn remove_from_path(
        &self,
        entry: impl Into<PathEntry>,
        scope: Scope,
    ) -> Result<bool, EnvError> {
        let syntax = self.store.path_syntax();
        let entry = entry.into().render(&syntax);
        let current = self.store.read(syntax.variable, scope)?;

        let mut changed = false;
        if let Some(value) = current {
            let kept: Vec<&str> = syntax
                .split(&value)
                .filter(|segment| *segment != entry)
                .collect();
            let updated = kept.join(&syntax.separator.to_string());
            if updated != value {
                if updated.is_empty() {
                    self.store.delete(syntax.variable, scope)?;
                } else {
                    self.store.write(syntax.variable, &updated, scope)?;
                }
                tracing::info!(%scope, %entry, "search path entry removed");
                self.mirror_path(&syntax, &entry, false);
                changed = true;
            }
        }
        self.announce();
        Ok(changed)
    }

    pub fn snapshot(&self, scope: Scope) -> Result<EnvSnapshot, EnvError> {
        Ok(EnvSnapshot {
            scope,
            variables: self.store.list(scope)?.into_iter().collect(),
        })
    }

    /// Writes back every variable in `snapshot` whose stored value differs.
    /// Variables absent from the snapshot are left alone. Returns the number
    /// of variables written.
    pub fn restore(&self, snapshot: &EnvSnapshot) -> Result<usize, EnvError> {
        let scope = snapshot.scope;
        let mut written = 0;
        let result = snapshot.variables.iter().try_for_each(|(name, value)| {
            if self.store.read(name, scope)?.as_deref() == Some(value.as_str()) {
                return Ok(());
            }
            self.store.check_name(name)?;
            self.store.write(name, value, scope)?;
            self.mirror_set(name, value);
            written += 1;
            Ok::<(), EnvError>(())
        });
        tracing::info!(%scope, written, "environment snapshot restored");
        if result.is_ok() || written > 0 {
            self.announce();
        }
        result.map(|()| written)
    }

    fn announce(&self) {
        if let Err(err) = self.broadcast.broadcast(self.timeout) {
            tracing::warn!(error = %err, "environment change broadcast failed");
        }
    }

    fn mirror_set(&self, name: &str, value: &str) {
        if self.mirror_process {
            env::set_var(name, self.store.path_syntax().expand(value));
        }
    }

    fn mirror_path(&self, syntax: &PathSyntax, entry: &str, add: bool) {
        if !self.mirror_process {
            return;
        }
        let expanded = PathBuf::from(syntax.expand(entry));
        let mut paths: Vec<PathBuf> = env::var_os(syntax.variable)
            .map(|value| env::split_paths(&value).collect())
            .unwrap_or_default();
        let present = paths.contains(&expanded);
        if add && !present {
            paths.push(expanded);
        } else if !add && present {
            paths.retain(|path| *path != expanded);
        } else {
            return;
        }
        match env::join_paths(paths) {
            Ok(joined) => env::set_var(syntax.variable, joined),
            Err(err) => tracing::debug!(error = %err, "search path not mirrored into process"),
        }
    }
}

impl fmt::Debug for EnvironmentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentRegistry")
            .field("syntax", &self.store.path_syntax())
            .field("mirror_process", &self.mirror_process)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;
    use crate::{MemoryStore, ProfileStore, RecordingBroadcast};

    fn memory_registry() -> (EnvironmentRegistry, Arc<MemoryStore>, Arc<RecordingBroadcast>) {
        let store = Arc::new(MemoryStore::new());
        let broadcast = Arc::new(RecordingBroadcast::new());
        let registry = EnvironmentRegistry::new(Arc::clone(&store), Arc::clone(&broadcast))
            .without_process_mirror();
        (registry, store, broadcast)
    }

    #[test]
    fn set_then_get_broadcasts_once() {
        let (registry, _, broadcast) = memory_registry();
        registry.set("JAVA_HOME", "/opt/jdk-21", Scope::User).unwrap();
        assert_eq!(
            registry.get("JAVA_HOME", Scope::User).unwrap().as_deref(),
            Some("/opt/jdk-21")
        );
        assert_eq!(registry.get("JAVA_HOME", Scope::Machine).unwrap(), None);
        assert_eq!(broadcast.count(), 1);
    }

    #[test]
    fn append_is_idempotent() {
        let (registry, store, broadcast) = memory_registry();
        store.insert("PATH", "/usr/bin:/bin", Scope::User);

        assert!(registry.append_to_path("/opt/node/bin", Scope::User).unwrap());
        let once = registry.get("PATH", Scope::User).unwrap();
        assert!(!registry.append_to_path("/opt/node/bin", Scope::User).unwrap());
        let twice = registry.get("PATH", Scope::User).unwrap();

        assert_eq!(once.as_deref(), Some("/usr/bin:/bin:/opt/node/bin"));
        assert_eq!(once, twice);
        assert_eq!(broadcast.count(), 2);
    }

    #[test]
    fn append_then_remove_restores_previous_value() {
        let (registry, store, _) = memory_registry();
        for before in ["/usr/bin:/bin", "/usr/bin:", ""] {
            store.insert("PATH", before, Scope::Machine);
            registry.append_to_path("/opt/jdk/bin", Scope::Machine).unwrap();
            registry.remove_from_path("/opt/jdk/bin", Scope::Machine).unwrap();
            let after = registry.get("PATH", Scope::Machine).unwrap();
            if before.is_empty() {
                assert_eq!(after, None);
            } else {
                assert_eq!(after.as_deref(), Some(before));
            }
        }

        store.delete("PATH", Scope::User).unwrap();
        registry.append_to_path("/opt/jdk/bin", Scope::User).unwrap();
        registry.remove_from_path("/opt/jdk/bin", Scope::User).unwrap();
        assert_eq!(registry.get("PATH", Scope::User).unwrap(), None);
    }

    #[test]
    fn remove_missing_entry_is_a_noop() {
        let (registry, store, broadcast) = memory_registry();
        store.insert("PATH", "/usr/bin", Scope::User);
        assert!(!registry.remove_from_path("/opt/none", Scope::User).unwrap());
        assert_eq!(
            registry.get("PATH", Scope::User).unwrap().as_deref(),
            Some("/usr/bin")
        );
        assert_eq!(broadcast.count(), 1);
    }

    #[test]
    fn matches_segments_exactly() {
        let (registry, store, _) = memory_registry();
        store.insert("PATH", "/opt/node/bin/", Scope::User);
        assert!(registry.append_to_path("/opt/node/bin", Scope::User).unwrap());
        assert_eq!(
            registry.get("PATH", Scope::User).unwrap().as_deref(),
            Some("/opt/node/bin/:/opt/node/bin")
        );
    }

    #[test]
    fn variable_entries_use_the_store_syntax() {
        let store = Arc::new(MemoryStore::with_syntax(PathSyntax::windows()));
        store.insert("Path", r"C:\Windows", Scope::User);
        let registry =
            EnvironmentRegistry::new(Arc::clone(&store), RecordingBroadcast::new()).without_process_mirror();

        registry
            .append_to_path(PathEntry::under_variable("GRADLE_HOME"), Scope::User)
            .unwrap();
        assert_eq!(
            registry.get("Path", Scope::User).unwrap().as_deref(),
            Some(r"C:\Windows;%GRADLE_HOME%\bin")
        );
    }

    #[test]
    fn broadcast_failure_does_not_fail_the_write() {
        let (registry, _, broadcast) = memory_registry();
        broadcast.fail_with_errors(true);
        registry.set("NODE_HOME", "/opt/node", Scope::User).unwrap();
        assert_eq!(
            registry.get("NODE_HOME", Scope::User).unwrap().as_deref(),
            Some("/opt/node")
        );
        assert_eq!(broadcast.count(), 1);
    }

    #[test]
    fn unavailable_store_surfaces_errors() {
        let (registry, store, broadcast) = memory_registry();
        store.set_available(false);
        assert!(matches!(
            registry.get("PATH", Scope::Machine),
            Err(EnvError::Store { scope: Scope::Machine, .. })
        ));
        assert!(registry.append_to_path("/opt/x", Scope::Machine).is_err());
        assert_eq!(broadcast.count(), 0);
    }

    #[test]
    fn snapshot_and_restore() {
        let (registry, store, broadcast) = memory_registry();
        store.insert("JAVA_HOME", "/opt/jdk-17", Scope::User);
        store.insert("NODE_HOME", "/opt/node", Scope::User);
        let snapshot = registry.snapshot(Scope::User).unwrap();
        assert_eq!(snapshot.variables.len(), 2);

        registry.set("JAVA_HOME", "/opt/jdk-21", Scope::User).unwrap();
        registry.set("EXTRA", "1", Scope::User).unwrap();
        let before = broadcast.count();

        assert_eq!(registry.restore(&snapshot).unwrap(), 1);
        assert_eq!(broadcast.count(), before + 1);
        assert_eq!(
            registry.get("JAVA_HOME", Scope::User).unwrap().as_deref(),
            Some("/opt/jdk-17")
        );
        assert_eq!(registry.get("EXTRA", Scope::User).unwrap().as_deref(), Some("1"));

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: EnvSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn mirrors_into_the_process_environment() {
        let registry = EnvironmentRegistry::new(MemoryStore::new(), RecordingBroadcast::new());
        env::set_var("TOOLENV_MIRROR_TEST_BASE", "/srv/tools");
        registry
            .set("TOOLENV_MIRROR_TEST", "$TOOLENV_MIRROR_TEST_BASE/gradle", Scope::User)
            .unwrap();
        assert_eq!(env::var("TOOLENV_MIRROR_TEST").unwrap(), "/srv/tools/gradle");

        registry.remove("TOOLENV_MIRROR_TEST", Scope::User).unwrap();
        assert!(env::var("TOOLENV_MIRROR_TEST").is_err());
    }

    #[test]
    fn profile_backed_search_path_round_trip() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join(".profile"), dir.path().join("machine.sh"));
        let registry =
            EnvironmentRegistry::new(store, RecordingBroadcast::new()).without_process_mirror();

        let before = registry.get("PATH", Scope::User).unwrap();
        registry
            .append_to_path(PathEntry::under_variable("JAVA_HOME"), Scope::User)
            .unwrap();
        assert_eq!(
            registry.get("PATH", Scope::User).unwrap().as_deref(),
            Some("$PATH:$JAVA_HOME/bin")
        );
        registry
            .remove_from_path(PathEntry::under_variable("JAVA_HOME"), Scope::User)
            .unwrap();
        assert_eq!(registry.get("PATH", Scope::User).unwrap(), before);
    }
}
