use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use toolenv_config::Configuration;
use toolenv_env::{EnvironmentRegistry, PathEntry, PathSyntax, Scope};
use tracing::Level;

use crate::{
    CapabilityError, Dispatcher, HostServices, ProgressReport, ProgressState, SharedConfig,
    StoreServices,
};

/// The only door a plugin has into the host.
///
/// A thin handle over the host's [`HostServices`]. Reads go straight to the
/// shared stores. Every mutation runs on the host's main thread no matter
/// which thread the plugin calls from.
#[derive(Clone)]
pub struct CapabilityApi {
    services: Arc<dyn HostServices>,
    origin: Arc<str>,
}

impl CapabilityApi {
    pub fn new(config: SharedConfig, env: Arc<EnvironmentRegistry>, dispatcher: Dispatcher) -> Self {
        Self::from_services(Arc::new(StoreServices::new(config, env, dispatcher)))
    }

    pub fn from_services(services: Arc<dyn HostServices>) -> Self {
        Self {
            services,
            origin: Arc::from("host"),
        }
    }

    /// Same services, with log lines attributed to `plugin`.
    pub fn for_plugin(&self, plugin: &str) -> Self {
        Self {
            services: Arc::clone(&self.services),
            origin: Arc::from(plugin),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn config_value(&self, key: &str) -> Option<Value> {
        self.services.config_value(key)
    }

    pub fn config_snapshot(&self) -> Configuration {
        self.services.config_snapshot()
    }

    /// Inserts `value` in memory unless `key` already exists. Returns whether
    /// the key was added.
    pub fn seed_config(&self, key: &str, value: Value) -> Result<bool, CapabilityError> {
        self.services.seed_config(key, value)
    }

    /// Sets `key` and persists the whole configuration.
    pub fn set_config(&self, key: &str, value: Value, silent: bool) -> Result<(), CapabilityError> {
        self.services.set_config(key, value, silent)
    }

    pub fn save_config(&self, silent: bool) -> Result<(), CapabilityError> {
        self.services.save_config(silent)
    }

    pub fn env_var(&self, name: &str, scope: Scope) -> Result<Option<String>, CapabilityError> {
        self.services.env_var(name, scope)
    }

    pub fn set_env_var(&self, name: &str, value: &str, scope: Scope) -> Result<(), CapabilityError> {
        self.services.set_env_var(name, value, scope)
    }

    pub fn remove_env_var(&self, name: &str, scope: Scope) -> Result<(), CapabilityError> {
        self.services.remove_env_var(name, scope)
    }

    pub fn append_to_path(
        &self,
        entry: impl Into<PathEntry>,
        scope: Scope,
    ) -> Result<bool, CapabilityError> {
        self.services.append_to_path(entry.into(), scope)
    }

    pub fn remove_from_path(
        &self,
        entry: impl Into<PathEntry>,
        scope: Scope,
    ) -> Result<bool, CapabilityError> {
        self.services.remove_from_path(entry.into(), scope)
    }

    pub fn path_syntax(&self) -> PathSyntax {
        self.services.path_syntax()
    }

    pub fn validate_path(&self, path: impl AsRef<Path>) -> bool {
        self.services.validate_path(path.as_ref())
    }

    pub fn ensure_directory(&self, path: impl AsRef<Path>) -> Result<PathBuf, CapabilityError> {
        self.services.ensure_directory(path.as_ref())
    }

    /// Never blocks; a closed main loop drops the report.
    pub fn report_progress(&self, percent: u8, state: ProgressState) {
        self.services
            .report_progress(ProgressReport::new(percent, state));
    }

    /// Writes `message` to the host's log.
    pub fn log(&self, level: Level, message: &str) {
        self.services.log(&self.origin, level, message);
    }
}

impl std::fmt::Debug for CapabilityApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityApi")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;
    use toolenv_config::ConfigStore;
    use toolenv_env::{EnvStore, MemoryStore, RecordingBroadcast};

    use super::*;
    use crate::{DispatchError, MainLoop, MainThreadMessage};

    fn fixture_with(dir: &Path, main_loop: &MainLoop) -> (CapabilityApi, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_syntax(PathSyntax::unix()));
        let env = EnvironmentRegistry::new(Arc::clone(&store), RecordingBroadcast::new())
            .without_process_mirror();
        let config = ConfigStore::open(dir.join("config.json")).unwrap();
        let api = CapabilityApi::new(
            Arc::new(Mutex::new(config)),
            Arc::new(env),
            main_loop.dispatcher(),
        );
        (api, store)
    }

    fn fixture(dir: &Path) -> (MainLoop, CapabilityApi, Arc<MemoryStore>) {
        let main_loop = MainLoop::new();
        let (api, store) = fixture_with(dir, &main_loop);
        (main_loop, api, store)
    }

    #[test]
    fn set_config_persists_and_announces_the_save() {
        let dir = tempdir().unwrap();
        let (main_loop, api, _) = fixture(dir.path());

        api.set_config("node_path", json!("/opt/node/bin"), false)
            .unwrap();
        assert_eq!(api.config_value("node_path"), Some(json!("/opt/node/bin")));

        let reopened = ConfigStore::open(dir.path().join("config.json")).unwrap();
        assert_eq!(reopened.get("node_path"), Some(&json!("/opt/node/bin")));

        let mut saves = Vec::new();
        main_loop.run_pending(|message| {
            if let MainThreadMessage::ConfigSaved { silent } = message {
                saves.push(silent);
            }
        });
        assert_eq!(saves, vec![false]);
    }

    #[test]
    fn seed_config_keeps_existing_values() {
        let dir = tempdir().unwrap();
        let (_main_loop, api, _) = fixture(dir.path());

        assert!(!api.seed_config("node_path", json!("ignored")).unwrap());
        assert!(api.seed_config("gradle_home", json!("/home/u/.gradle")).unwrap());
        assert_eq!(api.config_value("node_path"), Some(json!("")));
        assert_eq!(
            api.config_value("gradle_home"),
            Some(json!("/home/u/.gradle"))
        );
    }

    #[test]
    fn worker_mutations_run_through_the_main_loop() {
        let dir = tempdir().unwrap();
        let (main_loop, api, store) = fixture(dir.path());

        let worker_api = api.clone();
        let worker = thread::spawn(move || {
            worker_api.report_progress(40, ProgressState::Normal);
            worker_api.set_env_var("GRADLE_HOME", "/opt/gradle", Scope::User)?;
            worker_api.append_to_path(PathEntry::under_variable("GRADLE_HOME"), Scope::User)
        });

        let mut progress = Vec::new();
        while !worker.is_finished() {
            main_loop.run_for(Duration::from_millis(20), |message| {
                if let MainThreadMessage::Progress(report) = message {
                    progress.push(report.percent);
                }
            });
        }
        assert!(worker.join().unwrap().unwrap());
        assert_eq!(progress, vec![40]);
        assert_eq!(
            api.env_var("PATH", Scope::User).unwrap().as_deref(),
            Some("$GRADLE_HOME/bin")
        );
        assert_eq!(
            store.read("GRADLE_HOME", Scope::User).unwrap().as_deref(),
            Some("/opt/gradle")
        );
    }

    #[test]
    fn timed_out_mutation_is_never_applied() {
        let dir = tempdir().unwrap();
        let main_loop = MainLoop::with_timeout(Duration::from_millis(50));
        let (api, _) = fixture_with(dir.path(), &main_loop);

        let worker_api = api.clone();
        let result = thread::spawn(move || {
            worker_api.set_config("node_path", json!("/late"), false)
        })
        .join()
        .unwrap();
        assert!(matches!(
            result,
            Err(CapabilityError::Dispatch(DispatchError::Timeout(_)))
        ));

        let mut saves = 0;
        main_loop.run_pending(|message| {
            if let MainThreadMessage::ConfigSaved { .. } = message {
                saves += 1;
            }
        });
        assert_eq!(saves, 0);
        assert_eq!(api.config_value("node_path"), Some(json!("")));
        let reopened = ConfigStore::open(dir.path().join("config.json")).unwrap();
        assert_eq!(reopened.get("node_path"), Some(&json!("")));
    }

    #[test]
    fn ensure_directory_creates_nested_dirs() {
        let dir = tempdir().unwrap();
        let (_main_loop, api, _) = fixture(dir.path());
        let target = dir.path().join("tools").join("node");
        assert_eq!(api.ensure_directory(&target).unwrap(), target);
        assert!(api.validate_path(&target));
    }

    #[derive(Default)]
    struct LogOnly {
        lines: Mutex<Vec<(String, Level, String)>>,
        progress: Mutex<Vec<ProgressReport>>,
    }

    impl HostServices for LogOnly {
        fn config_value(&self, _key: &str) -> Option<Value> {
            None
        }
        fn config_snapshot(&self) -> Configuration {
            Configuration::new()
        }
        fn seed_config(&self, _key: &str, _value: Value) -> Result<bool, CapabilityError> {
            Ok(false)
        }
        fn set_config(&self, _key: &str, _value: Value, _silent: bool) -> Result<(), CapabilityError> {
            Ok(())
        }
        fn save_config(&self, _silent: bool) -> Result<(), CapabilityError> {
            Ok(())
        }
        fn env_var(&self, _name: &str, _scope: Scope) -> Result<Option<String>, CapabilityError> {
            Ok(None)
        }
        fn set_env_var(&self, _name: &str, _value: &str, _scope: Scope) -> Result<(), CapabilityError> {
            Ok(())
        }
        fn remove_env_var(&self, _name: &str, _scope: Scope) -> Result<(), CapabilityError> {
            Ok(())
        }
        fn append_to_path(&self, _entry: PathEntry, _scope: Scope) -> Result<bool, CapabilityError> {
            Ok(false)
        }
        fn remove_from_path(&self, _entry: PathEntry, _scope: Scope) -> Result<bool, CapabilityError> {
            Ok(false)
        }
        fn path_syntax(&self) -> PathSyntax {
            PathSyntax::unix()
        }
        fn validate_path(&self, _path: &Path) -> bool {
            false
        }
        fn ensure_directory(&self, path: &Path) -> Result<PathBuf, CapabilityError> {
            Ok(path.to_path_buf())
        }
        fn report_progress(&self, report: ProgressReport) {
            self.progress.lock().push(report);
        }
        fn log(&self, plugin: &str, level: Level, message: &str) {
            self.lines
                .lock()
                .push((plugin.to_owned(), level, message.to_owned()));
        }
    }

    #[test]
    fn calls_reach_the_services_the_host_supplied() {
        let services = Arc::new(LogOnly::default());
        let api = CapabilityApi::from_services(services.clone()).for_plugin("Gradle");

        api.log(Level::WARN, "download interrupted");
        api.report_progress(130, ProgressState::Error);

        assert_eq!(api.origin(), "Gradle");
        assert_eq!(
            *services.lines.lock(),
            vec![(
                "Gradle".to_string(),
                Level::WARN,
                "download interrupted".to_string()
            )]
        );
        assert_eq!(
            *services.progress.lock(),
            vec![ProgressReport::new(100, ProgressState::Error)]
        );
    }
}
