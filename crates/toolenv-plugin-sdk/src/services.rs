use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use toolenv_config::{ConfigStore, Configuration};
use toolenv_env::{EnvironmentRegistry, PathEntry, PathSyntax, Scope};
use tracing::Level;

use crate::{CapabilityError, Dispatcher, MainThreadMessage, ProgressReport};

pub type SharedConfig = Arc<Mutex<ConfigStore>>;

/// Host side of every [`CapabilityApi`](crate::CapabilityApi) call.
///
/// A plugin library carries its own copies of std, `parking_lot`, `tracing`
/// and this crate. Calls through this trait object run code compiled into
/// the host, so thread identity, store locks and log output all belong to
/// the host.
pub trait HostServices: Send + Sync {
    fn config_value(&self, key: &str) -> Option<Value>;
    fn config_snapshot(&self) -> Configuration;
    fn seed_config(&self, key: &str, value: Value) -> Result<bool, CapabilityError>;
    fn set_config(&self, key: &str, value: Value, silent: bool) -> Result<(), CapabilityError>;
    fn save_config(&self, silent: bool) -> Result<(), CapabilityError>;

    fn env_var(&self, name: &str, scope: Scope) -> Result<Option<String>, CapabilityError>;
    fn set_env_var(&self, name: &str, value: &str, scope: Scope) -> Result<(), CapabilityError>;
    fn remove_env_var(&self, name: &str, scope: Scope) -> Result<(), CapabilityError>;
    fn append_to_path(&self, entry: PathEntry, scope: Scope) -> Result<bool, CapabilityError>;
    fn remove_from_path(&self, entry: PathEntry, scope: Scope) -> Result<bool, CapabilityError>;
    fn path_syntax(&self) -> PathSyntax;

    fn validate_path(&self, path: &Path) -> bool;
    fn ensure_directory(&self, path: &Path) -> Result<PathBuf, CapabilityError>;

    /// Must not block.
    fn report_progress(&self, report: ProgressReport);
    fn log(&self, plugin: &str, level: Level, message: &str);
}

/// [`HostServices`] over the host's configuration store, environment
/// registry, and main loop.
#[derive(Clone)]
pub struct StoreServices {
    config: SharedConfig,
    env: Arc<EnvironmentRegistry>,
    dispatcher: Dispatcher,
}

impl StoreServices {
    pub fn new(config: SharedConfig, env: Arc<EnvironmentRegistry>, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            env,
            dispatcher,
        }
    }

    fn persist(&self, silent: bool) -> Result<(), CapabilityError> {
        let report = self.config.lock().save(silent)?;
        tracing::debug!(path = %report.path.display(), silent, "configuration persisted");
        let _ = self.dispatcher.post(MainThreadMessage::ConfigSaved { silent });
        Ok(())
    }

    /// Runs `f` on the main thread.
    fn mutate<R, F>(&self, f: F) -> Result<R, CapabilityError>
    where
        F: FnOnce(&StoreServices) -> Result<R, CapabilityError> + Send + 'static,
        R: Send + 'static,
    {
        let services = self.clone();
        self.dispatcher.run_on_main(move || f(&services))?
    }
}

impl HostServices for StoreServices {
    fn config_value(&self, key: &str) -> Option<Value> {
        self.config.lock().get(key).cloned()
    }

    fn config_snapshot(&self) -> Configuration {
        self.config.lock().values().clone()
    }

    fn seed_config(&self, key: &str, value: Value) -> Result<bool, CapabilityError> {
        let key = key.to_owned();
        self.mutate(move |services| {
            let mut config = services.config.lock();
            if config.contains(&key) {
                return Ok(false);
            }
            config.set(key, value);
            Ok(true)
        })
    }

    fn set_config(&self, key: &str, value: Value, silent: bool) -> Result<(), CapabilityError> {
        let key = key.to_owned();
        self.mutate(move |services| {
            services.config.lock().set(key, value);
            services.persist(silent)
        })
    }

    fn save_config(&self, silent: bool) -> Result<(), CapabilityError> {
        self.mutate(move |services| services.persist(silent))
    }

    fn env_var(&self, name: &str, scope: Scope) -> Result<Option<String>, CapabilityError> {
        Ok(self.env.get(name, scope)?)
    }

    fn set_env_var(&self, name: &str, value: &str, scope: Scope) -> Result<(), CapabilityError> {
        let (name, value) = (name.to_owned(), value.to_owned());
        self.mutate(move |services| Ok(services.env.set(&name, &value, scope)?))
    }

    fn remove_env_var(&self, name: &str, scope: Scope) -> Result<(), CapabilityError> {
        let name = name.to_owned();
        self.mutate(move |services| Ok(services.env.remove(&name, scope)?))
    }

    fn append_to_path(&self, entry: PathEntry, scope: Scope) -> Result<bool, CapabilityError> {
        self.mutate(move |services| Ok(services.env.append_to_path(entry, scope)?))
    }

    fn remove_from_path(&self, entry: PathEntry, scope: Scope) -> Result<bool, CapabilityError> {
        self.mutate(move |services| Ok(services.env.remove_from_path(entry, scope)?))
    }

    fn path_syntax(&self) -> PathSyntax {
        self.env.path_syntax()
    }

    fn validate_path(&self, path: &Path) -> bool {
        toolenv_env::validate_path(path)
    }

    fn ensure_directory(&self, path: &Path) -> Result<PathBuf, CapabilityError> {
        Ok(toolenv_env::ensure_directory(path)?)
    }

    fn report_progress(&self, report: ProgressReport) {
        tracing::debug!(percent = report.percent, state = ?report.state, "plugin progress");
        if self.dispatcher.post(MainThreadMessage::Progress(report)).is_err() {
            tracing::debug!(?report, "progress report dropped, main loop closed");
        }
    }

    fn log(&self, plugin: &str, level: Level, message: &str) {
        if level == Level::ERROR {
            tracing::error!(plugin, "{message}");
        } else if level == Level::WARN {
            tracing::warn!(plugin, "{message}");
        } else if level == Level::INFO {
            tracing::info!(plugin, "{message}");
        } else if level == Level::DEBUG {
            tracing::debug!(plugin, "{message}");
        } else {
            tracing::trace!(plugin, "{message}");
        }
    }
}

impl std::fmt::Debug for StoreServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreServices")
            .field("config", &self.config.lock().path())
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}
