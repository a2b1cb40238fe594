use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use serde_json::Value;
use toolenv_config::{ConfigStore, ConfigWatcher};
use toolenv_env::EnvironmentRegistry;
use toolenv_plugin_host::{
    AddError, DylibLoader, InvocationError, PluginLoader, PluginRegistry, RegistryEvent,
    RemoveError,
};
use toolenv_plugin_sdk::{
    CapabilityApi, HostInfo, MainLoop, MainThreadMessage, ProgressReport, ProgressState,
    SharedConfig, Surface,
};

use crate::notices::{Notice, NoticeKind, Notices};
use crate::paths::HostPaths;
use crate::tools::{self, Tool, ToolVersion};

/// Everything the running host owns. Lives on the main thread.
pub struct HostContext {
    paths: HostPaths,
    info: HostInfo,
    main_loop: MainLoop,
    config: SharedConfig,
    env: Arc<EnvironmentRegistry>,
    api: CapabilityApi,
    registry: PluginRegistry,
    watcher: Option<ConfigWatcher>,
    notices: Notices,
    progress: Option<ProgressReport>,
    restart_pending: bool,
}

impl HostContext {
    /// Starts a host with the platform environment store and native plugin
    /// loading.
    pub fn start(paths: HostPaths) -> Result<Self> {
        let env = paths.environment()?;
        Self::bootstrap(paths, env, DylibLoader)
    }

    pub fn bootstrap(
        paths: HostPaths,
        env: EnvironmentRegistry,
        loader: impl PluginLoader + 'static,
    ) -> Result<Self> {
        paths.ensure()?;
        let store = ConfigStore::open(&paths.config_file).with_context(|| {
            format!("failed to open configuration {}", paths.config_file.display())
        })?;

        let mut notices = Notices::default();
        if store.fell_back_to_defaults() {
            notices.push(
                Notice::new("Configuration file is unreadable, using defaults", NoticeKind::Warning)
                    .with_detail(format!(
                        "{} was left untouched and is backed up on the next save",
                        paths.config_file.display()
                    )),
            );
        }

        let main_loop = MainLoop::new();
        let config: SharedConfig = Arc::new(Mutex::new(store));
        let env = Arc::new(env);
        let api = CapabilityApi::new(Arc::clone(&config), Arc::clone(&env), main_loop.dispatcher());
        let registry = PluginRegistry::new(
            &paths.plugin_dir,
            &paths.manifest_file,
            loader,
            api.clone(),
        );
        let info = HostInfo {
            name: "toolenv".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            config_path: paths.config_file.clone(),
            plugin_dir: paths.plugin_dir.clone(),
        };
        tracing::info!(config = %paths.config_file.display(), plugins = %paths.plugin_dir.display(), "host started");

        Ok(Self {
            paths,
            info,
            main_loop,
            config,
            env,
            api,
            registry,
            watcher: None,
            notices,
            progress: None,
            restart_pending: false,
        })
    }

    /// Starts the background poller that reports foreign writes to the
    /// configuration file.
    pub fn start_watcher(&mut self, interval: Duration) -> Result<()> {
        if self.watcher.is_some() {
            return Ok(());
        }
        let dispatcher = self.main_loop.dispatcher();
        let watcher = ConfigWatcher::spawn(&self.config.lock(), interval, move |change| {
            let _ = dispatcher.post(MainThreadMessage::ConfigChangedExternally(change));
        })
        .context("failed to start the configuration watcher")?;
        self.watcher = Some(watcher);
        Ok(())
    }

    pub fn watcher(&self) -> Option<&ConfigWatcher> {
        self.watcher.as_ref()
    }

    /// Loads every installed plugin; failures become notices. Returns the
    /// number of plugins now live.
    pub fn load_plugins(&mut self) -> usize {
        let report = self.registry.load_installed();
        for filename in &report.missing {
            self.notices.warning(format!("Installed plugin {filename} is missing, skipped"));
        }
        for (path, err) in &report.failures {
            self.notices
                .error(format!("Plugin {} could not be loaded", path.display()), err);
        }
        self.registry.drain_events();
        report.loaded.len()
    }

    pub fn add_plugin(&mut self, path: &Path) -> Result<String, AddError> {
        let name = self.registry.add(path)?.name().to_owned();
        self.collect_events();
        Ok(name)
    }

    pub fn remove_plugin(&mut self, name: &str) -> Result<(), RemoveError> {
        self.registry.remove(name)?;
        self.collect_events();
        Ok(())
    }

    /// Runs a plugin's interactive view, then processes whatever it queued.
    pub fn show_plugin(&mut self, name: &str, surface: &mut dyn Surface) -> Result<(), InvocationError> {
        let result = self.registry.invoke_interactive(name, surface, &self.info);
        self.pump();
        result
    }

    /// Validates `dir`, optionally creates it, and stores it as the tool's
    /// binary directory.
    pub fn set_tool_path(&mut self, tool: Tool, dir: &Path, create: bool) -> Result<PathBuf> {
        if !self.api.validate_path(dir) {
            bail!("{} is not a usable path for {tool}", dir.display());
        }
        let dir = if create {
            self.api.ensure_directory(dir)?
        } else {
            dir.to_path_buf()
        };
        let value = Value::String(dir.to_string_lossy().into_owned());
        self.api.set_config(tool.config_key(), value, false)?;
        self.pump();
        Ok(dir)
    }

    pub fn check_tool(&self, tool: Tool) -> Result<ToolVersion, tools::DetectError> {
        let configured = self
            .api
            .config_value(tool.config_key())
            .and_then(|value| value.as_str().map(PathBuf::from));
        tools::detect(tool, configured.as_deref())
    }

    /// Processes everything queued for the main thread without waiting.
    pub fn pump(&mut self) -> usize {
        let processed = {
            let mut state = MessageState {
                notices: &mut self.notices,
                progress: &mut self.progress,
                restart_pending: &mut self.restart_pending,
            };
            self.main_loop.run_pending(|message| state.handle(message))
        };
        self.collect_events();
        processed
    }

    /// Waits up to `timeout` for work, then processes the queue.
    pub fn wait(&mut self, timeout: Duration) -> usize {
        let processed = {
            let mut state = MessageState {
                notices: &mut self.notices,
                progress: &mut self.progress,
                restart_pending: &mut self.restart_pending,
            };
            self.main_loop.run_for(timeout, |message| state.handle(message))
        };
        self.collect_events();
        processed
    }

    pub fn api(&self) -> &CapabilityApi {
        &self.api
    }

    /// Direct access for host-side operations such as backup and restore.
    /// Call only from the main thread.
    pub fn environment(&self) -> &EnvironmentRegistry {
        &self.env
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn paths(&self) -> &HostPaths {
        &self.paths
    }

    pub fn info(&self) -> &HostInfo {
        &self.info
    }

    pub fn progress(&self) -> Option<ProgressReport> {
        self.progress
    }

    pub fn notices(&mut self) -> &mut Notices {
        &mut self.notices
    }

    fn collect_events(&mut self) {
        for event in self.registry.drain_events() {
            match event {
                RegistryEvent::Registered { name, .. } => {
                    self.notices.success(format!("Plugin {name} registered"))
                }
                RegistryEvent::Retired { name, .. } => {
                    self.notices.info(format!("Previous version of plugin {name} retired"))
                }
                RegistryEvent::Removed { name } => {
                    self.notices.success(format!("Plugin {name} removed"))
                }
            }
        }
        if self.registry.purge_deferred() > 0 {
            tracing::debug!("deferred plugin files deleted");
        }
    }
}

struct MessageState<'a> {
    notices: &'a mut Notices,
    progress: &'a mut Option<ProgressReport>,
    restart_pending: &'a mut bool,
}

impl MessageState<'_> {
    fn handle(&mut self, message: MainThreadMessage) {
        match message {
            MainThreadMessage::ConfigChangedExternally(change) => {
                let title = if change.removed {
                    "Configuration file was deleted by another program"
                } else {
                    "Configuration file was changed by another program"
                };
                self.notices.push(
                    Notice::new(title, NoticeKind::Warning)
                        .with_detail(format!("restart toolenv to reload {}", change.path.display())),
                );
            }
            MainThreadMessage::ConfigSaved { silent: false } if !*self.restart_pending => {
                *self.restart_pending = true;
                self.notices.push(
                    Notice::new("Configuration saved", NoticeKind::Info)
                        .with_detail("restart toolenv for plugins to pick up the change"),
                );
            }
            MainThreadMessage::ConfigSaved { .. } => {}
            MainThreadMessage::Progress(report) => {
                tracing::debug!(percent = report.percent, state = ?report.state, "plugin progress");
                if report.state == ProgressState::Error {
                    self.notices.warning(format!("Plugin operation failed at {}%", report.percent));
                }
                *self.progress = match report.state {
                    ProgressState::Cleared => None,
                    _ => Some(report),
                };
            }
            MainThreadMessage::Run(job) => job(),
        }
    }
}
