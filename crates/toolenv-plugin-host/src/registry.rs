use std::fs;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use toolenv_plugin_sdk::{
    panic_message, CapabilityApi, HostInfo, PluginContext, PluginError, Surface, ABI_VERSION,
};

use crate::{
    AddError, ContractError, InvocationError, LoadError, LoadedModule, PluginLoader,
    PluginManifest, RegisterError, RemoveError,
};

/// Lifecycle of a plugin, from manifest entry to live or replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Discovered,
    Loaded,
    Registered,
    Active,
    Retired,
}

/// What [`PluginRegistry::validate`] learned about a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginContract {
    pub name: String,
    pub interactive: bool,
}

/// Changes the host should mirror in its menus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered { name: String, interactive: bool },
    Retired { name: String, installed_filename: String },
    Removed { name: String },
}

pub struct PluginRecord {
    name: String,
    source_path: PathBuf,
    installed_filename: String,
    interactive: bool,
    state: PluginState,
    module: LoadedModule,
}

impl PluginRecord {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn installed_filename(&self) -> &str {
        &self.installed_filename
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    pub fn sdk_version(&self) -> &'static str {
        self.module.sdk_version()
    }
}

impl std::fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRecord")
            .field("name", &self.name)
            .field("source_path", &self.source_path)
            .field("installed_filename", &self.installed_filename)
            .field("interactive", &self.interactive)
            .field("state", &self.state)
            .finish()
    }
}

/// Outcome of [`PluginRegistry::load_installed`].
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    /// Manifest entries with no file in the plugin directory.
    pub missing: Vec<String>,
    pub failures: Vec<(PathBuf, AddError)>,
}

/// Record taken out of the live set while a replacement registers.
struct StagedRetirement {
    index: usize,
    record: PluginRecord,
}

impl StagedRetirement {
    /// Drops the plugin and its library, keeping what the commit still needs.
    fn unload(self) -> (String, String) {
        let PluginRecord {
            name,
            installed_filename,
            ..
        } = self.record;
        (name, installed_filename)
    }
}

/// Owns the live plugin set and the files and manifest backing it.
pub struct PluginRegistry {
    plugin_dir: PathBuf,
    manifest: PluginManifest,
    loader: Box<dyn PluginLoader>,
    api: CapabilityApi,
    records: Vec<PluginRecord>,
    events: Vec<RegistryEvent>,
    deferred: Vec<PathBuf>,
}

impl PluginRegistry {
    pub fn new(
        plugin_dir: impl Into<PathBuf>,
        manifest_path: impl Into<PathBuf>,
        loader: impl PluginLoader + 'static,
        api: CapabilityApi,
    ) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            manifest: PluginManifest::load(manifest_path),
            loader: Box::new(loader),
            api,
            records: Vec::new(),
            events: Vec::new(),
            deferred: Vec::new(),
        }
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    pub fn records(&self) -> &[PluginRecord] {
        &self.records
    }

    pub fn record(&self, name: &str) -> Option<&PluginRecord> {
        self.records.iter().find(|record| record.name == name)
    }

    pub fn drain_events(&mut self) -> Vec<RegistryEvent> {
        std::mem::take(&mut self.events)
    }

    /// Files whose deletion failed and is waiting for a retry.
    pub fn deferred_deletions(&self) -> &[PathBuf] {
        &self.deferred
    }

    /// Installed files named by the manifest, in manifest order. Entries
    /// without a file are skipped.
    pub fn discover(&self) -> Vec<PathBuf> {
        self.manifest
            .filenames()
            .iter()
            .map(|filename| self.plugin_dir.join(filename))
            .filter(|path| {
                let exists = path.is_file();
                if !exists {
                    tracing::debug!(path = %path.display(), "manifest entry has no file, skipping");
                }
                exists
            })
            .collect()
    }

    /// Every manifest entry with the plugin using it, if any. Entries
    /// without a live plugin are `Discovered` when their file exists and
    /// `None` otherwise.
    pub fn manifest_states(&self) -> Vec<(String, Option<&str>, Option<PluginState>)> {
        self.manifest
            .filenames()
            .iter()
            .map(|filename| {
                match self
                    .records
                    .iter()
                    .find(|record| record.installed_filename == *filename)
                {
                    Some(record) => (filename.clone(), Some(record.name.as_str()), Some(record.state)),
                    None if self.plugin_dir.join(filename).is_file() => {
                        (filename.clone(), None, Some(PluginState::Discovered))
                    }
                    None => (filename.clone(), None, None),
                }
            })
            .collect()
    }

    pub fn load(&self, path: &Path) -> Result<LoadedModule, LoadError> {
        self.loader.load(path)
    }

    pub fn validate(&self, module: &LoadedModule) -> Result<PluginContract, ContractError> {
        let name = module.name().trim();
        if name.is_empty() {
            return Err(ContractError::EmptyName);
        }
        if module.abi_version() != ABI_VERSION {
            return Err(ContractError::AbiMismatch {
                name: name.to_owned(),
                expected: ABI_VERSION,
                found: module.abi_version(),
            });
        }
        Ok(PluginContract {
            name: name.to_owned(),
            interactive: module.is_interactive(),
        })
    }

    /// Registers `module`, replacing any live plugin with the same name.
    ///
    /// Either the call succeeds and the new plugin is live, installed, and in
    /// the manifest, or it fails and the registry, manifest, and plugin
    /// directory are as they were.
    pub fn register(
        &mut self,
        mut module: LoadedModule,
        origin: &Path,
    ) -> Result<&PluginRecord, RegisterError> {
        let contract = self.validate(&module)?;
        let installed_filename = origin
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| RegisterError::InvalidOrigin(origin.to_path_buf()))?;
        let name = contract.name;

        let mut retired = self
            .records
            .iter()
            .position(|record| record.name == name)
            .map(|index| StagedRetirement {
                index,
                record: self.records.remove(index),
            });

        let api = self.api.for_plugin(&name);
        let outcome = catch_unwind(AssertUnwindSafe(|| module.plugin_mut().register(&api)));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(PluginError::Panicked(message))) => Some(RegisterError::Panicked {
                name: name.clone(),
                message,
            }),
            Ok(Err(source)) => Some(RegisterError::EntryPoint {
                name: name.clone(),
                source,
            }),
            Err(panic) => Some(RegisterError::Panicked {
                name: name.clone(),
                message: panic_message(panic.as_ref()),
            }),
        };
        if let Some(err) = failure {
            tracing::warn!(plugin = %name, error = %err, "plugin registration failed");
            self.unstage(retired);
            return Err(err);
        }

        let installed = self.plugin_dir.join(&installed_filename);
        let freed_by_retirement = retired.as_ref().is_some_and(|staged| {
            staged.record.installed_filename == installed_filename
                && !self.filename_in_use(&installed_filename)
        });
        let staging = if same_file(origin, &installed)
            || (installed.exists() && !freed_by_retirement)
        {
            None
        } else {
            match self.stage_copy(origin, &installed_filename) {
                Ok(staging) => Some(staging),
                Err(err) => {
                    self.unstage(retired);
                    return Err(err);
                }
            }
        };

        let previous = self.manifest.filenames().to_vec();
        let mut filenames = previous.clone();
        if let Some(staged) = &retired {
            let old = &staged.record.installed_filename;
            if *old != installed_filename && !self.filename_in_use(old) {
                filenames.retain(|filename| filename != old);
            }
        }
        filenames.push(installed_filename.clone());
        if let Err(err) = self.manifest.replace(filenames) {
            discard(staging.as_deref());
            self.unstage(retired);
            return Err(err.into());
        }

        // Commit.
        let mut unloaded = None;
        if let Some(staging) = &staging {
            let mut moved = fs::rename(staging, &installed);
            if moved.is_err() && freed_by_retirement {
                // A loaded library can pin its own file until it is unloaded.
                unloaded = retired.take().map(StagedRetirement::unload);
                moved = fs::rename(staging, &installed);
            }
            if let Err(source) = moved {
                discard(Some(staging));
                if let Err(err) = self.manifest.replace(previous) {
                    tracing::error!(error = %err, "failed to roll back plugin manifest");
                }
                self.unstage(retired);
                return Err(RegisterError::Io {
                    path: installed,
                    source,
                });
            }
        }
        let retired = retired.map(StagedRetirement::unload).or(unloaded);
        if let Some((old_name, old_filename)) = retired {
            let old_path = self.plugin_dir.join(&old_filename);
            if old_filename != installed_filename
                && !same_file(origin, &old_path)
                && !self.filename_in_use(&old_filename)
            {
                self.delete_installed(old_path);
            }
            tracing::info!(plugin = %old_name, filename = %old_filename, "plugin retired");
            self.events.push(RegistryEvent::Retired {
                name: old_name,
                installed_filename: old_filename,
            });
        }

        tracing::info!(plugin = %name, filename = %installed_filename, "plugin registered");
        self.events.push(RegistryEvent::Registered {
            name: name.clone(),
            interactive: contract.interactive,
        });
        self.records.push(PluginRecord {
            name,
            source_path: origin.to_path_buf(),
            installed_filename,
            interactive: contract.interactive,
            state: PluginState::Active,
            module,
        });
        let index = self.records.len() - 1;
        Ok(&self.records[index])
    }

    /// Loads and registers a user-chosen plugin file.
    pub fn add(&mut self, path: &Path) -> Result<&PluginRecord, AddError> {
        let module = self.load(path)?;
        Ok(self.register(module, path)?)
    }

    /// Loads every installed plugin named by the manifest. One plugin
    /// failing never stops the rest.
    pub fn load_installed(&mut self) -> LoadReport {
        let mut report = LoadReport {
            missing: self
                .manifest
                .filenames()
                .iter()
                .filter(|filename| !self.plugin_dir.join(filename.as_str()).is_file())
                .cloned()
                .collect(),
            ..LoadReport::default()
        };
        for path in self.discover() {
            let module = match self.load(&path) {
                Ok(module) => module,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to load plugin");
                    report.failures.push((path, AddError::Load(err)));
                    continue;
                }
            };
            match self.register(module, &path) {
                Ok(record) => report.loaded.push(record.name.clone()),
                Err(err) => report.failures.push((path, AddError::Register(err))),
            }
        }
        report
    }

    /// Unregisters `name`, drops it from the manifest, and deletes its
    /// installed file unless another plugin still uses it.
    pub fn remove(&mut self, name: &str) -> Result<(), RemoveError> {
        let index = self
            .records
            .iter()
            .position(|record| record.name == name)
            .ok_or_else(|| RemoveError::NotFound(name.to_owned()))?;
        let filename = self.records[index].installed_filename.clone();
        let shared = self
            .records
            .iter()
            .enumerate()
            .any(|(i, record)| i != index && record.installed_filename == filename);

        if !shared {
            let filenames = self
                .manifest
                .filenames()
                .iter()
                .filter(|entry| **entry != filename)
                .cloned()
                .collect();
            self.manifest.replace(filenames)?;
        }

        drop(self.records.remove(index));
        if !shared {
            self.delete_installed(self.plugin_dir.join(&filename));
        }
        tracing::info!(plugin = %name, filename = %filename, "plugin removed");
        self.events.push(RegistryEvent::Removed {
            name: name.to_owned(),
        });
        Ok(())
    }

    /// Runs the interactive view of `name`. Plugin failures are returned, never
    /// propagated as panics, and the plugin stays registered.
    pub fn invoke_interactive(
        &mut self,
        name: &str,
        surface: &mut dyn Surface,
        host: &HostInfo,
    ) -> Result<(), InvocationError> {
        let api = self.api.for_plugin(name);
        let record = self
            .records
            .iter_mut()
            .find(|record| record.name == name)
            .ok_or_else(|| InvocationError::NotFound(name.to_owned()))?;
        if !record.interactive {
            return Err(InvocationError::NotInteractive(name.to_owned()));
        }

        let ctx = PluginContext { host, api: &api };
        let plugin = record.module.plugin_mut();
        let outcome = catch_unwind(AssertUnwindSafe(|| plugin.show(surface, &ctx)));
        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(PluginError::NotInteractive)) => {
                Err(InvocationError::NotInteractive(name.to_owned()))
            }
            Ok(Err(PluginError::Panicked(message))) => Err(InvocationError::Panicked {
                name: name.to_owned(),
                message,
            }),
            Ok(Err(source)) => Err(InvocationError::Plugin {
                name: name.to_owned(),
                source,
            }),
            Err(panic) => Err(InvocationError::Panicked {
                name: name.to_owned(),
                message: panic_message(panic.as_ref()),
            }),
        };
        if let Err(err) = &result {
            tracing::warn!(plugin = %name, error = %err, "interactive plugin call failed");
        }
        result
    }

    /// Retries deletions that failed earlier. Returns how many files are
    /// now gone.
    pub fn purge_deferred(&mut self) -> usize {
        let pending = std::mem::take(&mut self.deferred);
        let mut purged = 0;
        for path in pending {
            let reused = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| self.filename_in_use(name));
            if reused {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => purged += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => purged += 1,
                Err(err) => {
                    tracing::debug!(path = %path.display(), error = %err, "deletion still blocked");
                    self.deferred.push(path);
                }
            }
        }
        purged
    }

    fn filename_in_use(&self, filename: &str) -> bool {
        self.records
            .iter()
            .any(|record| record.installed_filename == filename)
    }

    fn unstage(&mut self, retired: Option<StagedRetirement>) {
        if let Some(StagedRetirement { index, record }) = retired {
            let index = index.min(self.records.len());
            self.records.insert(index, record);
        }
    }

    fn stage_copy(&self, origin: &Path, filename: &str) -> Result<PathBuf, RegisterError> {
        fs::create_dir_all(&self.plugin_dir).map_err(|source| RegisterError::Io {
            path: self.plugin_dir.clone(),
            source,
        })?;
        let staging = self.plugin_dir.join(format!(".{filename}.staging"));
        fs::copy(origin, &staging).map_err(|source| {
            discard(Some(&staging));
            RegisterError::Io {
                path: origin.to_path_buf(),
                source,
            }
        })?;
        Ok(staging)
    }

    fn delete_installed(&mut self, path: PathBuf) {
        match fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "plugin file deleted"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "could not delete plugin file, will retry later"
                );
                self.deferred.push(path);
            }
        }
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugin_dir", &self.plugin_dir)
            .field("records", &self.records)
            .field("deferred", &self.deferred)
            .finish_non_exhaustive()
    }
}

fn discard(staging: Option<&Path>) {
    if let Some(path) = staging {
        if let Err(err) = fs::remove_file(path) {
            tracing::debug!(path = %path.display(), error = %err, "failed to discard staged plugin copy");
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
