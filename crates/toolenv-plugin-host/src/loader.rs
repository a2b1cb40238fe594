use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use toolenv_plugin_sdk::{
    panic_message, take_export, Plugin, PluginEntry, PluginExport, ENTRY_SYMBOL,
};

use crate::LoadError;

/// Turns a plugin file into a live plugin object.
pub trait PluginLoader {
    fn load(&self, path: &Path) -> Result<LoadedModule, LoadError>;
}

/// A plugin object plus whatever keeps its code mapped.
pub struct LoadedModule {
    // Dropped before `library`: the plugin's vtable lives inside it.
    plugin: Box<dyn Plugin>,
    abi_version: u32,
    sdk_version: &'static str,
    path: PathBuf,
    library: Option<Arc<Library>>,
}

impl LoadedModule {
    /// Wraps an export whose code is already part of this process.
    pub fn in_process(path: impl Into<PathBuf>, export: PluginExport) -> Self {
        Self::from_export(path.into(), export, None)
    }

    fn from_export(path: PathBuf, export: PluginExport, library: Option<Arc<Library>>) -> Self {
        let abi_version = export.abi_version();
        let sdk_version = export.sdk_version();
        Self {
            plugin: export.into_plugin(),
            abi_version,
            sdk_version,
            path,
            library,
        }
    }

    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn abi_version(&self) -> u32 {
        self.abi_version
    }

    pub fn sdk_version(&self) -> &'static str {
        self.sdk_version
    }

    pub fn is_interactive(&self) -> bool {
        self.plugin.is_interactive()
    }

    pub(crate) fn plugin_mut(&mut self) -> &mut dyn Plugin {
        self.plugin.as_mut()
    }

    pub fn is_dynamic(&self) -> bool {
        self.library.is_some()
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("name", &self.plugin.name())
            .field("path", &self.path)
            .field("abi_version", &self.abi_version)
            .field("dynamic", &self.library.is_some())
            .finish()
    }
}

/// Loads plugins built with `declare_toolenv_plugin!` as shared libraries.
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibLoader;

impl PluginLoader for DylibLoader {
    fn load(&self, path: &Path) -> Result<LoadedModule, LoadError> {
        if !path.is_file() {
            return Err(LoadError::Missing(path.to_path_buf()));
        }
        // SAFETY: loading a library runs its initialisers. Plugins run with
        // full host privilege.
        let library = unsafe { Library::new(path) }.map_err(|source| LoadError::Library {
            path: path.to_path_buf(),
            source,
        })?;
        let entry: PluginEntry = {
            let symbol = unsafe { library.get::<PluginEntry>(ENTRY_SYMBOL.as_bytes()) }.map_err(
                |_| LoadError::MissingEntry {
                    path: path.to_path_buf(),
                    symbol: ENTRY_SYMBOL,
                },
            )?;
            *symbol
        };

        let export = catch_unwind(AssertUnwindSafe(|| unsafe { take_export(entry) }))
            .map_err(|panic| LoadError::Panicked {
                path: path.to_path_buf(),
                message: panic_message(panic.as_ref()),
            })?
            .ok_or_else(|| LoadError::NullExport(path.to_path_buf()))?;

        tracing::debug!(
            path = %path.display(),
            plugin = export.plugin().name(),
            sdk = export.sdk_version(),
            "plugin library loaded"
        );
        Ok(LoadedModule::from_export(
            path.to_path_buf(),
            export,
            Some(Arc::new(library)),
        ))
    }
}
