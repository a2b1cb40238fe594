use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

use crate::{CapabilityApi, PluginError, Surface};

/// Bumped whenever [`PluginExport`] or [`Plugin`] change shape.
pub const ABI_VERSION: u32 = 2;

/// Symbol exported by [`declare_toolenv_plugin!`](crate::declare_toolenv_plugin).
pub const ENTRY_SYMBOL: &str = "toolenv_plugin_entry";

pub type PluginEntry = unsafe extern "C" fn() -> *mut PluginExport;

/// Behaviour implemented by every toolenv plugin.
pub trait Plugin: Send {
    /// Unique name. Registering a plugin with a taken name replaces the
    /// previous one.
    fn name(&self) -> &str;

    /// Called once, right after loading. May read and seed configuration.
    fn register(&mut self, api: &CapabilityApi) -> Result<(), PluginError>;

    fn is_interactive(&self) -> bool {
        false
    }

    /// Runs the plugin's interactive view on the main thread.
    fn show(
        &mut self,
        surface: &mut dyn Surface,
        ctx: &PluginContext<'_>,
    ) -> Result<(), PluginError> {
        let _ = (surface, ctx);
        Err(PluginError::NotInteractive)
    }
}

/// Wraps a plugin so its panics surface as [`PluginError::Panicked`].
///
/// [`declare_toolenv_plugin!`](crate::declare_toolenv_plugin) applies it. It
/// is generic, so the unwind is caught by the panic runtime the plugin was
/// built with; the host cannot catch a panic raised by another copy of std.
pub struct UnwindGuard<P> {
    inner: P,
}

impl<P: Plugin> UnwindGuard<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: Plugin> Plugin for UnwindGuard<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn register(&mut self, api: &CapabilityApi) -> Result<(), PluginError> {
        catch_unwind(AssertUnwindSafe(|| self.inner.register(api)))
            .unwrap_or_else(|panic| Err(PluginError::Panicked(panic_message(panic.as_ref()))))
    }

    fn is_interactive(&self) -> bool {
        self.inner.is_interactive()
    }

    fn show(
        &mut self,
        surface: &mut dyn Surface,
        ctx: &PluginContext<'_>,
    ) -> Result<(), PluginError> {
        catch_unwind(AssertUnwindSafe(|| self.inner.show(surface, ctx)))
            .unwrap_or_else(|panic| Err(PluginError::Panicked(panic_message(panic.as_ref()))))
    }
}

/// Text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// What crosses the dynamic library boundary.
pub struct PluginExport {
    abi_version: u32,
    sdk_version: &'static str,
    plugin: Box<dyn Plugin>,
}

impl PluginExport {
    pub fn new(plugin: Box<dyn Plugin>) -> Self {
        Self {
            abi_version: ABI_VERSION,
            sdk_version: env!("CARGO_PKG_VERSION"),
            plugin,
        }
    }

    /// Export stamped with an explicit ABI version, for hosts testing
    /// version checks.
    pub fn with_abi_version(plugin: Box<dyn Plugin>, abi_version: u32) -> Self {
        Self {
            abi_version,
            ..Self::new(plugin)
        }
    }

    pub fn abi_version(&self) -> u32 {
        self.abi_version
    }

    pub fn sdk_version(&self) -> &'static str {
        self.sdk_version
    }

    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    pub fn into_plugin(self) -> Box<dyn Plugin> {
        self.plugin
    }

    pub fn into_raw(self) -> *mut PluginExport {
        Box::into_raw(Box::new(self))
    }
}

impl std::fmt::Debug for PluginExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginExport")
            .field("abi_version", &self.abi_version)
            .field("sdk_version", &self.sdk_version)
            .field("plugin", &self.plugin.name())
            .finish()
    }
}

/// Calls `entry` and takes ownership of the export it returns.
///
/// # Safety
///
/// `entry` must be an entry point generated by
/// [`declare_toolenv_plugin!`](crate::declare_toolenv_plugin) against this
/// SDK version, and the library providing it must outlive the returned value.
pub unsafe fn take_export(entry: PluginEntry) -> Option<PluginExport> {
    let raw = entry();
    if raw.is_null() {
        None
    } else {
        Some(*Box::from_raw(raw))
    }
}

/// Static facts about the host handed to interactive entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub name: String,
    pub version: String,
    pub config_path: PathBuf,
    pub plugin_dir: PathBuf,
}

pub struct PluginContext<'a> {
    pub host: &'a HostInfo,
    pub api: &'a CapabilityApi,
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::Value;
    use toolenv_config::Configuration;
    use toolenv_env::{PathEntry, PathSyntax, Scope};
    use tracing::Level;

    use super::*;
    use crate::{CapabilityError, HostServices, ProgressReport};

    struct NoServices;

    impl HostServices for NoServices {
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
        fn report_progress(&self, _report: ProgressReport) {}
        fn log(&self, _plugin: &str, _level: Level, _message: &str) {}
    }

    struct Silent;

    impl Plugin for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        fn register(&mut self, _api: &CapabilityApi) -> Result<(), PluginError> {
            Ok(())
        }
    }

    crate::declare_toolenv_plugin!(Silent);

    #[test]
    fn declared_entry_round_trips_through_a_raw_pointer() {
        let export = unsafe { take_export(toolenv_plugin_entry) }.expect("export");
        assert_eq!(export.abi_version(), ABI_VERSION);
        assert_eq!(export.plugin().name(), "silent");
        assert!(!export.plugin().is_interactive());
    }

    struct Fragile;

    impl Plugin for Fragile {
        fn name(&self) -> &str {
            "fragile"
        }

        fn register(&mut self, _api: &CapabilityApi) -> Result<(), PluginError> {
            panic!("seed failed: {}", 3)
        }
    }

    #[test]
    fn guarded_plugins_report_panics_as_errors() {
        let mut guarded = UnwindGuard::new(Fragile);
        let api = CapabilityApi::from_services(std::sync::Arc::new(NoServices));
        match guarded.register(&api) {
            Err(PluginError::Panicked(message)) => assert_eq!(message, "seed failed: 3"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(guarded.name(), "fragile");
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload = catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 1");
        let payload = catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");
    }

    #[test]
    fn null_entry_yields_nothing() {
        unsafe extern "C" fn null_entry() -> *mut PluginExport {
            std::ptr::null_mut()
        }
        assert!(unsafe { take_export(null_entry) }.is_none());
    }
}
