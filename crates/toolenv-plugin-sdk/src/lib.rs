//! toolenv Plugin SDK
//! ==================
//!
//! Everything a plugin sees of its host. A plugin implements [`Plugin`],
//! exports it with [`declare_toolenv_plugin!`], and talks to the host only
//! through the [`CapabilityApi`] it is handed: configuration access,
//! persistent environment variables, path helpers, and progress reporting.
//!
//! The host side of the same crate provides the [`MainLoop`] that every
//! mutation is funnelled through, so plugin worker threads never touch shared
//! state directly.
//!
//! A plugin library links its own copy of this crate and of std. Everything
//! it does to host state goes through the host-built [`HostServices`] behind
//! its [`CapabilityApi`], and log output goes through [`CapabilityApi::log`]
//! rather than the plugin's own `tracing` copy, which has no subscriber.

mod api;
mod dispatch;
mod error;
mod plugin;
mod progress;
mod services;
mod surface;

pub use api::CapabilityApi;
pub use dispatch::{Dispatcher, Job, MainLoop, MainThreadMessage, DISPATCH_TIMEOUT};
pub use error::{CapabilityError, DispatchError, PluginError};
pub use plugin::{
    panic_message, take_export, HostInfo, Plugin, PluginContext, PluginEntry, PluginExport,
    UnwindGuard, ABI_VERSION, ENTRY_SYMBOL,
};
pub use progress::{ProgressReport, ProgressState};
pub use services::{HostServices, SharedConfig, StoreServices};
pub use surface::{Answer, NoticeKind, ScriptedSurface, Surface};

/// Common imports for plugin authors.
pub mod prelude {
    pub use crate::{
        declare_toolenv_plugin, CapabilityApi, NoticeKind, Plugin, PluginContext, PluginError,
        ProgressState, Surface,
    };
    pub use serde_json::{json, Value};
    pub use toolenv_env::{PathEntry, Scope};
    pub use tracing::Level;
}

/// Declare the entry point of a dynamically loaded toolenv plugin.
///
/// The macro expects an expression evaluating to a type implementing
/// [`Plugin`]. The host resolves the exported `toolenv_plugin_entry` symbol
/// and takes ownership of the returned [`PluginExport`]. The plugin is
/// wrapped in an [`UnwindGuard`], so its panics come back as errors.
///
/// # Example
///
/// ```ignore
/// use toolenv_plugin_sdk::prelude::*;
///
/// #[derive(Default)]
/// struct NodePaths;
///
/// impl Plugin for NodePaths { /* ... */ }
///
/// declare_toolenv_plugin!(NodePaths::default());
/// ```
#[macro_export]
macro_rules! declare_toolenv_plugin {
    ($plugin:expr) => {
        #[no_mangle]
        pub extern "C" fn toolenv_plugin_entry() -> *mut $crate::PluginExport {
            let built = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| {
                $crate::PluginExport::new(::std::boxed::Box::new($crate::UnwindGuard::new($plugin)))
            }));
            match built {
                Ok(export) => export.into_raw(),
                Err(_) => ::std::ptr::null_mut(),
            }
        }
    };
}
