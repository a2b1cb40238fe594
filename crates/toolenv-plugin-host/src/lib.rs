//! Loading, registering, and replacing toolenv plugins.
//!
//! A [`PluginRegistry`] owns every live plugin together with the library it
//! came from, keeps the on-disk [`PluginManifest`] in step with the live set,
//! and contains plugin failures (errors and panics alike) at its boundary.

mod error;
mod loader;
mod manifest;
mod registry;

pub use error::{
    AddError, ContractError, InvocationError, LoadError, ManifestError, RegisterError,
    RemoveError,
};
pub use loader::{DylibLoader, LoadedModule, PluginLoader};
pub use manifest::PluginManifest;
pub use registry::{
    LoadReport, PluginContract, PluginRecord, PluginRegistry, PluginState,
    RegistryEvent,
};
