use std::path::PathBuf;

use thiserror::Error;
use toolenv_plugin_sdk::PluginError;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to write plugin manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize plugin manifest: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The file could not be turned into a plugin object.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("plugin file not found at {0}")]
    Missing(PathBuf),
    #[error("failed to load plugin library {path}: {source}")]
    Library {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("{path} does not export `{symbol}`")]
    MissingEntry { path: PathBuf, symbol: &'static str },
    #[error("plugin entry point in {0} returned no plugin")]
    NullExport(PathBuf),
    #[error("plugin entry point in {path} panicked: {message}")]
    Panicked { path: PathBuf, message: String },
    #[error("invalid plugin file {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// The plugin loaded but does not honour the contract.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("plugin declares an empty name")]
    EmptyName,
    #[error("plugin `{name}` targets ABI {found}, host speaks ABI {expected}")]
    AbiMismatch {
        name: String,
        expected: u32,
        found: u32,
    },
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("plugin `{name}` failed to register: {source}")]
    EntryPoint {
        name: String,
        #[source]
        source: PluginError,
    },
    #[error("plugin `{name}` panicked while registering: {message}")]
    Panicked { name: String, message: String },
    #[error("plugin origin {0} has no usable file name")]
    InvalidOrigin(PathBuf),
    #[error("failed to install plugin file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

#[derive(Debug, Error)]
pub enum RemoveError {
    #[error("no plugin named `{0}` is registered")]
    NotFound(String),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("no plugin named `{0}` is registered")]
    NotFound(String),
    #[error("plugin `{0}` has no interactive view")]
    NotInteractive(String),
    #[error("plugin `{name}` failed: {source}")]
    Plugin {
        name: String,
        #[source]
        source: PluginError,
    },
    #[error("plugin `{name}` panicked: {message}")]
    Panicked { name: String, message: String },
}

/// Failure of [`PluginRegistry::add`](crate::PluginRegistry::add).
#[derive(Debug, Error)]
pub enum AddError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Register(#[from] RegisterError),
}
