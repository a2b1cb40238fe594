use thiserror::Error;
use toolenv_config::ConfigError;
use toolenv_env::EnvError;

/// Failure handing work to the main thread.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("the host main loop has shut down")]
    Closed,
    #[error("the host main loop did not run the request within {0:?}")]
    Timeout(std::time::Duration),
}

/// Failure of a [`CapabilityApi`](crate::CapabilityApi) call.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Error returned by plugin entry points.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error("plugin has no interactive entry point")]
    NotInteractive,
    #[error("plugin panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PluginError {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl From<ConfigError> for PluginError {
    fn from(err: ConfigError) -> Self {
        Self::Capability(err.into())
    }
}

impl From<EnvError> for PluginError {
    fn from(err: EnvError) -> Self {
        Self::Capability(err.into())
    }
}
