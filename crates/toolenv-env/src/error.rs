use std::path::PathBuf;

use thiserror::Error;

use crate::Scope;

/// Failures talking to the persistent environment store.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("cannot open the {scope} environment store: {source}")]
    Store {
        scope: Scope,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot access {scope} environment variable `{name}`: {source}")]
    Access {
        name: String,
        scope: Scope,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid environment variable name `{0}`")]
    InvalidName(String),
    #[error("value of `{name}` cannot be stored: {reason}")]
    InvalidValue { name: String, reason: &'static str },
    #[error("persistent environment variables are not supported on this platform")]
    UnsupportedPlatform,
    #[error("environment change broadcast failed: {0}")]
    Broadcast(String),
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EnvError {
    pub(crate) fn access(name: &str, scope: Scope, source: std::io::Error) -> Self {
        Self::Access {
            name: name.to_string(),
            scope,
            source,
        }
    }

    pub(crate) fn store(scope: Scope, source: std::io::Error) -> Self {
        Self::Store { scope, source }
    }
}
