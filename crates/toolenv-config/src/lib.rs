//! Persisted key/value configuration for toolenv.
//!
//! The store is a single flat JSON object kept on disk. Host code and plugins
//! mutate it in memory and persist it explicitly; a background watcher polls
//! the backing file so the host can tell the user when another process
//! rewrote it.

mod error;
mod store;
mod watcher;

pub use error::ConfigError;
pub use store::{default_configuration, ConfigStore, Configuration, SaveReport};
pub use watcher::{ConfigWatcher, ExternalChange, DEFAULT_POLL_INTERVAL};
