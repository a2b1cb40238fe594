//! Persistent environment variables for toolenv.
//!
//! [`EnvironmentRegistry`] reads and writes variables in the operating
//! system's persistent store for a [`Scope`] and announces every change to
//! the rest of the system. The store itself sits behind [`EnvStore`] so the
//! same operations run against the Windows registry, shell profile files, or
//! an in-memory map.

mod broadcast;
mod error;
mod fs_paths;
mod memory;
mod profile;
mod registry;
mod scope;
mod store;
#[cfg(windows)]
mod windows;

pub use broadcast::{ChangeBroadcast, NoopBroadcast, RecordingBroadcast};
pub use error::EnvError;
pub use fs_paths::{ensure_directory, validate_path, FORBIDDEN_NAME_CHARS};
pub use memory::MemoryStore;
pub use profile::ProfileStore;
pub use registry::{EnvSnapshot, EnvironmentRegistry, BROADCAST_TIMEOUT};
pub use scope::{PathEntry, PathSyntax, Scope, VARIABLE_SUBDIR};
pub use store::EnvStore;
#[cfg(windows)]
pub use windows::{RegistryStore, WindowsBroadcast};
