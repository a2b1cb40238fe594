use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::{EnvError, EnvStore, PathSyntax, Scope};

/// In-memory [`EnvStore`] for tests and dry runs.
#[derive(Debug)]
pub struct MemoryStore {
    user: RwLock<BTreeMap<String, String>>,
    machine: RwLock<BTreeMap<String, String>>,
    syntax: PathSyntax,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_syntax(PathSyntax::unix())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_syntax(syntax: PathSyntax) -> Self {
        Self {
            user: RwLock::new(BTreeMap::new()),
            machine: RwLock::new(BTreeMap::new()),
            syntax,
            available: AtomicBool::new(true),
        }
    }

    /// Seeds a variable without going through a registry.
    pub fn insert(&self, name: &str, value: &str, scope: Scope) {
        self.scope(scope).write().insert(name.to_string(), value.to_string());
    }

    /// Simulates a store that cannot be opened, e.g. machine scope without
    /// elevation.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn scope(&self, scope: Scope) -> &RwLock<BTreeMap<String, String>> {
        match scope {
            Scope::User => &self.user,
            Scope::Machine => &self.machine,
        }
    }

    fn ensure_available(&self, scope: Scope) -> Result<(), EnvError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EnvError::store(
                scope,
                io::Error::new(io::ErrorKind::PermissionDenied, "store unavailable"),
            ))
        }
    }
}

impl EnvStore for MemoryStore {
    fn read(&self, name: &str, scope: Scope) -> Result<Option<String>, EnvError> {
        self.ensure_available(scope)?;
        Ok(self.scope(scope).read().get(name).cloned())
    }

    fn write(&self, name: &str, value: &str, scope: Scope) -> Result<(), EnvError> {
        self.ensure_available(scope)?;
        self.scope(scope)
            .write()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, name: &str, scope: Scope) -> Result<(), EnvError> {
        self.ensure_available(scope)?;
        self.scope(scope).write().remove(name);
        Ok(())
    }

    fn list(&self, scope: Scope) -> Result<Vec<(String, String)>, EnvError> {
        self.ensure_available(scope)?;
        Ok(self
            .scope(scope)
            .read()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect())
    }

    fn path_syntax(&self) -> PathSyntax {
        self.syntax
    }
}
