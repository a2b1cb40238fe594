use crate::{EnvError, PathSyntax, Scope};

/// Scoped persistent key/value storage for environment variables.
///
/// Implementations must go to the persisted store on every call; callers
/// never treat an in-process copy as authoritative.
pub trait EnvStore: Send + Sync {
    /// Returns `Ok(None)` when `name` is not set in `scope`.
    fn read(&self, name: &str, scope: Scope) -> Result<Option<String>, EnvError>;

    fn write(&self, name: &str, value: &str, scope: Scope) -> Result<(), EnvError>;

    /// Deleting an absent variable is not an error.
    fn delete(&self, name: &str, scope: Scope) -> Result<(), EnvError>;

    /// All variables persisted in `scope`, sorted by name.
    fn list(&self, scope: Scope) -> Result<Vec<(String, String)>, EnvError>;

    fn path_syntax(&self) -> PathSyntax;

    /// Rejects names the backing store cannot represent.
    fn check_name(&self, name: &str) -> Result<(), EnvError> {
        if name.is_empty() || name.contains('=') || name.contains('\0') {
            return Err(EnvError::InvalidName(name.to_string()));
        }
        Ok(())
    }
}

impl<T: EnvStore + ?Sized> EnvStore for std::sync::Arc<T> {
    fn read(&self, name: &str, scope: Scope) -> Result<Option<String>, EnvError> {
        (**self).read(name, scope)
    }

    fn write(&self, name: &str, value: &str, scope: Scope) -> Result<(), EnvError> {
        (**self).write(name, value, scope)
    }

    fn delete(&self, name: &str, scope: Scope) -> Result<(), EnvError> {
        (**self).delete(name, scope)
    }

    fn list(&self, scope: Scope) -> Result<Vec<(String, String)>, EnvError> {
        (**self).list(scope)
    }

    fn path_syntax(&self) -> PathSyntax {
        (**self).path_syntax()
    }

    fn check_name(&self, name: &str) -> Result<(), EnvError> {
        (**self).check_name(name)
    }
}
