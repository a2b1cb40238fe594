use std::io;
use std::time::Duration;

use windows_sys::Win32::UI::WindowsAndMessaging::{
    SendMessageTimeoutW, HWND_BROADCAST, SMTO_ABORTIFHUNG, WM_SETTINGCHANGE,
};
use winreg::enums::{RegType, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, KEY_READ, KEY_WRITE};
use winreg::types::FromRegValue;
use winreg::{RegKey, RegValue};

use crate::{ChangeBroadcast, EnvError, EnvStore, PathSyntax, Scope};

const USER_KEY: &str = "Environment";
const MACHINE_KEY: &str = r"SYSTEM\CurrentControlSet\Control\Session Manager\Environment";

/// [`EnvStore`] over the Windows registry environment keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryStore;

impl RegistryStore {
    pub fn new() -> Self {
        Self
    }

    fn open(&self, scope: Scope, flags: u32) -> Result<RegKey, EnvError> {
        let (root, path) = match scope {
            Scope::User => (RegKey::predef(HKEY_CURRENT_USER), USER_KEY),
            Scope::Machine => (RegKey::predef(HKEY_LOCAL_MACHINE), MACHINE_KEY),
        };
        root.open_subkey_with_flags(path, flags)
            .map_err(|err| EnvError::store(scope, err))
    }
}

impl EnvStore for RegistryStore {
    fn read(&self, name: &str, scope: Scope) -> Result<Option<String>, EnvError> {
        let key = self.open(scope, KEY_READ)?;
        match key.get_value::<String, _>(name) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(EnvError::access(name, scope, err)),
        }
    }

    fn write(&self, name: &str, value: &str, scope: Scope) -> Result<(), EnvError> {
        self.check_name(name)?;
        let key = self.open(scope, KEY_READ | KEY_WRITE)?;
        // Values carrying %REFERENCES% must stay expandable.
        let vtype = if value.contains('%') {
            RegType::REG_EXPAND_SZ
        } else {
            RegType::REG_SZ
        };
        let bytes = value
            .encode_utf16()
            .chain(Some(0))
            .flat_map(u16::to_le_bytes)
            .collect();
        key.set_raw_value(name, &RegValue { bytes, vtype })
            .map_err(|err| EnvError::access(name, scope, err))
    }

    fn delete(&self, name: &str, scope: Scope) -> Result<(), EnvError> {
        let key = self.open(scope, KEY_READ | KEY_WRITE)?;
        match key.delete_value(name) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(EnvError::access(name, scope, err)),
        }
    }

    fn list(&self, scope: Scope) -> Result<Vec<(String, String)>, EnvError> {
        let key = self.open(scope, KEY_READ)?;
        let mut vars = Vec::new();
        for entry in key.enum_values() {
            let (name, value) = entry.map_err(|err| EnvError::store(scope, err))?;
            match String::from_reg_value(&value) {
                Ok(value) => vars.push((name, value)),
                Err(err) => {
                    tracing::debug!(%name, %scope, error = %err, "skipping non-string value")
                }
            }
        }
        vars.sort_by(|a, b| a.0.to_ascii_lowercase().cmp(&b.0.to_ascii_lowercase()));
        Ok(vars)
    }

    fn path_syntax(&self) -> PathSyntax {
        PathSyntax::windows()
    }
}

/// Sends `WM_SETTINGCHANGE("Environment")` to every top-level window.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsBroadcast;

impl ChangeBroadcast for WindowsBroadcast {
    fn broadcast(&self, timeout: Duration) -> Result<(), EnvError> {
        let area: Vec<u16> = "Environment".encode_utf16().chain(Some(0)).collect();
        let mut result: usize = 0;
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let status = unsafe {
            SendMessageTimeoutW(
                HWND_BROADCAST,
                WM_SETTINGCHANGE,
                0,
                area.as_ptr() as isize,
                SMTO_ABORTIFHUNG,
                timeout_ms,
                &mut result,
            )
        };
        if status == 0 {
            return Err(EnvError::Broadcast(io::Error::last_os_error().to_string()));
        }
        Ok(())
    }
}
