use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use toolenv_env::{EnvironmentRegistry, ProfileStore};

const APP_DIR: &str = "toolenv";

/// Where the host keeps its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    pub config_file: PathBuf,
    pub plugin_dir: PathBuf,
    pub manifest_file: PathBuf,
    /// Set when everything lives under one directory given on the command
    /// line.
    pub home: Option<PathBuf>,
}

impl HostPaths {
    /// Per-user locations resolved through the platform conventions.
    pub fn user_default() -> Result<Self> {
        let config_dir = dirs::config_dir().context("unable to determine the configuration directory")?;
        let data_dir = dirs::data_dir().context("unable to determine the data directory")?;
        Ok(Self {
            config_file: config_dir.join(APP_DIR).join("config.json"),
            plugin_dir: data_dir.join(APP_DIR).join("plugins"),
            manifest_file: data_dir.join(APP_DIR).join("plugins.json"),
            home: None,
        })
    }

    pub fn rooted(home: impl AsRef<Path>) -> Self {
        let home = home.as_ref();
        Self {
            config_file: home.join("config.json"),
            plugin_dir: home.join("plugins"),
            manifest_file: home.join("plugins.json"),
            home: Some(home.to_path_buf()),
        }
    }

    /// Creates every managed directory. Failure here is fatal for the host.
    pub fn ensure(&self) -> Result<()> {
        let parents = [self.config_file.parent(), self.manifest_file.parent()];
        for dir in parents
            .into_iter()
            .flatten()
            .chain(std::iter::once(self.plugin_dir.as_path()))
        {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// The environment backend for these paths. A rooted layout on Unix keeps
    /// its shell profiles under the home directory as well.
    pub fn environment(&self) -> Result<EnvironmentRegistry> {
        match &self.home {
            Some(home) if cfg!(unix) => Ok(EnvironmentRegistry::new(
                ProfileStore::new(home.join("profile"), home.join("profile.machine.sh")),
                toolenv_env::NoopBroadcast,
            )
            .without_process_mirror()),
            _ => EnvironmentRegistry::for_current_platform()
                .context("no persistent environment store on this platform"),
        }
    }
}
