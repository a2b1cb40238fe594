//! Gradle version manager for toolenv.
//!
//! Keeps a list of local Gradle installations in the configuration, downloads
//! new ones from services.gradle.org, and points `GRADLE_HOME` plus the
//! user's search path at the one chosen as active.

mod distribution;

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use toolenv_plugin_sdk::panic_message;
use toolenv_plugin_sdk::prelude::*;

pub use distribution::{
    extract, parse_releases, DistributionError, Distributions, Release, SERVICES_URL,
};

pub const INSTALLED_VERSIONS_KEY: &str = "gradle_installed_versions";
pub const GRADLE_HOME_KEY: &str = "gradle_home";
pub const ACTIVE_VERSION_KEY: &str = "gradle_active_version";
/// Shared with the host's tool check.
pub const GRADLE_PATH_KEY: &str = "gradle_path";
pub const HOME_VARIABLE: &str = "GRADLE_HOME";

const USE_INSTALLED: &str = "Use an installed version";
const SCAN: &str = "Add installations found in a directory";
const DOWNLOAD: &str = "Download a release from services.gradle.org";
/// Newest releases offered for download.
const RELEASES_OFFERED: usize = 15;

#[derive(Debug, Default)]
pub struct GradlePlugin {
    distributions: Distributions,
}

impl GradlePlugin {
    pub fn with_distributions(distributions: Distributions) -> Self {
        Self { distributions }
    }
}

impl Plugin for GradlePlugin {
    fn name(&self) -> &str {
        "Gradle"
    }

    fn register(&mut self, api: &CapabilityApi) -> Result<(), PluginError> {
        let default_home = dirs::home_dir()
            .map(|home| home.join(".gradle").to_string_lossy().into_owned())
            .unwrap_or_default();
        let seeded_versions = api.seed_config(INSTALLED_VERSIONS_KEY, json!([]))?;
        let seeded_home = api.seed_config(GRADLE_HOME_KEY, Value::String(default_home))?;
        if seeded_versions || seeded_home {
            api.save_config(true)?;
        }
        Ok(())
    }

    fn is_interactive(&self) -> bool {
        true
    }

    fn show(&mut self, surface: &mut dyn Surface, ctx: &PluginContext<'_>) -> Result<(), PluginError> {
        let api = ctx.api;
        let installed = installed_versions(api);
        surface.heading("Gradle versions");
        if installed.is_empty() {
            surface.text("No Gradle installations are known yet.");
        } else {
            surface.list(&labels(&installed));
        }
        if let Some(active) = api.config_value(ACTIVE_VERSION_KEY).and_then(as_string) {
            surface.text(&format!("Active: {active}"));
        }

        let actions = vec![
            USE_INSTALLED.to_string(),
            SCAN.to_string(),
            DOWNLOAD.to_string(),
        ];
        match surface.choose("What do you want to do?", &actions) {
            Some(0) => activate(surface, api, &installed),
            Some(1) => scan(surface, api, installed),
            Some(2) => download(surface, api, installed, &self.distributions),
            _ => Ok(()),
        }
    }
}

declare_toolenv_plugin!(GradlePlugin::default());

fn activate(
    surface: &mut dyn Surface,
    api: &CapabilityApi,
    installed: &[PathBuf],
) -> Result<(), PluginError> {
    if installed.is_empty() {
        surface.notify(NoticeKind::Warning, "Add a Gradle installation first.");
        return Ok(());
    }
    let Some(choice) = surface.choose("Version to activate", &labels(installed)) else {
        return Ok(());
    };
    let home = &installed[choice];
    if !home.join("bin").is_dir() {
        surface.notify(
            NoticeKind::Error,
            &format!("{} has no bin directory", home.display()),
        );
        return Ok(());
    }

    let home_text = home.to_string_lossy();
    api.set_env_var(HOME_VARIABLE, &home_text, Scope::User)?;
    api.append_to_path(PathEntry::under_variable(HOME_VARIABLE), Scope::User)?;
    api.set_config(ACTIVE_VERSION_KEY, Value::String(home_text.to_string()), true)?;
    api.set_config(
        GRADLE_PATH_KEY,
        Value::String(home.join("bin").to_string_lossy().into_owned()),
        true,
    )?;
    api.log(Level::INFO, &format!("activated {}", home.display()));
    surface.notify(
        NoticeKind::Success,
        "Gradle version updated. Open a new terminal to use it.",
    );
    Ok(())
}

fn scan(
    surface: &mut dyn Surface,
    api: &CapabilityApi,
    mut installed: Vec<PathBuf>,
) -> Result<(), PluginError> {
    let default_root = api
        .config_value(GRADLE_HOME_KEY)
        .and_then(as_string)
        .unwrap_or_default();
    let root = surface
        .input(&format!("Directory to scan [{default_root}]"))
        .unwrap_or(default_root);
    let root = PathBuf::from(root);
    if !root.is_dir() {
        surface.notify(
            NoticeKind::Error,
            &format!("{} is not a directory", root.display()),
        );
        return Ok(());
    }

    let candidates = distributions_in(&root)
        .map_err(|err| PluginError::message(format!("failed to scan {}: {err}", root.display())))?;
    let total = candidates.len().max(1);
    let mut added = 0;
    for (index, candidate) in candidates.into_iter().enumerate() {
        api.report_progress(((index + 1) * 100 / total) as u8, ProgressState::Normal);
        if !installed.contains(&candidate) {
            installed.push(candidate);
            added += 1;
        }
    }
    api.report_progress(0, ProgressState::Cleared);

    if added > 0 {
        let list = installed
            .iter()
            .map(|path| Value::String(path.to_string_lossy().into_owned()))
            .collect();
        api.set_config(INSTALLED_VERSIONS_KEY, Value::Array(list), true)?;
    }
    surface.notify(
        NoticeKind::Info,
        &format!("Found {added} new Gradle installation(s)."),
    );
    Ok(())
}

/// Fetches the release list, then downloads and unpacks the chosen release
/// under `gradle_home` on a worker thread.
fn download(
    surface: &mut dyn Surface,
    api: &CapabilityApi,
    mut installed: Vec<PathBuf>,
    distributions: &Distributions,
) -> Result<(), PluginError> {
    let releases = match distributions.releases() {
        Ok(releases) => releases,
        Err(err) => {
            api.log(Level::WARN, &format!("release list unavailable: {err}"));
            surface.notify(
                NoticeKind::Error,
                &format!("Could not fetch Gradle releases: {err}"),
            );
            return Ok(());
        }
    };
    if releases.is_empty() {
        surface.notify(NoticeKind::Warning, "No Gradle releases are available.");
        return Ok(());
    }
    let offered: Vec<Release> = releases.into_iter().take(RELEASES_OFFERED).collect();
    let versions: Vec<String> = offered.iter().map(|release| release.version.clone()).collect();
    let Some(choice) = surface.choose("Release to download", &versions) else {
        return Ok(());
    };
    let release = offered[choice].clone();

    let root = api
        .config_value(GRADLE_HOME_KEY)
        .and_then(as_string)
        .filter(|root| !root.is_empty())
        .ok_or_else(|| PluginError::message("gradle_home is not configured"))?;
    let root = api.ensure_directory(root)?;
    let target = root.join(format!("gradle-{}", release.version));
    if installed.contains(&target) {
        surface.notify(
            NoticeKind::Info,
            &format!("Gradle {} is already installed.", release.version),
        );
        return Ok(());
    }

    let version = release.version.clone();
    let (progress_tx, progress_rx) = crossbeam_channel::unbounded();
    let worker_api = api.clone();
    let worker_distributions = distributions.clone();
    let worker = thread::Builder::new()
        .name("gradle-download".into())
        .spawn(move || {
            worker_distributions.install(&release, &root, |percent| {
                worker_api.report_progress(percent, ProgressState::Normal);
                let _ = progress_tx.send(percent);
            })
        })
        .map_err(|err| PluginError::message(format!("failed to start the download: {err}")))?;

    surface.text(&format!("Downloading Gradle {version}"));
    let mut shown = 0;
    for percent in progress_rx.iter() {
        if percent >= shown + 10 || (percent == 100 && shown < 100) {
            shown = percent;
            surface.text(&format!("{percent}%"));
        }
    }
    let outcome = worker
        .join()
        .map_err(|panic| PluginError::Panicked(panic_message(panic.as_ref())))?;

    match outcome {
        Ok(home) => {
            api.report_progress(100, ProgressState::Cleared);
            installed.push(home.clone());
            let list = installed
                .iter()
                .map(|path| Value::String(path.to_string_lossy().into_owned()))
                .collect();
            api.set_config(INSTALLED_VERSIONS_KEY, Value::Array(list), true)?;
            api.log(Level::INFO, &format!("installed {}", home.display()));
            surface.notify(
                NoticeKind::Success,
                &format!("Gradle {version} installed at {}.", home.display()),
            );
        }
        Err(err) => {
            api.report_progress(0, ProgressState::Error);
            api.log(Level::WARN, &format!("download of {version} failed: {err}"));
            surface.notify(
                NoticeKind::Error,
                &format!("Downloading Gradle {version} failed: {err}"),
            );
        }
    }
    Ok(())
}

/// `gradle-*` directories with a `bin` folder, sorted by name.
fn distributions_in(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        let is_distribution = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("gradle-"));
        if is_distribution && path.join("bin").is_dir() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

fn installed_versions(api: &CapabilityApi) -> Vec<PathBuf> {
    match api.config_value(INSTALLED_VERSIONS_KEY) {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(as_string)
            .map(PathBuf::from)
            .collect(),
        _ => Vec::new(),
    }
}

fn labels(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|path| {
            path.file_name()
                .map(|name| format!("{} ({})", name.to_string_lossy(), path.display()))
                .unwrap_or_else(|| path.display().to_string())
        })
        .collect()
}

fn as_string(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        _ => None,
    }
}
