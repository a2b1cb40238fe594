//! Gradle releases published on services.gradle.org.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const SERVICES_URL: &str = "https://services.gradle.org";

const CHUNK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },
    #[error("unreadable release list: {0}")]
    Releases(#[from] serde_json::Error),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("{0} does not hold a single gradle-* distribution")]
    Layout(PathBuf),
}

/// A stable release that can be downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub version: String,
    pub download_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseEntry {
    version: String,
    #[serde(default)]
    snapshot: bool,
    #[serde(default)]
    nightly: bool,
    #[serde(default)]
    release_nightly: bool,
    #[serde(default)]
    broken: bool,
    #[serde(default)]
    rc_for: String,
    #[serde(default)]
    milestone_for: String,
    #[serde(default)]
    download_url: String,
}

impl ReleaseEntry {
    fn is_stable(&self) -> bool {
        !(self.snapshot || self.nightly || self.release_nightly || self.broken)
            && self.rc_for.is_empty()
            && self.milestone_for.is_empty()
            && !self.download_url.is_empty()
    }
}

/// Stable releases from a `versions/all` document, in document order
/// (newest first).
pub fn parse_releases(document: &str) -> Result<Vec<Release>, DistributionError> {
    let entries: Vec<ReleaseEntry> = serde_json::from_str(document)?;
    Ok(entries
        .into_iter()
        .filter(ReleaseEntry::is_stable)
        .map(|entry| Release {
            version: entry.version,
            download_url: entry.download_url,
        })
        .collect())
}

/// Client for the release list and distribution archives.
#[derive(Clone)]
pub struct Distributions {
    base_url: String,
    agent: ureq::Agent,
}

impl Default for Distributions {
    fn default() -> Self {
        Self::new(SERVICES_URL)
    }
}

impl Distributions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn releases(&self) -> Result<Vec<Release>, DistributionError> {
        let url = format!("{}/versions/all", self.base_url);
        let response = self.get(&url)?;
        let document = response.into_string().map_err(|source| DistributionError::Io {
            path: PathBuf::from(&url),
            source,
        })?;
        parse_releases(&document)
    }

    /// Downloads `release` into `root` and unpacks it there. `progress`
    /// receives the download percentage each time it changes. Returns the
    /// distribution's home directory.
    pub fn install(
        &self,
        release: &Release,
        root: &Path,
        mut progress: impl FnMut(u8),
    ) -> Result<PathBuf, DistributionError> {
        let response = self.get(&release.download_url)?;
        let total = response
            .header("Content-Length")
            .and_then(|length| length.parse::<u64>().ok())
            .filter(|length| *length > 0);

        let archive = root.join(format!("gradle-{}-bin.zip.part", release.version));
        let io_err = |source| DistributionError::Io {
            path: archive.clone(),
            source,
        };
        let mut file = File::create(&archive).map_err(io_err)?;
        let mut reader = response.into_reader();
        let mut buffer = vec![0; CHUNK];
        let mut received = 0u64;
        let mut reported = None;
        let copied = loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break file.flush(),
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => break Err(err),
            };
            if let Err(err) = file.write_all(&buffer[..read]) {
                break Err(err);
            }
            received += read as u64;
            if let Some(total) = total {
                let percent = (received.saturating_mul(100) / total).min(100) as u8;
                if reported != Some(percent) {
                    reported = Some(percent);
                    progress(percent);
                }
            }
        };
        drop(file);

        let installed = copied
            .map_err(io_err)
            .and_then(|()| extract(&archive, root));
        let _ = fs::remove_file(&archive);
        let home = installed?;
        if reported != Some(100) {
            progress(100);
        }
        Ok(home)
    }

    fn get(&self, url: &str) -> Result<ureq::Response, DistributionError> {
        self.agent
            .get(url)
            .call()
            .map_err(|source| DistributionError::Http {
                url: url.to_owned(),
                source: Box::new(source),
            })
    }
}

impl std::fmt::Debug for Distributions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Distributions")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Unpacks a distribution archive into `root`. Entries that would land
/// outside `root` are skipped. The archive must hold exactly one top-level
/// `gradle-*` directory containing `bin`.
pub fn extract(archive: &Path, root: &Path) -> Result<PathBuf, DistributionError> {
    let archive_err = |source| DistributionError::Archive {
        path: archive.to_path_buf(),
        source,
    };
    let file = File::open(archive).map_err(|source| DistributionError::Io {
        path: archive.to_path_buf(),
        source,
    })?;
    let mut zip = zip::ZipArchive::new(file).map_err(archive_err)?;

    let mut top_level: Option<PathBuf> = None;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(archive_err)?;
        let Some(relative) = entry.enclosed_name().map(|name| name.to_path_buf()) else {
            continue;
        };
        let Some(Component::Normal(first)) = relative.components().next() else {
            continue;
        };
        let first = PathBuf::from(first);
        if *top_level.get_or_insert_with(|| first.clone()) != first {
            return Err(DistributionError::Layout(archive.to_path_buf()));
        }

        let target = root.join(&relative);
        let io_err = |source| DistributionError::Io {
            path: target.clone(),
            source,
        };
        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(io_err)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut out = File::create(&target).map_err(io_err)?;
        io::copy(&mut entry, &mut out).map_err(io_err)?;
        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode)).map_err(io_err)?;
        }
    }

    top_level
        .filter(|name| name.to_string_lossy().starts_with("gradle-"))
        .map(|name| root.join(name))
        .filter(|home| home.join("bin").is_dir())
        .ok_or_else(|| DistributionError::Layout(archive.to_path_buf()))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    use super::*;

    /// Zip with the given `(name, contents)` files; names ending in `/` are
    /// directories.
    pub(crate) fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(io::Cursor::new(Vec::new()));
        for (name, contents) in entries {
            if name.ends_with('/') {
                writer
                    .add_directory(*name, SimpleFileOptions::default())
                    .unwrap();
            } else {
                writer
                    .start_file(*name, SimpleFileOptions::default().unix_permissions(0o755))
                    .unwrap();
                writer.write_all(contents.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn only_stable_releases_are_offered() {
        let document = r#"[
            {"version": "8.9-rc-1", "rcFor": "8.9", "downloadUrl": "https://x/rc.zip"},
            {"version": "8.8", "downloadUrl": "https://x/gradle-8.8-bin.zip"},
            {"version": "8.8-20240501", "nightly": true, "downloadUrl": "https://x/n.zip"},
            {"version": "8.7-milestone-1", "milestoneFor": "8.7", "downloadUrl": "https://x/m.zip"},
            {"version": "8.6", "broken": true, "downloadUrl": "https://x/b.zip"},
            {"version": "8.5", "snapshot": true, "downloadUrl": "https://x/s.zip"},
            {"version": "7.6.4", "downloadUrl": "https://x/gradle-7.6.4-bin.zip"}
        ]"#;
        let versions: Vec<_> = parse_releases(document)
            .unwrap()
            .into_iter()
            .map(|release| release.version)
            .collect();
        assert_eq!(versions, vec!["8.8", "7.6.4"]);
    }

    #[test]
    fn malformed_release_list_is_an_error() {
        assert!(matches!(
            parse_releases("<html>maintenance</html>"),
            Err(DistributionError::Releases(_))
        ));
    }

    #[test]
    fn extract_unpacks_a_distribution() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("gradle-8.7-bin.zip");
        fs::write(
            &archive,
            zip_bytes(&[
                ("gradle-8.7/", ""),
                ("gradle-8.7/bin/gradle", "#!/bin/sh\n"),
                ("gradle-8.7/lib/gradle-launcher-8.7.jar", "jar"),
            ]),
        )
        .unwrap();

        let home = extract(&archive, dir.path()).unwrap();
        assert_eq!(home, dir.path().join("gradle-8.7"));
        assert!(home.join("bin").join("gradle").is_file());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(home.join("bin").join("gradle"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn extract_skips_entries_escaping_the_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let archive = dir.path().join("sneaky.zip");
        fs::write(
            &archive,
            zip_bytes(&[
                ("../escaped.txt", "gotcha"),
                ("gradle-8.7/bin/gradle", "#!/bin/sh\n"),
            ]),
        )
        .unwrap();

        assert_eq!(extract(&archive, &root).unwrap(), root.join("gradle-8.7"));
        assert!(!dir.path().join("escaped.txt").exists());
    }

    #[test]
    fn extract_rejects_foreign_archives() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("maven.zip");
        fs::write(&archive, zip_bytes(&[("apache-maven-3.9/bin/mvn", "")])).unwrap();
        assert!(matches!(
            extract(&archive, dir.path()),
            Err(DistributionError::Layout(_))
        ));

        fs::write(
            &archive,
            zip_bytes(&[("gradle-8.7/bin/gradle", ""), ("gradle-8.6/bin/gradle", "")]),
        )
        .unwrap();
        assert!(matches!(
            extract(&archive, dir.path()),
            Err(DistributionError::Layout(_))
        ));
    }

    #[test]
    fn install_downloads_unpacks_and_reports_progress() {
        let dir = tempdir().unwrap();
        let body = zip_bytes(&[("gradle-8.7/bin/gradle", "#!/bin/sh\n")]);
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/distributions/gradle-8.7-bin.zip")
            .with_status(200)
            .with_header("content-type", "application/zip")
            .with_body(body)
            .create();

        let distributions = Distributions::new(server.url());
        let release = Release {
            version: "8.7".into(),
            download_url: format!("{}/distributions/gradle-8.7-bin.zip", server.url()),
        };
        let mut progress = Vec::new();
        let home = distributions
            .install(&release, dir.path(), |percent| progress.push(percent))
            .unwrap();

        mock.assert();
        assert_eq!(home, dir.path().join("gradle-8.7"));
        assert_eq!(progress.last(), Some(&100));
        assert!(progress.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(!dir.path().join("gradle-8.7-bin.zip.part").exists());
    }

    #[test]
    fn failed_download_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/distributions/gradle-0.1-bin.zip")
            .with_status(404)
            .create();

        let release = Release {
            version: "0.1".into(),
            download_url: format!("{}/distributions/gradle-0.1-bin.zip", server.url()),
        };
        let err = Distributions::new(server.url())
            .install(&release, dir.path(), |_| {})
            .unwrap_err();
        assert!(matches!(err, DistributionError::Http { .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
