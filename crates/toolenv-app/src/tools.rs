use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use clap::ValueEnum;
use thiserror::Error;

/// Development tools whose installation the host can check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Tool {
    Node,
    Java,
    Gradle,
}

impl Tool {
    /// Configuration key holding the tool's binary directory.
    pub fn config_key(self) -> &'static str {
        match self {
            Tool::Node => "node_path",
            Tool::Java => "java_path",
            Tool::Gradle => "gradle_path",
        }
    }

    fn program(self) -> &'static str {
        match (self, cfg!(windows)) {
            (Tool::Node, false) => "node",
            (Tool::Node, true) => "node.exe",
            (Tool::Java, false) => "java",
            (Tool::Java, true) => "java.exe",
            (Tool::Gradle, false) => "gradle",
            (Tool::Gradle, true) => "gradle.bat",
        }
    }

    fn version_args(self) -> &'static [&'static str] {
        match self {
            Tool::Node => &["-v"],
            Tool::Java => &["-version"],
            Tool::Gradle => &["--version"],
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tool::Node => "Node.js",
            Tool::Java => "Java",
            Tool::Gradle => "Gradle",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolVersion {
    pub tool: Tool,
    pub program: PathBuf,
    pub version: String,
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("{tool} was not found at {program}")]
    NotFound { tool: Tool, program: PathBuf },
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {status}")]
    Failed { program: PathBuf, status: String },
    #[error("could not read a {tool} version from `{output}`")]
    Unrecognised { tool: Tool, output: String },
}

/// Runs the tool's version command, preferring the binary inside
/// `configured_dir` over whatever `PATH` resolves.
pub fn detect(tool: Tool, configured_dir: Option<&Path>) -> Result<ToolVersion, DetectError> {
    let program = match configured_dir.filter(|dir| !dir.as_os_str().is_empty()) {
        Some(dir) => dir.join(tool.program()),
        None => PathBuf::from(tool.program()),
    };
    tracing::debug!(%tool, program = %program.display(), "probing tool");

    let output = Command::new(&program)
        .args(tool.version_args())
        .output()
        .map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => DetectError::NotFound {
                tool,
                program: program.clone(),
            },
            _ => DetectError::Spawn {
                program: program.clone(),
                source,
            },
        })?;
    if !output.status.success() {
        return Err(DetectError::Failed {
            program,
            status: output.status.to_string(),
        });
    }

    // `java -version` reports on stderr.
    let text = if tool == Tool::Java || output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    };
    let version = parse_version(tool, &text).ok_or_else(|| DetectError::Unrecognised {
        tool,
        output: text.trim().to_owned(),
    })?;
    Ok(ToolVersion {
        tool,
        program,
        version,
    })
}

fn parse_version(tool: Tool, output: &str) -> Option<String> {
    match tool {
        Tool::Node => output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(|line| line.trim_start_matches('v').to_owned()),
        Tool::Java => output.lines().find_map(|line| {
            let (_, rest) = line.split_once("version \"")?;
            let (version, _) = rest.split_once('"')?;
            Some(version.to_owned())
        }),
        Tool::Gradle => output.lines().find_map(|line| {
            line.trim()
                .strip_prefix("Gradle ")
                .map(|version| version.trim().to_owned())
        }),
    }
    .filter(|version| !version.is_empty())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn versions_are_read_from_each_tool_format() {
        assert_eq!(parse_version(Tool::Node, "v20.11.1\n").as_deref(), Some("20.11.1"));
        assert_eq!(
            parse_version(
                Tool::Java,
                "openjdk version \"21.0.2\" 2024-01-16\nOpenJDK Runtime Environment\n"
            )
            .as_deref(),
            Some("21.0.2")
        );
        assert_eq!(
            parse_version(
                Tool::Gradle,
                "\n------------------------------------------------------------\nGradle 8.7\n------------------------------------------------------------\n"
            )
            .as_deref(),
            Some("8.7")
        );
        assert_eq!(parse_version(Tool::Java, "garbage"), None);
    }

    #[test]
    fn missing_binary_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = detect(Tool::Node, Some(dir.path())).unwrap_err();
        assert!(matches!(err, DetectError::NotFound { tool: Tool::Node, .. }));
    }

    #[cfg(unix)]
    #[test]
    fn configured_directory_takes_precedence() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("java");
        std::fs::write(&script, "#!/bin/sh\necho 'openjdk version \"17.0.9\" 2023-10-17' >&2\n")
            .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let found = detect(Tool::Java, Some(dir.path())).unwrap();
        assert_eq!(found.version, "17.0.9");
        assert_eq!(found.program, script);
    }
}
