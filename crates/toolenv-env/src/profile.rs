use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::{EnvError, EnvStore, PathSyntax, Scope};

const BLOCK_START: &str = "# >>> toolenv managed environment >>>";
const BLOCK_END: &str = "# <<< toolenv managed environment <<<";

/// [`EnvStore`] backed by POSIX shell profile files.
///
/// Variables live in a delimited block of `export NAME="value"` lines; text
/// outside the block is preserved. A search path without an explicit entry
/// reads as a reference to the inherited value so appends extend it.
#[derive(Debug)]
pub struct ProfileStore {
    user: PathBuf,
    machine: PathBuf,
    guard: Mutex<()>,
}

impl ProfileStore {
    pub fn new(user: impl Into<PathBuf>, machine: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            machine: machine.into(),
            guard: Mutex::new(()),
        }
    }

    /// `~/.profile` for the user and `/etc/profile.d/toolenv.sh` for the
    /// machine.
    pub fn default_locations() -> Result<Self, EnvError> {
        let home = dirs::home_dir().ok_or(EnvError::UnsupportedPlatform)?;
        Ok(Self::new(
            home.join(".profile"),
            "/etc/profile.d/toolenv.sh",
        ))
    }

    pub fn file(&self, scope: Scope) -> &Path {
        match scope {
            Scope::User => &self.user,
            Scope::Machine => &self.machine,
        }
    }

    fn load(&self, scope: Scope) -> Result<Profile, EnvError> {
        match fs::read_to_string(self.file(scope)) {
            Ok(raw) => Ok(Profile::parse(&raw)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Profile::default()),
            Err(err) => Err(EnvError::store(scope, err)),
        }
    }

    fn persist(&self, name: &str, scope: Scope, profile: &Profile) -> Result<(), EnvError> {
        let path = self.file(scope);
        // A symlinked profile is replaced at its target.
        let target = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| EnvError::access(name, scope, err))?;
        }
        replace_file(&target, &profile.render()).map_err(|err| EnvError::access(name, scope, err))
    }
}

/// Writes `contents` to a sibling and renames it over `target`, keeping the
/// permissions `target` had.
fn replace_file(target: &Path, contents: &str) -> io::Result<()> {
    let mut staging_name = target.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    staging_name.push(".tmp");
    let staging = target.with_file_name(staging_name);

    let staged = fs::write(&staging, contents).and_then(|()| match fs::metadata(target) {
        Ok(existing) => fs::set_permissions(&staging, existing.permissions()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    });
    let replaced = staged.and_then(|()| fs::rename(&staging, target));
    if replaced.is_err() {
        let _ = fs::remove_file(&staging);
    }
    replaced
}

impl EnvStore for ProfileStore {
    fn read(&self, name: &str, scope: Scope) -> Result<Option<String>, EnvError> {
        let _guard = self.guard.lock();
        let profile = self.load(scope)?;
        let value = profile.get(name).map(str::to_string);
        let syntax = self.path_syntax();
        if value.is_none() && name == syntax.variable {
            return Ok(Some(syntax.reference(name)));
        }
        Ok(value)
    }

    fn write(&self, name: &str, value: &str, scope: Scope) -> Result<(), EnvError> {
        self.check_name(name)?;
        if value.contains(['\n', '\r', '\0']) {
            return Err(EnvError::InvalidValue {
                name: name.to_string(),
                reason: "profile lines cannot hold line breaks or NUL",
            });
        }
        let _guard = self.guard.lock();
        let mut profile = self.load(scope)?;
        profile.set(name, value);
        self.persist(name, scope, &profile)
    }

    fn delete(&self, name: &str, scope: Scope) -> Result<(), EnvError> {
        let _guard = self.guard.lock();
        let mut profile = self.load(scope)?;
        if !profile.remove(name) {
            return Ok(());
        }
        self.persist(name, scope, &profile)
    }

    fn list(&self, scope: Scope) -> Result<Vec<(String, String)>, EnvError> {
        let _guard = self.guard.lock();
        let mut vars = self.load(scope)?.vars;
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(vars)
    }

    fn path_syntax(&self) -> PathSyntax {
        PathSyntax::unix()
    }

    fn check_name(&self, name: &str) -> Result<(), EnvError> {
        let mut chars = name.chars();
        let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(())
        } else {
            Err(EnvError::InvalidName(name.to_string()))
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Profile {
    before: Vec<String>,
    vars: Vec<(String, String)>,
    after: Vec<String>,
}

impl Profile {
    fn parse(raw: &str) -> Self {
        let lines: Vec<&str> = raw.lines().collect();
        let start = lines.iter().position(|line| line.trim() == BLOCK_START);
        let end = start.and_then(|start| {
            lines[start..]
                .iter()
                .position(|line| line.trim() == BLOCK_END)
                .map(|offset| start + offset)
        });

        match (start, end) {
            (Some(start), Some(end)) => Self {
                before: lines[..start].iter().map(|l| l.to_string()).collect(),
                vars: lines[start + 1..end]
                    .iter()
                    .filter_map(|line| parse_export(line))
                    .collect(),
                after: lines[end + 1..].iter().map(|l| l.to_string()).collect(),
            },
            _ => Self {
                before: lines.iter().map(|l| l.to_string()).collect(),
                vars: Vec::new(),
                after: Vec::new(),
            },
        }
    }

    fn render(&self) -> String {
        let mut lines: Vec<String> = self.before.clone();
        if !self.vars.is_empty() {
            if lines.last().is_some_and(|line| !line.trim().is_empty()) {
                lines.push(String::new());
            }
            lines.push(BLOCK_START.to_string());
            for (name, value) in &self.vars {
                lines.push(format!("export {name}=\"{}\"", escape(value)));
            }
            lines.push(BLOCK_END.to_string());
        }
        lines.extend(self.after.iter().cloned());
        let mut out = lines.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    fn set(&mut self, name: &str, value: &str) {
        match self.vars.iter_mut().find(|(existing, _)| existing == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.vars.push((name.to_string(), value.to_string())),
        }
    }

    fn remove(&mut self, name: &str) -> bool {
        let before = self.vars.len();
        self.vars.retain(|(existing, _)| existing != name);
        self.vars.len() != before
    }
}

fn parse_export(line: &str) -> Option<(String, String)> {
    let rest = line.trim().strip_prefix("export ")?;
    let (name, value) = rest.split_once('=')?;
    let value = value.strip_prefix('"')?.strip_suffix('"')?;
    Some((name.trim().to_string(), unescape(value)))
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '"' | '`') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}
