use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Subdirectory appended to a variable reference by [`PathEntry::UnderVariable`].
pub const VARIABLE_SUBDIR: &str = "bin";

/// Where a persistent variable lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    User,
    Machine,
}

impl Scope {
    pub const ALL: [Scope; 2] = [Scope::User, Scope::Machine];

    pub fn label(self) -> &'static str {
        match self {
            Scope::User => "user",
            Scope::Machine => "machine",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReferenceStyle {
    /// `%NAME%`
    Percent,
    /// `$NAME`
    Dollar,
}

/// How a store spells PATH-like values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathSyntax {
    /// Name of the search-path variable.
    pub variable: &'static str,
    /// Separator between search-path entries.
    pub separator: char,
    /// Separator between directory components.
    pub dir_separator: char,
    style: ReferenceStyle,
}

impl PathSyntax {
    pub const fn windows() -> Self {
        Self {
            variable: "Path",
            separator: ';',
            dir_separator: '\\',
            style: ReferenceStyle::Percent,
        }
    }

    pub const fn unix() -> Self {
        Self {
            variable: "PATH",
            separator: ':',
            dir_separator: '/',
            style: ReferenceStyle::Dollar,
        }
    }

    pub const fn native() -> Self {
        if cfg!(windows) {
            Self::windows()
        } else {
            Self::unix()
        }
    }

    /// Unexpanded reference to `name`.
    pub fn reference(&self, name: &str) -> String {
        match self.style {
            ReferenceStyle::Percent => format!("%{name}%"),
            ReferenceStyle::Dollar => format!("${name}"),
        }
    }

    pub fn split<'a>(&self, value: &'a str) -> impl Iterator<Item = &'a str> {
        value.split(self.separator)
    }

    /// Replaces references to variables present in the current process.
    /// Unknown references are kept verbatim.
    pub fn expand(&self, value: &str) -> String {
        match self.style {
            ReferenceStyle::Percent => expand_percent(value),
            ReferenceStyle::Dollar => expand_dollar(value),
        }
    }
}

/// A search-path entry to add or remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathEntry {
    /// Used verbatim.
    Literal(String),
    /// `%NAME%\bin` or `$NAME/bin`, resolved by the shell or OS at use time.
    UnderVariable(String),
}

impl PathEntry {
    pub fn under_variable(name: impl Into<String>) -> Self {
        Self::UnderVariable(name.into())
    }

    pub fn render(&self, syntax: &PathSyntax) -> String {
        match self {
            PathEntry::Literal(entry) => entry.clone(),
            PathEntry::UnderVariable(name) => format!(
                "{}{}{}",
                syntax.reference(name),
                syntax.dir_separator,
                VARIABLE_SUBDIR
            ),
        }
    }
}

impl From<&str> for PathEntry {
    fn from(entry: &str) -> Self {
        Self::Literal(entry.to_string())
    }
}

impl From<String> for PathEntry {
    fn from(entry: String) -> Self {
        Self::Literal(entry)
    }
}

impl From<&Path> for PathEntry {
    fn from(entry: &Path) -> Self {
        Self::Literal(entry.display().to_string())
    }
}

fn expand_percent(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('%') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(resolved) if !name.is_empty() => out.push_str(&resolved),
                    _ => {
                        out.push('%');
                        out.push_str(name);
                        out.push('%');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn expand_dollar(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.char_indices().peekable();
    while let Some((index, ch)) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }
        let braced = matches!(chars.peek(), Some((_, '{')));
        if braced {
            chars.next();
        }
        let start = index + if braced { 2 } else { 1 };
        let mut end = start;
        while let Some(&(i, c)) = chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                end = i + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let name = &value[start..end];
        let closed = !braced || matches!(chars.peek(), Some((_, '}')));
        if braced && closed {
            chars.next();
        }
        match std::env::var(name) {
            Ok(resolved) if !name.is_empty() && closed => out.push_str(&resolved),
            _ => {
                out.push('$');
                if braced {
                    out.push('{');
                }
                out.push_str(name);
                if braced && closed {
                    out.push('}');
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn renders_variable_entries_per_platform() {
        let entry = PathEntry::under_variable("GRADLE_HOME");
        assert_eq!(entry.render(&PathSyntax::windows()), r"%GRADLE_HOME%\bin");
        assert_eq!(entry.render(&PathSyntax::unix()), "$GRADLE_HOME/bin");
        assert_eq!(
            PathEntry::from("C:/nodejs").render(&PathSyntax::windows()),
            "C:/nodejs"
        );
    }

    #[test]
    fn expands_known_references_only() {
        std::env::set_var("TOOLENV_SCOPE_TEST_HOME", "/opt/tool");
        let unix = PathSyntax::unix();
        assert_eq!(unix.expand("$TOOLENV_SCOPE_TEST_HOME/bin"), "/opt/tool/bin");
        assert_eq!(unix.expand("${TOOLENV_SCOPE_TEST_HOME}/bin"), "/opt/tool/bin");
        assert_eq!(
            unix.expand("$TOOLENV_SCOPE_TEST_MISSING/bin"),
            "$TOOLENV_SCOPE_TEST_MISSING/bin"
        );
        assert_eq!(unix.expand("cost: $"), "cost: $");

        let windows = PathSyntax::windows();
        assert_eq!(
            windows.expand(r"%TOOLENV_SCOPE_TEST_HOME%\bin"),
            r"/opt/tool\bin"
        );
        assert_eq!(windows.expand("100%"), "100%");
        assert_eq!(
            windows.expand("%TOOLENV_SCOPE_TEST_MISSING%"),
            "%TOOLENV_SCOPE_TEST_MISSING%"
        );
    }

    #[test]
    fn scope_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Scope::Machine).unwrap(), "\"machine\"");
        assert_eq!(Scope::User.to_string(), "user");
    }
}
