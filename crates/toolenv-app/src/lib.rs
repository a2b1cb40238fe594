//! The toolenv host: wires configuration, the persistent environment, and
//! the plugin registry together on one main loop, and renders plugin views
//! on a terminal.

pub mod context;
pub mod notices;
pub mod paths;
pub mod terminal;
pub mod tools;

pub use context::HostContext;
pub use notices::{Notice, NoticeKind, Notices};
pub use paths::HostPaths;
pub use terminal::TerminalSurface;
pub use tools::{detect, DetectError, Tool, ToolVersion};
