use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use toolenv_app::{HostContext, HostPaths, TerminalSurface, Tool};
use toolenv_env::{EnvSnapshot, PathEntry, Scope};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Point toolenv at local Node.js, Java and Gradle installs and manage their environment"
)]
struct Cli {
    /// Keep configuration, plugins and the plugin manifest under this directory
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Install, remove, list and open plugins
    #[command(subcommand)]
    Plugins(PluginCommand),
    /// Read and write the persisted configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Read and write persistent environment variables
    #[command(subcommand)]
    Env(EnvCommand),
    /// Report the version of an installed tool
    Check {
        #[arg(value_enum)]
        tool: Tool,
    },
    /// Check whether a path could be used as a tool location
    ValidatePath { path: PathBuf },
    /// Keep the host running and report configuration changes until Ctrl+C
    Watch {
        /// Poll interval of the configuration watcher in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

#[derive(Debug, Subcommand)]
enum PluginCommand {
    List,
    /// Load a plugin library and install it
    Add { file: PathBuf },
    Remove { name: String },
    /// Open a plugin's interactive view
    Show { name: String },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print one key, or the whole configuration
    Get { key: Option<String> },
    /// Store a value; valid JSON is stored as JSON, anything else as a string
    Set { key: String, value: String },
    /// Store the binary directory of a tool
    SetPath {
        #[arg(value_enum)]
        tool: Tool,
        dir: PathBuf,
        /// Create the directory if it does not exist
        #[arg(long)]
        create: bool,
    },
}

#[derive(Debug, Args)]
struct ScopeArg {
    /// Use the machine-wide store instead of the user's
    #[arg(long)]
    machine: bool,
}

impl ScopeArg {
    fn scope(&self) -> Scope {
        if self.machine {
            Scope::Machine
        } else {
            Scope::User
        }
    }
}

#[derive(Debug, Args)]
struct PathEntryArg {
    /// Literal directory to add or remove
    #[arg(required_unless_present = "under", conflicts_with = "under")]
    entry: Option<String>,
    /// Use the `bin` directory under this variable instead of a literal path
    #[arg(long, value_name = "VARIABLE")]
    under: Option<String>,
}

impl PathEntryArg {
    fn entry(self) -> PathEntry {
        match (self.under, self.entry) {
            (Some(variable), _) => PathEntry::under_variable(variable),
            (None, Some(entry)) => PathEntry::Literal(entry),
            (None, None) => PathEntry::Literal(String::new()),
        }
    }
}

#[derive(Debug, Subcommand)]
enum EnvCommand {
    Get {
        name: String,
        #[command(flatten)]
        scope: ScopeArg,
    },
    Set {
        name: String,
        value: String,
        #[command(flatten)]
        scope: ScopeArg,
    },
    Unset {
        name: String,
        #[command(flatten)]
        scope: ScopeArg,
    },
    /// Append an entry to the search path unless it is already there
    PathAdd {
        #[command(flatten)]
        entry: PathEntryArg,
        #[command(flatten)]
        scope: ScopeArg,
    },
    PathRemove {
        #[command(flatten)]
        entry: PathEntryArg,
        #[command(flatten)]
        scope: ScopeArg,
    },
    /// Write every variable of a scope to a JSON file
    Backup {
        file: PathBuf,
        #[command(flatten)]
        scope: ScopeArg,
    },
    /// Write back the variables saved by `backup`
    Restore { file: PathBuf },
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let paths = match &cli.home {
        Some(home) => HostPaths::rooted(home),
        None => HostPaths::user_default()?,
    };

    if let Commands::ValidatePath { path } = &cli.command {
        let valid = toolenv_env::validate_path(path);
        println!("{}", if valid { "valid" } else { "invalid" });
        return Ok(if valid { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    }

    let mut ctx = HostContext::start(paths)?;
    let result = run(&mut ctx, cli.command);
    ctx.pump();
    flush_notices(&mut ctx);
    result.map(|()| ExitCode::SUCCESS)
}

fn run(ctx: &mut HostContext, command: Commands) -> Result<()> {
    match command {
        Commands::Plugins(command) => plugins(ctx, command),
        Commands::Config(command) => config(ctx, command),
        Commands::Env(command) => env(ctx, command),
        Commands::Check { tool } => {
            let found = ctx.check_tool(tool)?;
            println!("{tool} {} ({})", found.version, found.program.display());
            Ok(())
        }
        Commands::ValidatePath { .. } => Ok(()),
        Commands::Watch { interval_ms } => watch(ctx, Duration::from_millis(interval_ms)),
    }
}

fn plugins(ctx: &mut HostContext, command: PluginCommand) -> Result<()> {
    ctx.load_plugins();
    match command {
        PluginCommand::List => {
            for (filename, name, state) in ctx.registry().manifest_states() {
                let interactive = name
                    .and_then(|name| ctx.registry().record(name))
                    .is_some_and(|record| record.is_interactive());
                let state = state.map_or("missing".to_owned(), |state| format!("{state:?}").to_lowercase());
                println!(
                    "{}\t{filename}\t{state}{}",
                    name.unwrap_or("-"),
                    if interactive { "\tinteractive" } else { "" }
                );
            }
        }
        PluginCommand::Add { file } => {
            let name = ctx.add_plugin(&file)?;
            println!("registered {name}");
        }
        PluginCommand::Remove { name } => {
            ctx.remove_plugin(&name)?;
            println!("removed {name}");
        }
        PluginCommand::Show { name } => {
            let mut surface = TerminalSurface::stdio();
            ctx.show_plugin(&name, &mut surface)?;
        }
    }
    Ok(())
}

fn config(ctx: &mut HostContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Get { key: None } => {
            let values = Value::Object(ctx.api().config_snapshot());
            println!("{}", serde_json::to_string_pretty(&values)?);
        }
        ConfigCommand::Get { key: Some(key) } => match ctx.api().config_value(&key) {
            Some(Value::String(text)) => println!("{text}"),
            Some(value) => println!("{value}"),
            None => anyhow::bail!("no configuration value named `{key}`"),
        },
        ConfigCommand::Set { key, value } => {
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            ctx.api().set_config(&key, value, false)?;
        }
        ConfigCommand::SetPath { tool, dir, create } => {
            let dir = ctx.set_tool_path(tool, &dir, create)?;
            println!("{} = {}", tool.config_key(), dir.display());
        }
    }
    Ok(())
}

fn env(ctx: &mut HostContext, command: EnvCommand) -> Result<()> {
    let api = ctx.api().clone();
    match command {
        EnvCommand::Get { name, scope } => match api.env_var(&name, scope.scope())? {
            Some(value) => println!("{value}"),
            None => anyhow::bail!("`{name}` is not set in the {} scope", scope.scope()),
        },
        EnvCommand::Set { name, value, scope } => api.set_env_var(&name, &value, scope.scope())?,
        EnvCommand::Unset { name, scope } => api.remove_env_var(&name, scope.scope())?,
        EnvCommand::PathAdd { entry, scope } => {
            let added = api.append_to_path(entry.entry(), scope.scope())?;
            println!("{}", if added { "added" } else { "already present" });
        }
        EnvCommand::PathRemove { entry, scope } => {
            let removed = api.remove_from_path(entry.entry(), scope.scope())?;
            println!("{}", if removed { "removed" } else { "not present" });
        }
        EnvCommand::Backup { file, scope } => {
            let snapshot = ctx.environment().snapshot(scope.scope())?;
            write_snapshot(&file, &snapshot)?;
            println!("saved {} variables", snapshot.variables.len());
        }
        EnvCommand::Restore { file } => {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let snapshot: EnvSnapshot = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not an environment backup", file.display()))?;
            let written = ctx.environment().restore(&snapshot)?;
            println!("restored {written} variables");
        }
    }
    Ok(())
}

fn write_snapshot(file: &Path, snapshot: &EnvSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    fs::write(file, json).with_context(|| format!("failed to write {}", file.display()))
}

fn watch(ctx: &mut HostContext, interval: Duration) -> Result<()> {
    ctx.start_watcher(interval)?;
    let loaded = ctx.load_plugins();
    println!(
        "Watching {} with {loaded} plugin(s) loaded, press Ctrl+C to stop.",
        ctx.paths().config_file.display()
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        ctx.wait(Duration::from_millis(200));
        flush_notices(ctx);
    }
    Ok(())
}

fn flush_notices(ctx: &mut HostContext) {
    let mut stderr = io::stderr().lock();
    for notice in ctx.notices().drain() {
        let _ = writeln!(stderr, "{notice}");
    }
}
