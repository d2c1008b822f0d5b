//! Flag Toolbar CLI
//!
//! Developer console for a local feature-flag dev server: list projects,
//! inspect merged flags, watch sync state and manage overrides.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use toolbar_core::Config;

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "flag-toolbar")]
#[command(about = "Developer console for a local feature-flag dev server")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Dev server base URL
    #[arg(long, global = true, value_name = "URL")]
    base_url: Option<String>,

    /// Project key (auto-detected when omitted)
    #[arg(short, long, global = true, value_name = "KEY")]
    project: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List projects on the dev server
    Projects,
    /// Fetch and print the merged flags once
    #[command(alias = "ls")]
    Flags {
        /// Only show overridden flags
        #[arg(long)]
        overridden: bool,
    },
    /// Keep syncing and print every state change until Ctrl-C
    Watch,
    /// Override a flag's value
    Set {
        /// Flag key
        flag: String,
        /// New value as JSON (plain text is sent as a string)
        value: String,
    },
    /// Remove a flag's override
    Clear {
        /// Flag key
        flag: String,
    },
    /// Remove every override in the project
    ClearAll,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (base_url, project_key, poll_interval_ms, request_timeout_ms)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands work on the file itself, without CLI overrides
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => {
                commands::config::show(cli.config.as_ref(), &output)
            }
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, cli.config.as_ref(), &output)
            }
        };
    }

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Projects => commands::projects::list(&config, &output).await,
        Commands::Flags { overridden } => commands::flags::list(&config, overridden, &output).await,
        Commands::Watch => commands::watch::run(&config, &output).await,
        Commands::Set { flag, value } => {
            commands::overrides::set(&config, &flag, &value, &output).await
        }
        Commands::Clear { flag } => commands::overrides::clear(&config, &flag, &output).await,
        Commands::ClearAll => commands::overrides::clear_all(&config, &output).await,
        Commands::Config { .. } => Ok(()),
    }
}

/// Load config from file and environment, then apply command-line overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(Config::config_file_path);
    let mut config = Config::load_from_path(&path).context("Failed to load configuration")?;
    debug!("Loaded configuration from {:?}", path);

    if let Some(ref url) = cli.base_url {
        config.base_url = url.clone();
    }
    if let Some(ref project) = cli.project {
        config.project_key = Some(project.clone());
    }
    Ok(config)
}

/// Log to stderr so stdout stays clean for --json
///
/// RUST_LOG takes precedence over --verbose.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("toolbar_core={},toolbar_cli={}", level, level))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_command() {
        let cli = Cli::try_parse_from([
            "flag-toolbar",
            "--project",
            "web",
            "set",
            "dark-mode",
            "true",
        ])
        .unwrap();

        assert_eq!(cli.project.as_deref(), Some("web"));
        match cli.command {
            Commands::Set { flag, value } => {
                assert_eq!(flag, "dark-mode");
                assert_eq!(value, "true");
            }
            _ => panic!("expected set command"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["flag-toolbar", "flags", "--json", "--overridden"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Flags { overridden: true }));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["flag-toolbar"]).is_err());
    }

    #[test]
    fn test_load_config_applies_cli_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "base_url = \"http://file:1\"\nproject_key = \"file\"\n").unwrap();

        let cli = Cli::try_parse_from([
            "flag-toolbar",
            "--config",
            path.to_str().unwrap(),
            "--base-url",
            "http://cli:2",
            "projects",
        ])
        .unwrap();

        let config = load_config(&cli).unwrap();
        assert_eq!(config.base_url, "http://cli:2");
    }
}
