use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use hourly_fifo::{Config, Settings};

mod commands;

#[derive(Parser)]
#[command(name = "hfifo")]
#[command(about = "Hourly symlink rotation and retention for named-pipe feeds")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true, conflicts_with = "root")]
    config: Option<PathBuf>,

    /// Base directory holding hl_book, hl_tmp and hl (uses built-in defaults)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Override paths.book_root
    #[arg(long, global = true)]
    book_root: Option<PathBuf>,

    /// Override paths.ephemeral_root
    #[arg(long, global = true)]
    ephemeral_root: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision pipes and links, then rotate and sweep until signalled
    Run,

    /// Run the startup pass once and exit
    Bootstrap,

    /// Link the current and next hour for every stream
    Rotate {
        /// Pretend the current time is this RFC 3339 instant
        #[arg(long)]
        at: Option<String>,
    },

    /// Run retention rules once
    Sweep {
        /// Only run the named rule
        #[arg(long)]
        rule: Option<String>,
    },

    /// Show pipe and hour-slot state for every stream
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match (&cli.config, &cli.root) {
        (Some(path), _) => Config::load(path)?,
        (None, Some(root)) => {
            let root = std::path::absolute(root)
                .with_context(|| format!("Failed to resolve root {}", root.display()))?;
            Config::for_root(&root)
        }
        (None, None) => anyhow::bail!("No configuration given. Pass --config <FILE> or --root <DIR>."),
    };

    if let Some(book_root) = &cli.book_root {
        config.paths.book_root = std::path::absolute(book_root)?;
    }
    if let Some(ephemeral_root) = &cli.ephemeral_root {
        config.paths.ephemeral_root = std::path::absolute(ephemeral_root)?;
    }
    Ok(config)
}

fn resolve(config: &Config) -> Result<Settings> {
    Ok(config.resolve()?)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run => commands::run::run(resolve(&config)?),
        Commands::Bootstrap => commands::bootstrap::run(resolve(&config)?),
        Commands::Rotate { ref at } => commands::rotate::run(resolve(&config)?, at.as_deref()),
        Commands::Sweep { ref rule } => commands::sweep::run(resolve(&config)?, rule.as_deref()),
        Commands::Status { json } => commands::status::run(resolve(&config)?, json),
        Commands::Config => commands::show_config::run(&config),
    }
}
