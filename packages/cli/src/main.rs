use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::process;

use mineshed_config::ConfigStore;

mod run;
mod saved;

#[derive(Parser)]
#[command(name = "mineshed")]
#[command(about = "Mineshed - game server supervision from the terminal")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.mineshed/mineshed.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start servers and stream their consoles until Ctrl-C
    Run {
        /// Server names to start (default: every configured server)
        names: Vec<String>,
    },
    /// List configured servers
    Servers,
    /// Manage the saved-command tree
    #[command(subcommand)]
    Commands(saved::SavedCommands),
    /// Load the config, migrating old versions, and rewrite it at the
    /// current schema version
    Migrate,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(mineshed_config::default_config_path);

    let result = match cli.command {
        Commands::Run { names } => run::run(&config_path, names).await,
        Commands::Servers => list_servers(&config_path),
        Commands::Commands(command) => saved::handle(&config_path, command),
        Commands::Migrate => migrate(&config_path),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

fn list_servers(config_path: &Path) -> anyhow::Result<()> {
    let config = ConfigStore::new(config_path).load()?;
    if config.servers.is_empty() {
        println!("No servers configured in {}", config_path.display());
        return Ok(());
    }
    for server in &config.servers {
        println!(
            "{} ({})",
            server.name.bold(),
            server.launch_type.as_str().cyan()
        );
        println!("   id: {}", server.id);
        println!("   dir: {}", server.working_directory.display());
        println!(
            "   launch: {} {}",
            server.launch.program,
            server.launch.args.join(" ")
        );
        if let (Some(min), Some(max)) = (server.memory_min_mb, server.memory_max_mb) {
            println!("   heap: {}M - {}M", min, max);
        }
    }
    Ok(())
}

fn migrate(config_path: &Path) -> anyhow::Result<()> {
    let store = ConfigStore::new(config_path);
    let config = store.load()?;
    store.save(&config)?;
    println!(
        "{} {} rewritten at version {}",
        "✅".green(),
        config_path.display(),
        config.version
    );
    Ok(())
}
