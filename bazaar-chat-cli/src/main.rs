//! Main entry point for the Bazaar Chat CLI.

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use dotenv::dotenv;
use std::path::PathBuf;

mod commands;

use commands::runtime::SessionArgs;

/// Bazaar Chat CLI
#[derive(Parser)]
#[command(name = "Bazaar Chat CLI")]
#[command(about = "Command-line client for Bazaar support chat", long_about = None)]
struct Cli {
    /// Path to the configuration file (optional)
    #[arg(
        long,
        short,
        global = true,
        help = "Path to the configuration file (e.g., config.yaml or config.json). If not provided, defaults will be used."
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for the Bazaar Chat CLI
#[derive(Subcommand)]
enum Commands {
    /// Chat with support as a customer
    Widget(SessionArgs),

    /// Answer customers from the operator panel
    Panel(SessionArgs),

    /// Generate shell completion scripts for the CLI
    Completion {
        /// The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)
        #[arg(long, short, value_enum)]
        shell: Shell,
    },

    /// Print or write the default configuration
    Config {
        /// Format of the configuration (yaml or json). Defaults to yaml.
        #[arg(long, short)]
        format: Option<String>,

        /// Write the configuration to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Widget(args) => commands::widget::run(cli.config, args).await?,
        Commands::Panel(args) => commands::panel::run(cli.config, args).await?,
        Commands::Completion { shell } => commands::completion::generate_completion(shell),
        Commands::Config { format, output } => {
            let format = format.unwrap_or_else(|| "yaml".to_string());
            commands::config::generate_config(&format, output.as_deref())?;
        }
    }

    Ok(())
}
