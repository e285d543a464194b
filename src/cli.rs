//! Command-line interface for squarely.

use clap::{Parser, Subcommand};
use squarely::{ConfigOverrides, StoreBackend};
use std::path::PathBuf;

/// Squarely - room server for a three-player perfect-square number game
#[derive(Parser, Debug)]
#[command(name = "squarely")]
#[command(about = "Room server for a three-player perfect-square number game", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Settings shared by commands that resolve a configuration.
#[derive(clap::Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Path to a TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Room store backend
    #[arg(long, value_enum)]
    pub store: Option<StoreBackend>,

    /// Path to the SQLite database file (created if it doesn't exist)
    #[arg(long)]
    pub db_path: Option<String>,
}

impl ConfigArgs {
    /// Flags that override file and environment settings.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            store: self.store,
            db_path: self.db_path.clone(),
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP room server
    Serve {
        #[command(flatten)]
        args: ConfigArgs,
    },

    /// Print the resolved configuration as TOML and exit
    PrintConfig {
        #[command(flatten)]
        args: ConfigArgs,
    },
}
