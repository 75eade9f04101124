/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! homefleet CLI - operator tooling for a homefleet node's store and registry.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;

use config::{ConfigLoader, HomefleetConfig, CONFIG_ENV_VAR};

/// homefleet - coordination tooling for a fleet of self-hosted nodes
#[derive(Parser)]
#[command(name = "homefleet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to HOMEFLEET_CONFIG or the search paths)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database URL, overriding the configuration file
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run migrations and register this node in the cluster
    Bootstrap,

    /// Apply pending database migrations
    Migrate,

    /// Inspect and maintain the job queue
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// Inspect the node registry
    Nodes {
        #[command(subcommand)]
        command: NodeCommands,
    },

    /// Show configuration details
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum JobCommands {
    /// List recent jobs, newest first
    List {
        /// Only jobs for this app
        #[arg(long)]
        app: Option<String>,

        /// Only jobs with this status (pending, running, completed, failed)
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Request cancellation of a pending or running job
    Cancel { job_id: String },

    /// Fail running jobs that have not reported progress recently
    SweepStale {
        /// Staleness threshold (e.g., "30m", "2h"; defaults to the configured value)
        #[arg(long)]
        older_than: Option<String>,
    },

    /// Delete finished jobs beyond the newest N per app
    Cleanup {
        /// Finished jobs to keep per app (defaults to the configured value)
        #[arg(long)]
        keep: Option<usize>,

        /// Restrict cleanup to one app
        #[arg(long)]
        app: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum NodeCommands {
    /// List registered nodes, primary first
    List,

    /// Probe every peer once and record the result
    Check,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML, with the API key masked
    Show,

    /// Print the built-in default configuration as TOML
    Default,

    /// List the configuration search paths
    Paths,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loader = ConfigLoader::new();
    let mut config = loader
        .load_config(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Config { command } => match command {
            ConfigCommands::Show => print_toml(&config.redacted())?,
            ConfigCommands::Default => print_toml(&HomefleetConfig::default())?,
            ConfigCommands::Paths => {
                let env_path = std::env::var(CONFIG_ENV_VAR)
                    .unwrap_or_else(|_| "(unset)".to_string());
                println!("{}: {}", CONFIG_ENV_VAR, env_path);
                for path in loader.get_search_paths() {
                    let marker = if path.is_file() { "found" } else { "missing" };
                    println!("{:<8} {}", marker, path.display());
                }
            }
        },
        Commands::Bootstrap => {
            let dal = commands::connect(&config).await?;
            commands::bootstrap::run(&dal, &config).await?;
        }
        Commands::Migrate => {
            let dal = commands::connect(&config).await?;
            tracing::info!(backend = dal.backend().as_str(), "Migrations applied");
        }
        Commands::Jobs { command } => {
            let dal = commands::connect(&config).await?;
            commands::jobs::run(&dal, &config, command).await?;
        }
        Commands::Nodes { command } => {
            let dal = commands::connect(&config).await?;
            commands::nodes::run(&dal, &config, command).await?;
        }
    }

    Ok(())
}

fn print_toml(config: &HomefleetConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}
