//! Command-line interface definitions using clap
//!
//! `ipgeo lookup` resolves addresses through the full pipeline,
//! `ipgeo databases` manages the local MMDB files.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use crate::config::{DEFAULT_CONFIG_PATH, StaticConfig};
use crate::services::geoip::{DatabaseDownloader, GeoIpEngine};
use crate::system::event::EventBus;

/// ipgeo - IP geolocation resolution engine
#[derive(Parser)]
#[command(name = "ipgeo")]
#[command(version)]
#[command(about = "Resolve IP addresses to normalized geolocation records", long_about = None)]
pub struct Cli {
    /// Configuration file path (default: ipgeo.toml)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve one or more IP addresses and print JSON records
    Lookup {
        #[arg(required = true)]
        ips: Vec<String>,

        /// Skip the startup download check
        #[arg(long)]
        offline: bool,
    },

    /// Manage local geolocation databases
    Databases {
        #[command(subcommand)]
        action: DatabaseCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum DatabaseCommands {
    /// Show status of every configured database file
    Check,

    /// Download one database by file name, or every missing one
    Download { name: Option<String> },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Generate example configuration file
    Generate {
        /// Output path (default: ipgeo.toml)
        output_path: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Execute a parsed command
pub async fn run(command: Commands, config: &StaticConfig) -> Result<()> {
    match command {
        Commands::Lookup { ips, offline } => lookup(&ips, offline, config).await,
        Commands::Databases { action } => match action {
            DatabaseCommands::Check => databases_check(config).await,
            DatabaseCommands::Download { name } => databases_download(name, config).await,
        },
        Commands::Config { action } => match action {
            ConfigCommands::Generate { output_path, force } => config_generate(output_path, force),
        },
    }
}

async fn lookup(ips: &[String], offline: bool, config: &StaticConfig) -> Result<()> {
    let engine = GeoIpEngine::from_config(config).context("Failed to build GeoIP engine")?;

    if offline {
        if let Err(e) = engine.service.initialize().await {
            eprintln!("{} {}", "Local databases unavailable:".yellow(), e.format_simple());
        }
    } else if let Err(e) = engine.start().await {
        eprintln!("{}", e.format_colored());
    }

    let mut failed = 0;
    for ip in ips {
        match engine.service.resolve(ip).await {
            Ok(record) => {
                let json = serde_json::to_string_pretty(&record)
                    .context("Failed to serialize geolocation record")?;
                println!("{}", json);
            }
            Err(e) => {
                failed += 1;
                eprintln!("{} {}: {}", ip.bold(), e.format_colored(), e.user_reason());
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} lookups failed", failed, ips.len());
    }
    Ok(())
}

async fn databases_check(config: &StaticConfig) -> Result<()> {
    let downloader = DatabaseDownloader::new(config.databases.clone(), EventBus::default().into())
        .context("Failed to prepare data directory")?;

    let statuses = downloader
        .check_databases()
        .await
        .context("Failed to check databases")?;

    println!("{} {}", "Data directory:".bold(), config.databases.data_dir.blue());
    for status in statuses {
        let state = if status.is_valid {
            "valid".green()
        } else if status.exists {
            "invalid".yellow()
        } else {
            "missing".red()
        };
        let modified = status
            .last_modified
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<24} {:<8} {:>12} / {:<12} {}",
            status.name,
            state,
            status.size,
            status.expected_size,
            modified.dimmed()
        );
    }
    Ok(())
}

async fn databases_download(name: Option<String>, config: &StaticConfig) -> Result<()> {
    let downloader = DatabaseDownloader::new(config.databases.clone(), EventBus::default().into())
        .context("Failed to prepare data directory")?;

    match name {
        Some(name) => {
            println!("{} {}", "Downloading".yellow(), name.blue());
            downloader
                .download_database(&name)
                .await
                .with_context(|| format!("Failed to download {}", name))?;
            println!("  {} {}", "Downloaded".green(), name.blue());
        }
        None => {
            println!("{}", "Downloading missing databases...".yellow());
            downloader
                .download_missing_databases()
                .await
                .context("Failed to download databases")?;
            println!("  {}", "All databases are present and valid".green());
        }
    }
    Ok(())
}

fn config_generate(output_path: Option<String>, force: bool) -> Result<()> {
    let path = output_path.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    if !force && Path::new(&path).exists() {
        anyhow::bail!("{} already exists, use --force to overwrite", path);
    }

    println!(
        "{} {}",
        "Generating configuration file...".yellow(),
        path.blue()
    );
    StaticConfig::default()
        .save_to_file(&path)
        .map_err(|e| anyhow::anyhow!("Unable to write configuration file: {}", e))?;
    println!(
        "  {} {}",
        "Configuration file generated successfully".green(),
        path.blue()
    );
    Ok(())
}
