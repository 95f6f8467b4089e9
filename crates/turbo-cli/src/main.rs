//! turbo - command-line interface for the adaptive model router

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;
use turbo_core::TurboConfig;
use turbo_engine::TurboManager;

/// Adaptive model router and VRAM-budgeted inference cache
#[derive(Debug, Parser)]
#[command(name = "turbo")]
#[command(about = "Adaptive model router and VRAM-budgeted inference cache")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Inference backend endpoint (overrides configuration)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Profile to activate (overrides the configured default)
    #[arg(short, long)]
    profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Route a prompt and stream the reply
    Query {
        /// The prompt text
        prompt: Vec<String>,

        /// Pin a specific model instead of routing
        #[arg(short, long)]
        model: Option<String>,

        /// Collect the full reply before printing
        #[arg(long)]
        no_stream: bool,
    },

    /// Show manager status as JSON
    Status,

    /// List the model catalog
    Models,

    /// List configured profiles
    Profiles,

    /// Show cumulative usage statistics as JSON
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "turbo_cli={0},turbo_core={0},turbo_engine={0}",
            log_level
        ))
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => TurboConfig::load_from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => TurboConfig::load().context("failed to load configuration")?,
    };
    if let Some(endpoint) = &cli.endpoint {
        config.backend.endpoint = endpoint.clone();
    }
    if let Some(profile) = &cli.profile {
        config.profile(profile)?;
        config.default_profile = profile.clone();
    }
    debug!(endpoint = %config.backend.endpoint, profile = %config.default_profile, "configured");

    let manager = TurboManager::new(config)?;
    manager.initialize().await?;

    let outcome = run(&manager, cli.command).await;
    manager.shutdown().await;
    outcome
}

async fn run(manager: &TurboManager, command: Commands) -> Result<()> {
    match command {
        Commands::Query {
            prompt,
            model,
            no_stream,
        } => {
            let prompt = prompt.join(" ");
            if prompt.trim().is_empty() {
                anyhow::bail!("empty prompt");
            }

            if no_stream {
                let reply = manager.chat(&prompt, model.as_deref()).await?;
                println!("{}", reply);
                return Ok(());
            }

            let mut response = manager.query(&prompt, model.as_deref()).await?;
            eprintln!(
                "[{} on {} ({})]",
                response.model_id, response.device, response.category
            );

            let mut stdout = std::io::stdout();
            while let Some(item) = response.stream.next().await {
                let chunk = item?;
                stdout.write_all(chunk.content.as_bytes())?;
                stdout.flush()?;
            }
            println!();
        }

        Commands::Status => {
            let status = manager.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }

        Commands::Models => {
            for model in manager.models() {
                println!(
                    "{:<24} {:>5.1} GB  ctx {:>6}  cpu: {:<6}  tags: {}",
                    model.id,
                    model.footprint_gb,
                    model.context_window,
                    if model.cpu_eligible {
                        model.cpu_speed.as_str()
                    } else {
                        "no"
                    },
                    model.tags.join(", ")
                );
            }
        }

        Commands::Profiles => {
            let active = manager.active_profile();
            for name in manager.profile_names() {
                let marker = if name == active.name { "*" } else { " " };
                println!("{} {}", marker, name);
            }
        }

        Commands::Stats => {
            println!("{}", serde_json::to_string_pretty(&manager.stats())?);
        }
    }

    Ok(())
}
