use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use world_backup::backup::{BackupOrchestrator, BackupResult};
use world_backup::config::Config;
use world_backup::controller::{
    change_power_state, GameServerController, PanelClient, PowerChange, PowerSignal,
};

#[derive(Parser)]
#[command(name = "world-backup")]
#[command(about = "Back up a game server world to S3 with rotation and signed links")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backup now
    Run,

    /// List stored backups, oldest first, with fresh download links
    List,

    /// Show the server's run state and resource usage
    Status,

    /// Send a power signal, skipped when it would not change anything
    Power {
        /// start, stop or restart
        signal: PowerSignal,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    init_logging(config.debug);

    match cli.command {
        Commands::Run => {
            let orchestrator = BackupOrchestrator::from_config(&config).await?;
            match orchestrator.start_world_backup().await {
                Ok(result) => print_results(std::slice::from_ref(&result), cli.json)?,
                Err(e) => {
                    error!(error = %e, "Backup failed");
                    return Err(e.into());
                }
            }
        }
        Commands::List => {
            let orchestrator = BackupOrchestrator::from_config(&config).await?;
            let results = orchestrator.list_all_backups().await?;
            if results.is_empty() && !cli.json {
                println!("No backups stored");
            } else {
                print_results(&results, cli.json)?;
            }
        }
        Commands::Status => {
            let panel = PanelClient::new(&config.panel)?;
            let resources = panel.resources().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&resources)?);
            } else {
                let usage = &resources.attributes.resources;
                println!("state:   {}", resources.run_state());
                println!("memory:  {} bytes", usage.memory_bytes);
                println!("cpu:     {:.1}%", usage.cpu_absolute);
                println!("disk:    {} bytes", usage.disk_bytes);
            }
        }
        Commands::Power { signal } => {
            let panel = PanelClient::new(&config.panel)?;
            let controller: &dyn GameServerController = &panel;
            match change_power_state(controller, signal).await? {
                PowerChange::Accepted => println!("{} accepted", signal),
                PowerChange::Rejected => anyhow::bail!("Panel rejected {}", signal),
                PowerChange::Skipped { current } => {
                    println!("{} skipped, server is {}", signal, current)
                }
            }
        }
    }

    info!("Done");
    Ok(())
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("world_backup={}", level).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();
}

fn print_results(results: &[BackupResult], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }

    for result in results {
        println!(
            "{}  {}  {}",
            result.last_modified_at.to_rfc3339(),
            result.key,
            result.url.as_deref().unwrap_or("(no link)")
        );
        for warning in &result.warnings {
            println!("  warning: {}", warning);
        }
    }
    Ok(())
}
