//! Command-line front end for the download engine

use anyhow::Result;
use clap::{Parser, Subcommand};
use fetcher::{DownloadEngine, EngineConfig, TaskRequest};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fetcher", about = "Multi-protocol download orchestration engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire a resource and extract it under the download directory
    Get {
        /// URL, magnet link or torrent reference
        reference: String,
        /// Display name; the destination directory derives from it
        #[arg(long)]
        name: String,
        /// Optional catalog identifier recorded in history
        #[arg(long)]
        catalog_id: Option<String>,
    },
    /// List terminal outcomes, newest first
    History,
    /// Remove one history entry by task id
    Forget { id: String },
    /// List installed content with its launchable artifact
    Installed,
    /// Remove installed content by name
    Uninstall { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let engine = DownloadEngine::new(EngineConfig::from_env())?;

    match cli.command {
        Commands::Get {
            reference,
            name,
            catalog_id,
        } => {
            let mut request = TaskRequest::new(reference, name);
            if let Some(catalog_id) = catalog_id {
                request = request.with_catalog_id(catalog_id);
            }

            let mut events = engine.subscribe();
            let id = engine.submit(request).await?;

            while let Ok(update) = events.recv().await {
                if update.id != id {
                    continue;
                }
                match &update.message {
                    Some(message) => {
                        println!("{:<22} {:>3}%  {}", update.status.to_string(), update.progress, message)
                    }
                    None => println!("{:<22} {:>3}%", update.status.to_string(), update.progress),
                }
                if update.status.is_terminal() {
                    break;
                }
            }
        }
        Commands::History => {
            for entry in engine.history().await {
                println!(
                    "{}  {:<9}  {}  {}",
                    entry.finished_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.status.to_string(),
                    entry.id,
                    entry.display_name,
                );
                if let Some(error) = &entry.error {
                    println!("    {}", error);
                }
            }
        }
        Commands::Forget { id } => {
            engine.remove_history(&id).await?;
            println!("removed {}", id);
        }
        Commands::Installed => {
            for content in engine.installed().await {
                println!("{}  ({})", content.name, content.launchable.display());
            }
        }
        Commands::Uninstall { name } => {
            engine.uninstall(&name).await?;
            println!("uninstalled {}", name);
        }
    }

    Ok(())
}
