use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use yt_dlp_convert::config::{get_config_path, load_config_from, Config};
use yt_dlp_convert::models::{DownloadRequest, ItemResult, TerminalStatus};
use yt_dlp_convert::observer::TracingObserver;
use yt_dlp_convert::orchestrator::Orchestrator;
use yt_dlp_convert::{server, update};

// --- Command-Line Argument Parsing ---
#[derive(Parser, Debug)]
#[command(author, version, about = "Download media with yt-dlp and convert it to mp4.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download a URL and convert the result. Ctrl-C cancels.
    Download {
        url: String,
        /// Destination folder. Defaults to the configured download directory.
        #[arg(short, long)]
        dest: Option<PathBuf>,
        /// Fetch every item of a playlist URL.
        #[arg(long)]
        playlist: bool,
        /// Extract 320 kbps mp3 audio instead of converting video.
        #[arg(long)]
        audio_only: bool,
    },
    /// Run the HTTP front end in the foreground.
    Serve {
        #[arg(long, env = "HOST", default_value = "127.0.0.1")]
        host: String,
        #[arg(long, env = "PORT", default_value_t = 8080)]
        port: u16,
    },
    /// Check GitHub for a newer release.
    CheckUpdate,
}

// --- Main Application Logic ---
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config_path = get_config_path().await?;
    let config = load_config_from(&config_path).await?;

    match cli.command {
        Commands::Download { url, dest, playlist, audio_only } => {
            announce_update(&config).await;
            let destination = dest.unwrap_or_else(|| PathBuf::from(&config.download_directory));
            let request = DownloadRequest { url, destination, playlist, audio_only };
            run_download(&config, request).await?
        }
        Commands::Serve { host, port } => {
            announce_update(&config).await;
            server::run_server(config, config_path, &format!("{}:{}", host, port)).await?
        }
        Commands::CheckUpdate => check_update(&config).await?,
    }

    Ok(())
}

/// Runs one job in the foreground, logging progress until it ends.
async fn run_download(config: &Config, request: DownloadRequest) -> anyhow::Result<()> {
    let orchestrator = Arc::new(Orchestrator::from_config(config));
    let handle = orchestrator
        .submit(request, Arc::new(TracingObserver::default()))
        .await?;

    let token = handle.cancel_token();
    let join = handle.join();
    tokio::pin!(join);

    let report = tokio::select! {
        report = &mut join => report,
        _ = interrupted(token.as_ref()) => {
            tracing::warn!("Cancel requested, stopping at the next checkpoint...");
            if let Some(token) = &token {
                token.cancel();
            }
            join.await
        }
    };

    for outcome in &report.items {
        match &outcome.result {
            ItemResult::Converted(path) | ItemResult::Kept(path) => {
                tracing::info!("{} -> {}", outcome.item.title, path.display())
            }
            ItemResult::NotConverted => tracing::info!(
                "{} left as {}",
                outcome.item.title,
                outcome.item.source.display()
            ),
            ItemResult::Cancelled => tracing::info!("{} conversion cancelled", outcome.item.title),
            ItemResult::Failed(e) => tracing::warn!("{} failed: {}", outcome.item.title, e),
        }
    }

    match report.status {
        TerminalStatus::Done => Ok(()),
        TerminalStatus::Cancelled => {
            tracing::info!("Download cancelled.");
            Ok(())
        }
        TerminalStatus::Failed => Err(anyhow::anyhow!(
            "download failed: {}",
            report.error.unwrap_or_default()
        )),
    }
}

/// Resolves on Ctrl-C, or never when the job cannot be cancelled.
async fn interrupted(token: Option<&CancellationToken>) {
    if token.is_none() || tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// The startup check: logs the result and never fails the command.
async fn announce_update(config: &Config) {
    let Ok(repository) = update::configured_repository(config) else { return };
    let result = match update::http_client() {
        Ok(client) => update::check_for_update(&client, repository, update::CURRENT_VERSION).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(status) => tracing::info!("{}", status),
        Err(e) => tracing::warn!("Update check failed: {}", e),
    }
}

async fn check_update(config: &Config) -> anyhow::Result<()> {
    let repository = update::configured_repository(config)?;
    let client = update::http_client()?;
    let status = update::check_for_update(&client, repository, update::CURRENT_VERSION).await?;
    println!("{}", status);
    if let update::UpdateStatus::UpdateAvailable { url, .. } = &status {
        println!("{}", url);
    }
    Ok(())
}
