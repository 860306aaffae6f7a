use crate::app::create_route;
use crate::config::{FreshtabServerConfig, StorageConfig};
use crate::storage::StorageHandle;
use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use freshtab::handler::RequestHandler;
use freshtab::settings::SettingsHandle;
use freshtab::storage::Storage;
use freshtab::store::PHOTO_KEY;
use freshtab::util::clock::SystemClock;
use freshtab::util::http::{HttpClient, HttpRequest, ReqwestClient};
use poem::listener::{BoxListener, Listener, TcpListener};
use poem::Server;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

mod app;
mod config;
mod logging;
mod storage;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server (default).
    Serve,
    /// Check whether a running server is healthy.
    HealthCheck {
        /// Base URL of the server, e.g. http://localhost:8717
        base_url: Url,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve().await,
        Commands::HealthCheck { base_url } => health_check(base_url).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = FreshtabServerConfig::load()?;
    logging::init(&config.log_filter)?;

    if let StorageConfig::Filesystem { path } = &config.storage {
        std::fs::create_dir_all(path)
            .with_context(|| format!("failed to create storage directory {path}"))?;
    }
    let storage = StorageHandle::from(&config.storage);
    if let Err(err) = storage.clean_leftover_tmp_files() {
        tracing::warn!("failed to clean up leftover temporary files: {err}");
    }
    let first_start = !storage.exists(PHOTO_KEY)?;

    let settings = SettingsHandle::new(config.photo_settings()?);
    let client = ReqwestClient::with_timeout(config.request_timeout()?)?;
    let handler = Arc::new(RequestHandler::new(
        Arc::new(storage),
        client,
        settings,
        SystemClock,
    ));
    if first_start {
        let outcome = handler.install().await;
        tracing::info!(?outcome, "initialized photo cache");
    } else {
        handler.startup().await;
    }

    let listener: BoxListener = config
        .bind_addrs
        .iter()
        .cloned()
        .map(|addr| {
            tracing::info!("Listening on http://{addr}");
            TcpListener::bind(addr).boxed()
        })
        .reduce(|a, b| a.combine(b).boxed())
        .ok_or_else(|| anyhow!("No bind addresses provided"))?;

    Server::new(listener)
        .run_with_graceful_shutdown(
            create_route(handler.clone(), config.enable_api_docs),
            async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    tracing::error!("failed to listen for shutdown signal: {err}");
                    std::future::pending::<()>().await;
                }
            },
            Some(Duration::from_secs(10)),
        )
        .await?;
    tracing::info!("shutting down");
    handler.shutdown().await;
    Ok(())
}

async fn health_check(base_url: Url) -> anyhow::Result<()> {
    let client = ReqwestClient::with_timeout(Duration::from_secs(5))?;
    let url = base_url.join("api/health")?;
    let response = client.get(HttpRequest::get(url)).await?;
    if !response.is_success() {
        return Err(anyhow!("health check failed with status {}", response.status));
    }
    println!("{}", response.text());
    Ok(())
}
