//! Link relay service binary.
//!
//! Standalone HTTP service for Monday relation-change webhooks.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use link_relay::{server, BoardApi, Config, MondayClient, Processor};

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("link_relay=info".parse()?);
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    info!("Starting link relay...");

    let config = Config::from_env().context("Failed to load configuration")?;

    info!(
        subitem_board = %config.boards.subitem_board,
        feature_board = %config.boards.feature_board,
        main_board = %config.boards.main_board,
        dry_run = config.dry_run,
        "Boards configured"
    );

    let api: Option<Arc<dyn BoardApi>> = if let Some(token) = &config.api_token {
        match MondayClient::new(token, &config.api_url, config.retry) {
            Ok(client) => {
                info!(api_url = %config.api_url, "Monday API client configured");
                Some(Arc::new(client))
            }
            Err(e) => {
                error!(error = %e, "Failed to create Monday client");
                None
            }
        }
    } else {
        info!("No MONDAY_API_TOKEN configured - API calls will be disabled");
        None
    };

    if config.signing_secret.is_none() {
        warn!("No MONDAY_SIGNING_SECRET configured - webhook signatures will not be verified");
    }

    let state = server::AppState {
        processor: Arc::new(Processor::new(api, config.boards.clone(), config.dry_run)),
        signing_secret: config.signing_secret.clone(),
    };

    let app = server::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(port = config.port, "Link relay listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
