//! relay-webhooks - CLI for managing the Monday webhook subscriptions the relay listens to.
//!
//! # Environment Variables
//!
//! - `MONDAY_API_TOKEN` - API token (required)
//! - `MONDAY_API_URL` - GraphQL endpoint (optional)
//! - `SUBITEM_BOARD_ID` - Default board for all subcommands
//! - `WEBHOOK_URL` - Public URL of the relay's webhook endpoint
//!
//! # Examples
//!
//! ```bash
//! # Subscribe the relay to changes of the subitem relation column
//! relay-webhooks register --column connect_boards
//!
//! # Show existing subscriptions
//! relay-webhooks list
//!
//! # Remove every subscription on the board
//! relay-webhooks delete --all
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use link_relay::client::column_webhook_config;
use link_relay::config::{DEFAULT_API_URL, DEFAULT_WEBHOOK_EVENT};
use link_relay::{BoardId, MondayClient, RetryPolicy};

/// CLI for managing relay webhook subscriptions.
#[derive(Parser)]
#[command(name = "relay-webhooks")]
#[command(about = "Register, list and delete Monday webhooks for the link relay")]
#[command(version)]
struct Cli {
    /// Monday API token (or set `MONDAY_API_TOKEN` env var)
    #[arg(long, env = "MONDAY_API_TOKEN", hide_env_values = true)]
    token: String,

    /// GraphQL endpoint
    #[arg(long, env = "MONDAY_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Board the webhooks live on
    #[arg(long, env = "SUBITEM_BOARD_ID")]
    board: BoardId,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a webhook pointing at the relay
    Register {
        /// Public URL of the relay's `/webhooks/monday` endpoint
        #[arg(long, env = "WEBHOOK_URL")]
        url: String,

        /// Webhook event type
        #[arg(long, env = "WEBHOOK_EVENT", default_value = DEFAULT_WEBHOOK_EVENT)]
        event: String,

        /// Restrict `change_specific_column_value` to this column
        #[arg(long, env = "SUBITEM_MAIN_COLUMN_ID")]
        column: Option<String>,
    },

    /// List webhooks on the board
    List,

    /// Delete webhooks by id
    Delete {
        /// Webhook ids to delete
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        ids: Vec<String>,

        /// Delete every webhook on the board
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let client = MondayClient::new(&cli.token, &cli.api_url, RetryPolicy::default())
        .context("Failed to create Monday client")?;

    match cli.command {
        Commands::Register { url, event, column } => {
            let config = match column.as_deref() {
                Some(column) if event == DEFAULT_WEBHOOK_EVENT => {
                    Some(column_webhook_config(column))
                }
                Some(_) => anyhow::bail!("--column only applies to {DEFAULT_WEBHOOK_EVENT}"),
                None => None,
            };

            let webhook = client
                .create_webhook(cli.board, &url, &event, config)
                .await
                .context("Failed to create webhook")?;
            println!(
                "Registered webhook {} on board {} ({})",
                webhook.id, webhook.board_id, webhook.event
            );
        }

        Commands::List => {
            let webhooks = client
                .list_webhooks(cli.board)
                .await
                .context("Failed to list webhooks")?;
            if webhooks.is_empty() {
                println!("No webhooks on board {}", cli.board);
            }
            for webhook in webhooks {
                println!(
                    "{}\t{}\t{}",
                    webhook.id,
                    webhook.event,
                    webhook.config.as_deref().unwrap_or("-")
                );
            }
        }

        Commands::Delete { ids, all } => {
            let ids = if all {
                client
                    .list_webhooks(cli.board)
                    .await
                    .context("Failed to list webhooks")?
                    .into_iter()
                    .map(|webhook| webhook.id)
                    .collect()
            } else {
                ids
            };

            let mut failed = 0;
            for id in &ids {
                match client.delete_webhook(id).await {
                    Ok(()) => println!("Deleted webhook {id}"),
                    Err(e) => {
                        failed += 1;
                        eprintln!("Failed to delete webhook {id}: {e}");
                    }
                }
            }

            if failed > 0 {
                anyhow::bail!("{failed} of {} webhook deletions failed", ids.len());
            }
        }
    }

    Ok(())
}
