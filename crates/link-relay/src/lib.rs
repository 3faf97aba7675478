//! Monday.com link relay.
//!
//! When a subitem is linked to a main item through the subitem->main relation
//! column, the relay makes sure the subitem's parent item is linked to that
//! same main item through the main->feature relation column.
//!
//! This crate provides:
//! - Webhook payload parsing and JWT signature verification
//! - A pure event normalizer for the two event shapes Monday delivers
//! - A GraphQL client for the Monday API with retry and backoff
//! - The link reconciler and the per-event processor
//! - HTTP server for webhook handling (standalone service)

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)] // Most remote operations can fail

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod normalizer;
pub mod processor;
pub mod reconciler;
pub mod retry;
pub mod server;
pub mod webhooks;

pub use client::{BoardApi, MondayClient};
pub use config::{BoardConfig, Config};
pub use error::{ApiError, ConfigError, ProcessError};
pub use models::{BoardId, ItemId, RelationSet};
pub use normalizer::{normalize, NormalizedEvent, Rejection};
pub use processor::{EventOutcome, Processor};
pub use reconciler::{reconcile, ReconcileReport};
pub use retry::{with_retry, RetryPolicy};
pub use webhooks::{verify_webhook_signature, WebhookPayload};
