//! Configuration for the relay service.
//!
//! Everything is read from the environment once at startup and then passed
//! around explicitly; nothing here is mutated afterwards.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::BoardId;
use crate::retry::RetryPolicy;

/// Default Monday GraphQL endpoint.
pub const DEFAULT_API_URL: &str = "https://api.monday.com/v2";

/// Default webhook event registered by the CLI.
pub const DEFAULT_WEBHOOK_EVENT: &str = "change_specific_column_value";

/// Fixed boards and relation columns the relay operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardConfig {
    /// Board holding the subitems.
    pub subitem_board: BoardId,
    /// Board holding the subitems' parents (features).
    pub feature_board: BoardId,
    /// Board holding the main items.
    pub main_board: BoardId,
    /// Relation column on the subitem board pointing at main items.
    pub subitem_main_column: String,
    /// Relation column on the main board pointing at features.
    pub main_feature_column: String,
}

/// Relay service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,
    /// Monday API token. API calls are disabled without it.
    pub api_token: Option<String>,
    /// GraphQL endpoint.
    pub api_url: String,
    /// Webhook signing secret for JWT verification.
    pub signing_secret: Option<String>,
    /// Boards and columns.
    pub boards: BoardConfig,
    /// Compute and log writes without sending them.
    pub dry_run: bool,
    /// Retry policy for remote calls.
    pub retry: RetryPolicy,
    /// Public URL of this service (used when registering webhooks).
    pub webhook_url: Option<String>,
    /// Event type registered by the CLI.
    pub webhook_event: String,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let boards = BoardConfig {
            subitem_board: required(&get, "SUBITEM_BOARD_ID")?,
            feature_board: required(&get, "FEATURE_BOARD_ID")?,
            main_board: required(&get, "MAIN_BOARD_ID")?,
            subitem_main_column: get("SUBITEM_MAIN_COLUMN_ID")
                .ok_or(ConfigError::Missing("SUBITEM_MAIN_COLUMN_ID"))?,
            main_feature_column: get("MAIN_FEATURE_COLUMN_ID")
                .ok_or(ConfigError::Missing("MAIN_FEATURE_COLUMN_ID"))?,
        };

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: optional(&get, "RELAY_MAX_ATTEMPTS")?
                .unwrap_or(defaults.max_attempts)
                .max(1),
            base_delay: optional(&get, "RELAY_BASE_DELAY_MS")?
                .map_or(defaults.base_delay, Duration::from_millis),
            max_delay: optional(&get, "RELAY_MAX_DELAY_MS")?
                .map_or(defaults.max_delay, Duration::from_millis),
        };

        Ok(Self {
            port: optional(&get, "RELAY_PORT")?.unwrap_or(8080),
            api_token: get("MONDAY_API_TOKEN"),
            api_url: get("MONDAY_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            signing_secret: get("MONDAY_SIGNING_SECRET"),
            boards,
            dry_run: get("RELAY_DRY_RUN").is_some_and(|v| parse_bool(&v)),
            retry,
            webhook_url: get("WEBHOOK_URL"),
            webhook_event: get("WEBHOOK_EVENT")
                .unwrap_or_else(|| DEFAULT_WEBHOOK_EVENT.to_string()),
        })
    }
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

fn required<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<T, ConfigError> {
    optional(get, name)?.ok_or(ConfigError::Missing(name))
}

fn optional<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    get(name)
        .map(|value| {
            value
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value })
        })
        .transpose()
}
