//! Error types for the relay.

use thiserror::Error;

use crate::models::{BoardId, ItemId};

/// Errors returned by a single remote GraphQL call.
///
/// Every variant is treated as transient by the retry layer.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("Monday API returned error status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    /// The response carried a GraphQL error list
    #[error("GraphQL errors: {0}")]
    GraphQl(String),

    /// HTTP success without the expected `data` payload
    #[error("No data in GraphQL response")]
    MissingData,

    /// The payload was present but did not contain the requested entity
    #[error("{0} not found")]
    NotFound(String),

    /// The API token cannot be sent as a header
    #[error("Invalid API token: {0}")]
    InvalidToken(#[from] reqwest::header::InvalidHeaderValue),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration errors raised while reading the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required variable absent or empty
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// Variable present but not parseable
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Event-level failures. No remote write is attempted once one of these occurs.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The body was JSON but not an event the relay understands
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// Neither the remote lookup nor the event named a parent item
    #[error("missing parent info for subitem {subitem_id}")]
    MissingParent { subitem_id: ItemId },

    /// The resolved parent lives on a board other than the feature board
    #[error("parent {parent_id} not from expected board (got {actual}, expected {expected})")]
    UnexpectedParentBoard {
        parent_id: ItemId,
        actual: BoardId,
        expected: BoardId,
    },

    /// The subitem lookup exhausted its retries
    #[error("failed to fetch subitem {subitem_id}: {source}")]
    SubitemLookup {
        subitem_id: ItemId,
        #[source]
        source: ApiError,
    },

    /// No API token configured
    #[error("Monday client not configured")]
    ClientNotConfigured,
}
