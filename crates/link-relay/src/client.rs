//! GraphQL client for the Monday API.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::error::ApiError;
use crate::models::{BoardId, ItemId, ParentRef, RelationSet, Subitem, Webhook};
use crate::retry::{with_retry, RetryPolicy};

/// API version pinned for every request
const API_VERSION: &str = "2024-10";

/// Remote operations the reconciler and processor depend on.
///
/// Column ids are passed in by the caller; implementations carry no
/// knowledge of which boards or columns matter.
#[async_trait]
pub trait BoardApi: Send + Sync {
    /// Fetch an item with its parent and the raw value of one relation column.
    async fn fetch_subitem(&self, item_id: ItemId, column_id: &str) -> Result<Subitem, ApiError>;

    /// Fetch the linked ids of one relation column.
    async fn fetch_relations(&self, item_id: ItemId, column_id: &str)
        -> Result<RelationSet, ApiError>;

    /// Replace a relation column's linked ids with exactly `ids`.
    async fn write_relations(
        &self,
        board_id: BoardId,
        item_id: ItemId,
        column_id: &str,
        ids: &RelationSet,
    ) -> Result<(), ApiError>;
}

/// Monday GraphQL client
#[derive(Debug, Clone)]
pub struct MondayClient {
    client: reqwest::Client,
    api_url: String,
    retry: RetryPolicy,
}

/// GraphQL request body
#[derive(Debug, Serialize)]
struct GraphQLRequest<'a, V: Serialize> {
    query: &'static str,
    variables: &'a V,
}

/// GraphQL response wrapper
#[derive(Debug, Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQLError>>,
    /// Monday reports some failures (complexity, auth) here with a 200 status
    error_message: Option<String>,
}

/// GraphQL error
#[derive(Debug, Deserialize)]
struct GraphQLError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ColumnValue {
    id: String,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: ItemId,
}

#[derive(Debug, Deserialize)]
struct ParentItem {
    id: ItemId,
    board: Option<BoardRef>,
}

#[derive(Debug, Deserialize)]
struct BoardRef {
    id: BoardId,
}

impl MondayClient {
    /// Create a new Monday client.
    ///
    /// # Arguments
    /// * `api_token` - Personal or app API token, sent bare in `Authorization`
    /// * `api_url` - GraphQL endpoint
    /// * `retry` - Retry policy applied to every call
    pub fn new(api_token: &str, api_url: &str, retry: RetryPolicy) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(api_token)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("API-Version", HeaderValue::from_static(API_VERSION));

        let client = reqwest::Client::builder().default_headers(headers).build()?;

        Ok(Self {
            client,
            api_url: api_url.to_string(),
            retry,
        })
    }

    /// Execute a GraphQL query/mutation under the retry policy.
    ///
    /// `extract` pulls the expected payload out of `data`. It runs inside the
    /// retried attempt, so a response missing that payload is retried too.
    async fn execute<V, R, T, F>(
        &self,
        operation: &str,
        query: &'static str,
        variables: &V,
        extract: F,
    ) -> Result<T, ApiError>
    where
        V: Serialize + Sync,
        R: DeserializeOwned + Send,
        F: Fn(R) -> Result<T, ApiError> + Send + Sync,
    {
        let extract = &extract;
        with_retry(&self.retry, operation, move |_| async move {
            let data = self.execute_once::<V, R>(query, variables).await?;
            extract(data)
        })
        .await
    }

    /// Single attempt; every failure mode maps to an [`ApiError`]
    async fn execute_once<V, R>(&self, query: &'static str, variables: &V) -> Result<R, ApiError>
    where
        V: Serialize + Sync,
        R: DeserializeOwned,
    {
        let request = GraphQLRequest { query, variables };

        let response = self.client.post(&self.api_url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }

        let gql_response: GraphQLResponse<R> = response.json().await?;

        if let Some(errors) = gql_response.errors.filter(|e| !e.is_empty()) {
            let error_messages: Vec<_> = errors.iter().map(|e| e.message.as_str()).collect();
            return Err(ApiError::GraphQl(error_messages.join(", ")));
        }
        if let Some(message) = gql_response.error_message {
            return Err(ApiError::GraphQl(message));
        }

        gql_response.data.ok_or(ApiError::MissingData)
    }

    // =========================================================================
    // Webhook Operations
    // =========================================================================

    /// Subscribe `url` to `event` on a board.
    #[instrument(skip(self, config), fields(board_id = %board_id, event = %event))]
    pub async fn create_webhook(
        &self,
        board_id: BoardId,
        url: &str,
        event: &str,
        config: Option<Value>,
    ) -> Result<Webhook, ApiError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Variables<'a> {
            board_id: String,
            url: &'a str,
            event: &'a str,
            config: Option<String>,
        }

        #[derive(Deserialize)]
        struct Response {
            create_webhook: Option<CreatedWebhook>,
        }

        #[derive(Deserialize)]
        struct CreatedWebhook {
            id: String,
            board_id: BoardId,
        }

        const MUTATION: &str = r"
            mutation CreateWebhook($boardId: ID!, $url: String!, $event: WebhookEventType!, $config: JSON) {
                create_webhook(board_id: $boardId, url: $url, event: $event, config: $config) {
                    id
                    board_id
                }
            }
        ";

        let variables = Variables {
            board_id: board_id.to_string(),
            url,
            event,
            config: config.as_ref().map(Value::to_string),
        };
        let created = self
            .execute("create_webhook", MUTATION, &variables, |response: Response| {
                response.create_webhook.ok_or(ApiError::MissingData)
            })
            .await?;

        debug!(webhook_id = %created.id, "Created webhook");
        Ok(Webhook {
            id: created.id,
            board_id: created.board_id,
            event: event.to_string(),
            config: variables.config,
        })
    }

    /// List webhook subscriptions on a board.
    #[instrument(skip(self), fields(board_id = %board_id))]
    pub async fn list_webhooks(&self, board_id: BoardId) -> Result<Vec<Webhook>, ApiError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Variables {
            board_id: String,
        }

        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            webhooks: Vec<Webhook>,
        }

        const QUERY: &str = r"
            query ListWebhooks($boardId: ID!) {
                webhooks(board_id: $boardId) {
                    id
                    event
                    board_id
                    config
                }
            }
        ";

        let variables = Variables {
            board_id: board_id.to_string(),
        };
        self.execute("list_webhooks", QUERY, &variables, |response: Response| {
            Ok(response.webhooks)
        })
        .await
    }

    /// Delete a webhook subscription by id.
    #[instrument(skip(self))]
    pub async fn delete_webhook(&self, webhook_id: &str) -> Result<(), ApiError> {
        #[derive(Serialize)]
        struct Variables<'a> {
            id: &'a str,
        }

        #[derive(Deserialize)]
        struct Response {
            delete_webhook: Option<Value>,
        }

        const MUTATION: &str = r"
            mutation DeleteWebhook($id: ID!) {
                delete_webhook(id: $id) {
                    id
                    board_id
                }
            }
        ";

        self.execute(
            "delete_webhook",
            MUTATION,
            &Variables { id: webhook_id },
            |response: Response| {
                response
                    .delete_webhook
                    .filter(|v| !v.is_null())
                    .map(|_| ())
                    .ok_or(ApiError::MissingData)
            },
        )
        .await
    }
}

/// Variables shared by the single-item column queries
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemColumnVariables<'a> {
    item_id: String,
    column_id: &'a str,
}

#[derive(Deserialize)]
struct ItemsResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

impl<T> ItemsResponse<T> {
    /// The single requested item; an empty list means it was not found.
    fn first(self, item_id: ItemId) -> Result<T, ApiError> {
        self.items
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound(format!("item {item_id}")))
    }
}

fn column_value(columns: Vec<ColumnValue>, column_id: &str) -> Option<String> {
    columns
        .into_iter()
        .find(|c| c.id == column_id)
        .and_then(|c| c.value)
}

#[async_trait]
impl BoardApi for MondayClient {
    #[instrument(skip(self), fields(item_id = %item_id))]
    async fn fetch_subitem(&self, item_id: ItemId, column_id: &str) -> Result<Subitem, ApiError> {
        #[derive(Deserialize)]
        struct Item {
            id: ItemId,
            #[serde(default)]
            name: String,
            parent_item: Option<ParentItem>,
            #[serde(default)]
            column_values: Vec<ColumnValue>,
        }

        const QUERY: &str = r"
            query GetSubitem($itemId: ID!, $columnId: String!) {
                items(ids: [$itemId]) {
                    id
                    name
                    parent_item {
                        id
                        board {
                            id
                        }
                    }
                    column_values(ids: [$columnId]) {
                        id
                        value
                    }
                }
            }
        ";

        let variables = ItemColumnVariables {
            item_id: item_id.to_string(),
            column_id,
        };
        let item = self
            .execute("fetch_subitem", QUERY, &variables, |response: ItemsResponse<Item>| {
                response.first(item_id)
            })
            .await?;

        let parent = item.parent_item.and_then(|p| {
            p.board.map(|b| ParentRef {
                item_id: p.id,
                board_id: b.id,
            })
        });

        debug!(name = %item.name, parent = ?parent, "Retrieved subitem");
        Ok(Subitem {
            id: item.id,
            name: item.name,
            parent,
            relation_value: column_value(item.column_values, column_id),
        })
    }

    #[instrument(skip(self), fields(item_id = %item_id))]
    async fn fetch_relations(
        &self,
        item_id: ItemId,
        column_id: &str,
    ) -> Result<RelationSet, ApiError> {
        #[derive(Deserialize)]
        struct Item {
            #[serde(default)]
            column_values: Vec<ColumnValue>,
        }

        const QUERY: &str = r"
            query GetRelations($itemId: ID!, $columnId: String!) {
                items(ids: [$itemId]) {
                    id
                    column_values(ids: [$columnId]) {
                        id
                        value
                    }
                }
            }
        ";

        let variables = ItemColumnVariables {
            item_id: item_id.to_string(),
            column_id,
        };
        let item = self
            .execute("fetch_relations", QUERY, &variables, |response: ItemsResponse<Item>| {
                response.first(item_id)
            })
            .await?;

        let raw = column_value(item.column_values, column_id);
        Ok(RelationSet::from_column_value(raw.as_deref()))
    }

    #[instrument(skip(self, ids), fields(board_id = %board_id, item_id = %item_id, count = ids.len()))]
    async fn write_relations(
        &self,
        board_id: BoardId,
        item_id: ItemId,
        column_id: &str,
        ids: &RelationSet,
    ) -> Result<(), ApiError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Variables {
            board_id: String,
            item_id: String,
            column_values: String,
        }

        #[derive(Deserialize)]
        struct Response {
            change_multiple_column_values: Option<IdOnly>,
        }

        const MUTATION: &str = r"
            mutation WriteRelations($boardId: ID!, $itemId: ID!, $columnValues: JSON!) {
                change_multiple_column_values(board_id: $boardId, item_id: $itemId, column_values: $columnValues) {
                    id
                }
            }
        ";

        let mut column_values = serde_json::Map::new();
        column_values.insert(column_id.to_string(), ids.to_write_value());

        let variables = Variables {
            board_id: board_id.to_string(),
            item_id: item_id.to_string(),
            column_values: Value::Object(column_values).to_string(),
        };
        let updated = self
            .execute("write_relations", MUTATION, &variables, |response: Response| {
                response.change_multiple_column_values.ok_or(ApiError::MissingData)
            })
            .await?;

        debug!(updated_id = %updated.id, "Relation column written");
        Ok(())
    }
}

/// Webhook config selecting a single column, for `change_specific_column_value`.
#[must_use]
pub fn column_webhook_config(column_id: &str) -> Value {
    json!({ "columnId": column_id })
}
