//! Webhook payload parsing and signature verification.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::models::{BoardId, ItemId};

/// Validation rules for Monday webhook tokens.
///
/// Monday's tokens do not always carry `exp`, so no claim is required, but
/// an `exp` that is present must be in the future.
fn webhook_validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.validate_exp = true;
    validation.validate_aud = false;
    validation.leeway = 0;
    validation
}

/// Verify a Monday webhook `Authorization` token.
///
/// Monday signs each delivery with an HS256 JWT keyed by the app's signing
/// secret. The token may be sent bare or with a `Bearer` prefix.
///
/// # Returns
/// `true` if the token is well formed, correctly signed and unexpired
#[must_use]
pub fn verify_webhook_signature(token: &str, secret: &str) -> bool {
    let token = token.trim();
    let token = token.strip_prefix("Bearer ").unwrap_or(token);

    match decode::<Value>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &webhook_validation(),
    ) {
        Ok(_) => true,
        Err(e) => {
            debug!(error = %e, kind = ?e.kind(), "Webhook token rejected");
            false
        }
    }
}

/// Deserialize an optional field, mapping unparseable values to `None`.
///
/// Monday sometimes sends empty strings or nulls for ids that do not apply
/// to the event; those must not reject the whole payload.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// Main webhook payload structure.
///
/// Either a registration challenge or a wrapped event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Registration handshake token, echoed back verbatim
    #[serde(default)]
    pub challenge: Option<Value>,
    /// The event, for regular deliveries
    #[serde(default)]
    pub event: Option<RawEvent>,
}

/// Loosely typed event as delivered by Monday.
///
/// Which fields are populated depends on the event shape; see
/// [`crate::normalizer`] for how they are interpreted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    /// Event type (e.g. `update_column_value`)
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    /// Board the event fired on
    #[serde(default, deserialize_with = "lenient")]
    pub board_id: Option<BoardId>,
    /// Item the event fired on
    #[serde(default, deserialize_with = "lenient")]
    pub pulse_id: Option<ItemId>,
    /// Item name
    #[serde(default)]
    pub pulse_name: Option<String>,
    /// Changed column
    #[serde(default)]
    pub column_id: Option<String>,
    /// Changed column type (e.g. `board-relation`)
    #[serde(default)]
    pub column_type: Option<String>,
    /// Changed column title
    #[serde(default)]
    pub column_title: Option<String>,
    /// Current column value
    #[serde(default)]
    pub value: Option<Value>,
    /// Column value before the change
    #[serde(default)]
    pub previous_value: Option<Value>,
    /// Subitem id, on subitem change events
    #[serde(default, deserialize_with = "lenient")]
    pub subitem_id: Option<ItemId>,
    /// Parent item id, on subitem events
    #[serde(default, deserialize_with = "lenient")]
    pub parent_item_id: Option<ItemId>,
    /// Parent item board id, on subitem events
    #[serde(default, deserialize_with = "lenient")]
    pub parent_item_board_id: Option<BoardId>,
    /// Delivery identifier
    #[serde(default)]
    pub trigger_uuid: Option<String>,
}

/// Parsed webhook headers
#[derive(Debug, Clone)]
pub struct WebhookHeaders {
    /// JWT signed with the app signing secret
    pub authorization: Option<String>,
}

impl WebhookHeaders {
    /// Parse headers from a request
    #[must_use]
    pub fn from_header_map(get_header: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            authorization: get_header("authorization"),
        }
    }
}

/// Build an HS256 token. Used by tests and local tooling.
pub fn sign_token(claims: &Value, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_verify_webhook_signature_valid() {
        let token = sign_token(&json!({ "accountId": 1 }), "test-secret").unwrap();
        assert!(verify_webhook_signature(&token, "test-secret"));
        assert!(verify_webhook_signature(&format!("Bearer {token}"), "test-secret"));
    }

    #[test]
    fn test_verify_webhook_signature_wrong_secret() {
        let token = sign_token(&json!({ "accountId": 1 }), "test-secret").unwrap();
        assert!(!verify_webhook_signature(&token, "other-secret"));
    }

    #[test]
    fn test_verify_webhook_signature_malformed() {
        assert!(!verify_webhook_signature("not-a-jwt", "test-secret"));
        assert!(!verify_webhook_signature("a.b.c.d", "test-secret"));
        assert!(!verify_webhook_signature("", "test-secret"));
    }

    #[test]
    fn test_verify_webhook_signature_tampered_claims() {
        let genuine = sign_token(&json!({ "accountId": 1 }), "test-secret").unwrap();
        let other = sign_token(&json!({ "accountId": 2 }), "test-secret").unwrap();
        let genuine: Vec<&str> = genuine.split('.').collect();
        let other: Vec<&str> = other.split('.').collect();

        let forged = format!("{}.{}.{}", genuine[0], other[1], genuine[2]);
        assert!(!verify_webhook_signature(&forged, "test-secret"));
    }

    #[test]
    fn test_verify_webhook_signature_rejects_other_algorithms() {
        let token = encode(
            &Header::new(Algorithm::HS512),
            &json!({ "accountId": 1 }),
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert!(!verify_webhook_signature(&token, "test-secret"));
    }

    #[test]
    fn test_verify_webhook_signature_expired() {
        let past = chrono::Utc::now().timestamp() - 60;
        let future = chrono::Utc::now().timestamp() + 60;
        let expired = sign_token(&json!({ "exp": past }), "s").unwrap();
        let fresh = sign_token(&json!({ "exp": future }), "s").unwrap();
        assert!(!verify_webhook_signature(&expired, "s"));
        assert!(verify_webhook_signature(&fresh, "s"));
    }

    #[test]
    fn test_parse_challenge() {
        let payload: WebhookPayload =
            serde_json::from_str(r#"{"challenge":"3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P"}"#)
                .unwrap();
        assert!(payload.challenge.is_some());
        assert!(payload.event.is_none());
    }

    #[test]
    fn test_parse_subitem_event() {
        let json = r#"{
            "event": {
                "type": "update_column_value",
                "boardId": 200,
                "pulseId": 5001,
                "columnId": "connect_boards",
                "columnType": "board-relation",
                "value": {"linkedPulseIds": [{"linkedPulseId": 9001}]},
                "subitemId": "6001",
                "parentItemId": "",
                "parentItemBoardId": null,
                "triggerUuid": "abc"
            }
        }"#;

        let payload: WebhookPayload = serde_json::from_str(json).unwrap();
        let event = payload.event.unwrap();
        assert_eq!(event.board_id, Some(BoardId(200)));
        assert_eq!(event.subitem_id, Some(ItemId(6001)));
        assert_eq!(event.parent_item_id, None);
        assert_eq!(event.parent_item_board_id, None);
        assert_eq!(event.column_type.as_deref(), Some("board-relation"));
    }
}
