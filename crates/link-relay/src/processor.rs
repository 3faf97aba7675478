//! Per-event processing.
//!
//! One delivery runs to completion here: challenge echo, normalization,
//! subitem lookup, parent resolution, the parent-board precondition and
//! finally reconciliation. Every failure is turned into an [`EventOutcome`]
//! carrying a correlation id; nothing propagates to the transport layer.

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::client::BoardApi;
use crate::config::BoardConfig;
use crate::error::ProcessError;
use crate::models::{ItemId, ParentRef, RelationSet};
use crate::normalizer::{normalize, Rejection};
use crate::reconciler::{reconcile, ReconcileReport};
use crate::webhooks::WebhookPayload;

/// Structured result of one delivery.
#[derive(Debug)]
pub enum EventOutcome {
    /// Registration handshake, echoed verbatim
    Challenge(Value),
    /// Out of scope; no remote writes happened
    Skipped {
        correlation_id: Uuid,
        rejection: Rejection,
    },
    /// Parent resolved and reconciliation ran. Individual items may still
    /// have failed; see the report.
    Success {
        correlation_id: Uuid,
        subitem_id: ItemId,
        parent: ParentRef,
        report: ReconcileReport,
    },
    /// Event-level failure; no remote writes happened
    Failure {
        correlation_id: Uuid,
        error: ProcessError,
    },
}

#[derive(Serialize)]
struct Counts {
    updated: usize,
    skipped: usize,
    failed: usize,
}

impl EventOutcome {
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    #[must_use]
    pub const fn correlation_id(&self) -> Option<Uuid> {
        match self {
            Self::Challenge(_) => None,
            Self::Skipped { correlation_id, .. }
            | Self::Success { correlation_id, .. }
            | Self::Failure { correlation_id, .. } => Some(*correlation_id),
        }
    }

    /// Human-readable summary.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Challenge(_) => "challenge accepted".to_string(),
            Self::Skipped { rejection, .. } => format!("skipped: {}", rejection.reason()),
            Self::Success { report, parent, .. } => format!(
                "linked parent {} to {} main item(s), {} already linked, {} failed",
                parent.item_id, report.updated, report.skipped, report.failed
            ),
            Self::Failure { error, .. } => error.to_string(),
        }
    }

    /// JSON body returned to the webhook caller.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let message = self.message();
        match self {
            Self::Challenge(challenge) => json!({ "challenge": challenge }),
            Self::Skipped {
                correlation_id,
                rejection,
            } => json!({
                "status": "skipped",
                "correlation_id": correlation_id,
                "message": message,
                "detail": rejection,
            }),
            Self::Success {
                correlation_id,
                subitem_id,
                parent,
                report,
            } => json!({
                "status": "success",
                "correlation_id": correlation_id,
                "message": message,
                "subitem_id": subitem_id,
                "parent_id": parent.item_id,
                "counts": Counts {
                    updated: report.updated,
                    skipped: report.skipped,
                    failed: report.failed,
                },
                "items": report.items,
            }),
            Self::Failure { correlation_id, .. } => json!({
                "status": "error",
                "correlation_id": correlation_id,
                "message": message,
            }),
        }
    }
}

/// Pick the parent: the remote lookup wins, then whatever the event named.
#[must_use]
pub fn resolve_parent(
    lookup: Option<ParentRef>,
    provisional: Option<ParentRef>,
) -> Option<ParentRef> {
    match (lookup, provisional) {
        (Some(found), Some(named)) if found != named => {
            debug!(
                lookup_parent = %found.item_id,
                event_parent = %named.item_id,
                "Event parent disagrees with lookup, using lookup"
            );
            Some(found)
        }
        (Some(found), _) => Some(found),
        (None, named) => named,
    }
}

/// Everything needed to process events, built once at startup.
#[derive(Clone)]
pub struct Processor {
    api: Option<Arc<dyn BoardApi>>,
    boards: BoardConfig,
    dry_run: bool,
}

impl Processor {
    #[must_use]
    pub fn new(api: Option<Arc<dyn BoardApi>>, boards: BoardConfig, dry_run: bool) -> Self {
        if dry_run {
            warn!("Dry run enabled: relation writes will be logged, not sent");
        }
        Self {
            api,
            boards,
            dry_run,
        }
    }

    /// Whether remote calls are possible.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.api.is_some()
    }

    /// Process one webhook delivery.
    pub async fn process_event(&self, payload: &WebhookPayload) -> EventOutcome {
        if let Some(challenge) = &payload.challenge {
            info!("Answering webhook challenge");
            return EventOutcome::Challenge(challenge.clone());
        }

        let correlation_id = Uuid::new_v4();
        let trigger = payload
            .event
            .as_ref()
            .and_then(|e| e.trigger_uuid.clone())
            .unwrap_or_default();
        let span = info_span!("event", correlation_id = %correlation_id, trigger_uuid = %trigger);

        async {
            let Some(event) = &payload.event else {
                warn!("Payload has neither challenge nor event");
                return EventOutcome::Failure {
                    correlation_id,
                    error: ProcessError::MalformedEvent("missing event".to_string()),
                };
            };

            let normalized = match normalize(event, &self.boards) {
                Ok(normalized) => normalized,
                Err(rejection) => {
                    debug!(reason = rejection.reason(), "Event out of scope");
                    return EventOutcome::Skipped {
                        correlation_id,
                        rejection,
                    };
                }
            };

            info!(
                shape = normalized.event.shape(),
                subitem_id = %normalized.subitem_id,
                targets = normalized.linked_main_item_ids.len(),
                "Processing relation change"
            );

            self.link_subitem(
                correlation_id,
                normalized.subitem_id,
                normalized.provisional_parent,
                Some(normalized.linked_main_item_ids),
            )
            .await
        }
        .instrument(span)
        .await
    }

    /// Re-run propagation for a subitem using its current relation value.
    pub async fn resync_subitem(&self, subitem_id: ItemId) -> EventOutcome {
        let correlation_id = Uuid::new_v4();
        let span = info_span!("resync", correlation_id = %correlation_id, subitem_id = %subitem_id);

        self.link_subitem(correlation_id, subitem_id, None, None)
            .instrument(span)
            .await
    }

    /// Shared tail of event processing and resync.
    ///
    /// `targets` of `None` means "use the subitem's own relation value".
    async fn link_subitem(
        &self,
        correlation_id: Uuid,
        subitem_id: ItemId,
        provisional: Option<ParentRef>,
        targets: Option<Vec<ItemId>>,
    ) -> EventOutcome {
        let failure = |error: ProcessError| {
            error!(error = %error, "Event failed");
            EventOutcome::Failure {
                correlation_id,
                error,
            }
        };

        let Some(api) = &self.api else {
            return failure(ProcessError::ClientNotConfigured);
        };

        let subitem = match api
            .fetch_subitem(subitem_id, &self.boards.subitem_main_column)
            .await
        {
            Ok(subitem) => subitem,
            Err(source) => {
                return failure(ProcessError::SubitemLookup { subitem_id, source });
            }
        };

        let targets = targets.unwrap_or_else(|| {
            RelationSet::from_column_value(subitem.relation_value.as_deref()).into_vec()
        });
        if targets.is_empty() {
            return EventOutcome::Skipped {
                correlation_id,
                rejection: Rejection::NothingToDo,
            };
        }

        let Some(parent) = resolve_parent(subitem.parent, provisional) else {
            return failure(ProcessError::MissingParent { subitem_id });
        };

        if parent.board_id != self.boards.feature_board {
            return failure(ProcessError::UnexpectedParentBoard {
                parent_id: parent.item_id,
                actual: parent.board_id,
                expected: self.boards.feature_board,
            });
        }

        info!(
            subitem = %subitem.name,
            parent_id = %parent.item_id,
            "Resolved parent item"
        );

        let report = reconcile(
            api.as_ref(),
            &self.boards,
            parent.item_id,
            &targets,
            self.dry_run,
        )
        .await;

        EventOutcome::Success {
            correlation_id,
            subitem_id,
            parent,
            report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::models::BoardId;
    use crate::reconciler::tests::{boards, FakeApi};
    use crate::webhooks::RawEvent;
    use std::collections::HashSet;

    const LINKS_900: &str = r#"{"linkedPulseIds":[{"linkedPulseId":900}]}"#;

    fn parent(id: u64, board: u64) -> ParentRef {
        ParentRef {
            item_id: ItemId(id),
            board_id: BoardId(board),
        }
    }

    fn processor(api: FakeApi) -> (Processor, Arc<FakeApi>) {
        let api = Arc::new(api);
        let shared: Arc<dyn BoardApi> = api.clone();
        (Processor::new(Some(shared), boards(), false), api)
    }

    fn event(board: u64, pulse: u64, column: &str, linked: &[u64]) -> WebhookPayload {
        let ids: Vec<Value> = linked.iter().map(|id| json!({ "linkedPulseId": id })).collect();
        WebhookPayload {
            challenge: None,
            event: Some(RawEvent {
                board_id: Some(BoardId(board)),
                pulse_id: Some(ItemId(pulse)),
                column_id: Some(column.to_string()),
                value: Some(json!({ "linkedPulseIds": ids })),
                ..RawEvent::default()
            }),
        }
    }

    #[tokio::test]
    async fn test_challenge_is_echoed() {
        let (processor, api) = processor(FakeApi::default());
        let payload: WebhookPayload = serde_json::from_str(r#"{"challenge":"tok-123"}"#).unwrap();

        let outcome = processor.process_event(&payload).await;
        assert_eq!(outcome.to_json(), json!({ "challenge": "tok-123" }));
        assert_eq!(api.read_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_scope_makes_no_calls() {
        let (processor, api) = processor(FakeApi::default());

        for payload in [
            event(999, 7, "connect_main", &[900]),
            event(100, 7, "status", &[900]),
            event(100, 7, "connect_main", &[]),
        ] {
            let outcome = processor.process_event(&payload).await;
            assert!(matches!(outcome, EventOutcome::Skipped { .. }), "{outcome:?}");
        }
        assert_eq!(api.read_count(), 0);
        assert_eq!(api.write_count(), 0);
    }

    #[tokio::test]
    async fn test_direct_event_links_parent() {
        let api = FakeApi::default()
            .with_subitem(7, Some(parent(50, 200)), LINKS_900)
            .with_relation(900, &[1]);
        let (processor, api) = processor(api);

        let outcome = processor
            .process_event(&event(100, 7, "connect_main", &[900]))
            .await;

        let EventOutcome::Success { parent: p, report, .. } = outcome else {
            panic!("expected success");
        };
        assert_eq!(p.item_id, ItemId(50));
        assert_eq!(report.updated, 1);
        assert_eq!(
            api.relations.lock().unwrap()[&ItemId(900)],
            [ItemId(1), ItemId(50)].into_iter().collect::<RelationSet>()
        );
    }

    #[tokio::test]
    async fn test_lookup_parent_wins_over_event_fields() {
        let api = FakeApi::default().with_subitem(7, Some(parent(50, 200)), LINKS_900);
        let (processor, api) = processor(api);

        let mut payload = event(200, 60, "connect_main", &[900]);
        if let Some(event) = payload.event.as_mut() {
            event.subitem_id = Some(ItemId(7));
            event.parent_item_id = Some(ItemId(61));
            event.parent_item_board_id = Some(BoardId(200));
        }

        let outcome = processor.process_event(&payload).await;
        assert!(matches!(outcome, EventOutcome::Success { parent: p, .. } if p.item_id == ItemId(50)));
        assert!(api.relations.lock().unwrap()[&ItemId(900)].contains(ItemId(50)));
    }

    #[tokio::test]
    async fn test_event_parent_used_when_lookup_has_none() {
        let api = FakeApi::default().with_subitem(7, None, LINKS_900);
        let (processor, _api) = processor(api);

        let mut payload = event(200, 60, "connect_main", &[900]);
        if let Some(event) = payload.event.as_mut() {
            event.subitem_id = Some(ItemId(7));
        }

        let outcome = processor.process_event(&payload).await;
        assert!(matches!(outcome, EventOutcome::Success { parent: p, .. } if p.item_id == ItemId(60)));
    }

    #[tokio::test]
    async fn test_missing_parent_fails_without_writes() {
        let api = FakeApi::default().with_subitem(7, None, LINKS_900);
        let (processor, api) = processor(api);

        let outcome = processor
            .process_event(&event(100, 7, "connect_main", &[900]))
            .await;
        assert!(matches!(
            outcome,
            EventOutcome::Failure {
                error: ProcessError::MissingParent { .. },
                ..
            }
        ));
        assert!(outcome.message().contains("missing parent info"));
        assert_eq!(api.write_count(), 0);
    }

    #[tokio::test]
    async fn test_parent_from_wrong_board_fails() {
        let api = FakeApi::default().with_subitem(7, Some(parent(50, 555)), LINKS_900);
        let (processor, api) = processor(api);

        let outcome = processor
            .process_event(&event(100, 7, "connect_main", &[900]))
            .await;
        assert!(outcome.is_failure());
        assert!(outcome.message().contains("not from expected board"));
        assert_eq!(api.read_count(), 1);
        assert_eq!(api.write_count(), 0);
    }

    #[tokio::test]
    async fn test_subitem_lookup_failure_is_event_failure() {
        let (processor, _api) = processor(FakeApi::default());
        let outcome = processor
            .process_event(&event(100, 7, "connect_main", &[900]))
            .await;
        assert!(matches!(
            outcome,
            EventOutcome::Failure {
                error: ProcessError::SubitemLookup {
                    source: ApiError::NotFound(_),
                    ..
                },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_partial_failure_still_succeeds() {
        let api = FakeApi {
            failing_reads: HashSet::from([ItemId(901)]),
            ..FakeApi::default()
        }
        .with_subitem(7, Some(parent(50, 200)), LINKS_900);
        let (processor, api) = processor(api);

        let outcome = processor
            .process_event(&event(100, 7, "connect_main", &[901, 900]))
            .await;

        let body = outcome.to_json();
        assert_eq!(body["status"], "success");
        assert_eq!(body["counts"], json!({ "updated": 1, "skipped": 0, "failed": 1 }));
        assert_eq!(api.write_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_event_is_malformed() {
        let (processor, _api) = processor(FakeApi::default());
        let outcome = processor.process_event(&WebhookPayload::default()).await;
        assert!(matches!(
            outcome,
            EventOutcome::Failure {
                error: ProcessError::MalformedEvent(_),
                ..
            }
        ));
        assert!(outcome.correlation_id().is_some());
    }

    #[tokio::test]
    async fn test_unconfigured_client() {
        let processor = Processor::new(None, boards(), false);
        assert!(!processor.is_ready());
        let outcome = processor
            .process_event(&event(100, 7, "connect_main", &[900]))
            .await;
        assert!(matches!(
            outcome,
            EventOutcome::Failure {
                error: ProcessError::ClientNotConfigured,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_resync_uses_subitem_relation_value() {
        let api = FakeApi::default().with_subitem(
            7,
            Some(parent(50, 200)),
            r#"{"linkedPulseIds":[{"linkedPulseId":900},{"linkedPulseId":901}]}"#,
        );
        let (processor, api) = processor(api);

        let outcome = processor.resync_subitem(ItemId(7)).await;
        assert!(matches!(outcome, EventOutcome::Success { ref report, .. } if report.updated == 2));
        assert_eq!(api.write_count(), 2);
    }

    #[tokio::test]
    async fn test_resync_without_links_is_skipped() {
        let api = FakeApi::default().with_subitem(7, Some(parent(50, 200)), "null");
        let (processor, api) = processor(api);

        let outcome = processor.resync_subitem(ItemId(7)).await;
        assert!(matches!(
            outcome,
            EventOutcome::Skipped {
                rejection: Rejection::NothingToDo,
                ..
            }
        ));
        assert_eq!(api.write_count(), 0);
    }

    #[test]
    fn test_resolve_parent_priority() {
        let a = parent(1, 200);
        let b = parent(2, 200);
        assert_eq!(resolve_parent(Some(a), Some(b)), Some(a));
        assert_eq!(resolve_parent(None, Some(b)), Some(b));
        assert_eq!(resolve_parent(Some(a), None), Some(a));
        assert_eq!(resolve_parent(None, None), None);
    }
}
