//! Event normalization.
//!
//! Monday delivers relation changes in two shapes:
//!
//! - **Direct**: fired on the subitem board. `pulseId` is the subitem.
//! - **Subitem change**: fired on the feature board. `pulseId` is the parent
//!   item and the subitem travels in `subitemId`, optionally alongside
//!   `parentItemId`/`parentItemBoardId`.
//!
//! [`normalize`] classifies a [`RawEvent`] into a [`WebhookEvent`] and then
//! reduces it to one canonical [`NormalizedEvent`]. It performs no I/O so
//! out-of-scope events are rejected before any remote call.

use serde::Serialize;
use tracing::warn;

use crate::config::BoardConfig;
use crate::models::{BoardId, ItemId, LinkedPulses, ParentRef, RelationSet};
use crate::webhooks::RawEvent;

/// Why an event was not processed. None of these are errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum Rejection {
    /// The event fired on a board the relay does not watch
    UnexpectedBoard { board_id: Option<BoardId> },
    /// The changed column is not the subitem->main relation
    NonTargetColumn { column_id: Option<String> },
    /// Neither `pulseId` nor `subitemId` was present
    MissingItem,
    /// The relation holds no main items
    NothingToDo,
}

impl Rejection {
    /// Short human-readable reason.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::UnexpectedBoard { .. } => "unexpected board",
            Self::NonTargetColumn { .. } => "non-target column",
            Self::MissingItem => "missing item id",
            Self::NothingToDo => "nothing to do",
        }
    }
}

/// Event fired on the subitem board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectEvent {
    pub subitem_id: ItemId,
    pub parent_item_id: Option<ItemId>,
    pub parent_item_board_id: Option<BoardId>,
}

/// Event fired on the feature board about one of its subitems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubitemChangeEvent {
    /// Event subject, which is the parent item itself
    pub item: ParentRef,
    pub subitem_id: Option<ItemId>,
    pub parent_item_id: Option<ItemId>,
    pub parent_item_board_id: Option<BoardId>,
}

/// The two event shapes, classified by the board they fired on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    Direct(DirectEvent),
    SubitemChange(SubitemChangeEvent),
}

impl WebhookEvent {
    /// Classify a raw event. Checks board, then column, then item presence.
    pub fn classify(raw: &RawEvent, boards: &BoardConfig) -> Result<Self, Rejection> {
        let board_id = raw.board_id;
        let is_subitem_board = board_id == Some(boards.subitem_board);
        let is_feature_board = board_id == Some(boards.feature_board);
        if !is_subitem_board && !is_feature_board {
            return Err(Rejection::UnexpectedBoard { board_id });
        }

        if raw.column_id.as_deref() != Some(boards.subitem_main_column.as_str()) {
            return Err(Rejection::NonTargetColumn {
                column_id: raw.column_id.clone(),
            });
        }

        if is_subitem_board {
            let subitem_id = raw
                .subitem_id
                .or(raw.pulse_id)
                .ok_or(Rejection::MissingItem)?;
            return Ok(Self::Direct(DirectEvent {
                subitem_id,
                parent_item_id: raw.parent_item_id,
                parent_item_board_id: raw.parent_item_board_id,
            }));
        }

        let item_id = raw.pulse_id.ok_or(Rejection::MissingItem)?;
        Ok(Self::SubitemChange(SubitemChangeEvent {
            item: ParentRef {
                item_id,
                board_id: boards.feature_board,
            },
            subitem_id: raw.subitem_id,
            parent_item_id: raw.parent_item_id,
            parent_item_board_id: raw.parent_item_board_id,
        }))
    }

    /// Canonical subitem id.
    #[must_use]
    pub fn subitem_id(&self) -> ItemId {
        match self {
            Self::Direct(e) => e.subitem_id,
            Self::SubitemChange(e) => e.subitem_id.unwrap_or(e.item.item_id),
        }
    }

    /// Parent named by the event itself, before any remote lookup.
    ///
    /// Explicit parent fields win when both are present. A subitem change
    /// event falls back to its own subject, which is the parent.
    #[must_use]
    pub fn provisional_parent(&self) -> Option<ParentRef> {
        let (item_id, board_id, fallback) = match self {
            Self::Direct(e) => (e.parent_item_id, e.parent_item_board_id, None),
            Self::SubitemChange(e) => (e.parent_item_id, e.parent_item_board_id, Some(e.item)),
        };
        match (item_id, board_id) {
            (Some(item_id), Some(board_id)) => Some(ParentRef { item_id, board_id }),
            _ => fallback,
        }
    }

    #[must_use]
    pub const fn shape(&self) -> &'static str {
        match self {
            Self::Direct(_) => "direct",
            Self::SubitemChange(_) => "subitem_change",
        }
    }
}

/// Canonical form of an in-scope event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub event: WebhookEvent,
    pub subitem_id: ItemId,
    pub provisional_parent: Option<ParentRef>,
    /// Deduplicated, in delivery order
    pub linked_main_item_ids: Vec<ItemId>,
}

/// Normalize a raw event against the configured boards and column.
pub fn normalize(raw: &RawEvent, boards: &BoardConfig) -> Result<NormalizedEvent, Rejection> {
    let event = WebhookEvent::classify(raw, boards)?;

    let linked_main_item_ids = linked_ids(raw.value.as_ref());
    if linked_main_item_ids.is_empty() {
        return Err(Rejection::NothingToDo);
    }

    Ok(NormalizedEvent {
        subitem_id: event.subitem_id(),
        provisional_parent: event.provisional_parent(),
        event,
        linked_main_item_ids,
    })
}

/// Linked ids from an event's current relation value.
fn linked_ids(value: Option<&serde_json::Value>) -> Vec<ItemId> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Vec::new();
    };

    match serde_json::from_value::<LinkedPulses>(value.clone()) {
        Ok(linked) => linked.ids().collect::<RelationSet>().into_vec(),
        Err(e) => {
            warn!(error = %e, "Malformed relation value in event, treating as empty");
            Vec::new()
        }
    }
}
