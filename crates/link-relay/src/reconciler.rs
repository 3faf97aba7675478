//! Link reconciliation.
//!
//! For each main item linked from a subitem, make sure the main item's
//! feature relation contains the subitem's parent. Each main item is handled
//! independently: a failure on one is logged and counted, and the loop moves
//! on. The event as a whole still succeeds, so one bad id never masks the
//! links that did go through.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::client::BoardApi;
use crate::config::BoardConfig;
use crate::error::ApiError;
use crate::models::{ItemId, RelationSet};

/// Outcome for a single main item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ItemResult {
    /// The parent was added. With `dry_run` the write was only logged.
    Updated {
        main_item_id: ItemId,
        linked: Vec<ItemId>,
        dry_run: bool,
    },
    /// The parent was already linked
    Skipped { main_item_id: ItemId },
    /// Read or write failed after retries
    Failed { main_item_id: ItemId, error: String },
}

/// Counts and per-item results for one event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub items: Vec<ItemResult>,
}

impl ReconcileReport {
    fn record(&mut self, result: ItemResult) {
        match result {
            ItemResult::Updated { .. } => self.updated += 1,
            ItemResult::Skipped { .. } => self.skipped += 1,
            ItemResult::Failed { .. } => self.failed += 1,
        }
        self.items.push(result);
    }
}

/// Link `parent_id` into the feature relation of every main item in `targets`.
///
/// The caller must already have checked that the parent lives on the feature
/// board; that precondition is established once per event, not per item.
pub async fn reconcile(
    api: &dyn BoardApi,
    boards: &BoardConfig,
    parent_id: ItemId,
    targets: &[ItemId],
    dry_run: bool,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for &main_item_id in targets {
        let result = match reconcile_item(api, boards, parent_id, main_item_id, dry_run).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    main_item_id = %main_item_id,
                    parent_id = %parent_id,
                    error = %e,
                    "Failed to link parent to main item"
                );
                ItemResult::Failed {
                    main_item_id,
                    error: e.to_string(),
                }
            }
        };
        report.record(result);
    }

    info!(
        parent_id = %parent_id,
        updated = report.updated,
        skipped = report.skipped,
        failed = report.failed,
        "Reconciliation finished"
    );
    report
}

async fn reconcile_item(
    api: &dyn BoardApi,
    boards: &BoardConfig,
    parent_id: ItemId,
    main_item_id: ItemId,
    dry_run: bool,
) -> Result<ItemResult, ApiError> {
    let existing = api
        .fetch_relations(main_item_id, &boards.main_feature_column)
        .await?;

    if existing.contains(parent_id) {
        info!(main_item_id = %main_item_id, parent_id = %parent_id, "Parent already linked, skipping");
        return Ok(ItemResult::Skipped { main_item_id });
    }

    let merged: RelationSet = existing.with(parent_id);
    let linked = merged.iter().collect();

    if dry_run {
        warn!(
            main_item_id = %main_item_id,
            parent_id = %parent_id,
            payload = %merged.to_write_value(),
            "Dry run: skipping relation write"
        );
    } else {
        api.write_relations(
            boards.main_board,
            main_item_id,
            &boards.main_feature_column,
            &merged,
        )
        .await?;
        info!(
            main_item_id = %main_item_id,
            parent_id = %parent_id,
            linked_count = merged.len(),
            "Linked parent to main item"
        );
    }

    Ok(ItemResult::Updated {
        main_item_id,
        linked,
        dry_run,
    })
}
