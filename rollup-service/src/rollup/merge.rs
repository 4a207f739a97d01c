//! Folding board sightings into per-controller aggregates.
//!
//! Two rules apply. Within one work item, sightings of the same controller
//! collapse into one aggregate: the last sighting's board fields win and
//! every sighting counts. Across items, the new aggregate is combined with
//! the stored row: `timestamp` takes the max, `oldest` the min, `count` the
//! sum.

use crate::error::RollupError;
use crate::models::{FoundController, RolloutWorkItem, UsageReport};
use crate::rollup::codec;
use crate::rollup::identity::{canonical_board_name, resolve_identity};
use crate::rollup::stats::RESULTS_STATS_KEY;
use crate::services::{ControllerStore, StatsCache};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Aggregates computed from one work item, before looking at stored rows.
#[derive(Debug, Default)]
pub struct FoldedReport {
    pub controllers: BTreeMap<String, FoundController>,
    pub sightings: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollupOutcome {
    /// Sightings that resolved to a controller.
    pub sightings: usize,
    /// Sightings with neither UUID nor CPU id.
    pub skipped: usize,
    /// Distinct controllers written.
    pub controllers: usize,
}

/// Apply the in-item rule to every sighting of a report.
pub fn fold_report(item: &RolloutWorkItem, report: &UsageReport) -> FoldedReport {
    let mut folded = FoldedReport::default();
    let ctx = &report.context;

    for board in &report.boards_seen {
        let Some(uuid) = resolve_identity(board) else {
            tracing::info!(
                name = %board.name,
                git_hash = %board.git_hash,
                "No UUID or CPU ID found for board, skipping"
            );
            folded.skipped += 1;
            continue;
        };

        let fc = folded
            .controllers
            .entry(uuid.clone())
            .or_insert_with(|| FoundController::new(uuid, item.timestamp));

        fc.name = canonical_board_name(&board.name).to_string();
        fc.git_hash = board.git_hash.clone();
        fc.git_tag = board.git_tag.clone();
        fc.uavo_hash = board.uavo_hash.clone();
        fc.gcs_os = ctx.current_os.clone();
        fc.gcs_arch = ctx.current_arch.clone();
        fc.gcs_version = ctx.gcs_version.clone();
        fc.addr = if ctx.retains_address() {
            item.ip.clone()
        } else {
            String::new()
        };
        fc.country = item.country.clone();
        fc.region = item.region.clone();
        fc.city = item.city.clone();
        fc.lat = item.lat;
        fc.lon = item.lon;
        fc.count += 1;

        folded.sightings += 1;
    }

    folded
}

/// Combine a freshly folded aggregate with the stored row for the same
/// controller. The result carries the stored version so the write can be
/// made conditional on it.
pub fn merge_with_previous(prev: Option<&FoundController>, next: FoundController) -> FoundController {
    let Some(prev) = prev else {
        return FoundController { version: 0, ..next };
    };

    let mut merged = next;
    merged.count = prev.count.saturating_add(merged.count);
    merged.oldest = prev.oldest.min(merged.oldest);
    if prev.timestamp > merged.timestamp {
        // Late report: keep the newer sighting time, the report's own time
        // is already absorbed into `oldest` above.
        merged.timestamp = prev.timestamp;
    }
    merged.version = prev.version;
    merged
}

#[derive(Clone)]
pub struct RollupEngine {
    controllers: Arc<dyn ControllerStore>,
    cache: Arc<dyn StatsCache>,
    max_conflict_retries: u32,
}

impl RollupEngine {
    pub fn new(
        controllers: Arc<dyn ControllerStore>,
        cache: Arc<dyn StatsCache>,
        max_conflict_retries: u32,
    ) -> Self {
        Self {
            controllers,
            cache,
            max_conflict_retries,
        }
    }

    /// Decode a queue payload (gzip-compressed JSON work item) and apply it.
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<RollupOutcome, RollupError> {
        let body = codec::decompress(payload)?;
        let item: RolloutWorkItem = serde_json::from_slice(&body)
            .map_err(|e| RollupError::corrupt("error decoding json", e))?;
        self.apply(&item).await
    }

    pub async fn apply(&self, item: &RolloutWorkItem) -> Result<RollupOutcome, RollupError> {
        let start = Instant::now();
        let report = item.report().map_err(|e| {
            tracing::warn!(raw = %item.raw_data.get(), error = %e, "Couldn't parse usage report");
            RollupError::corrupt("error parsing report", e)
        })?;

        let folded = fold_report(item, &report);
        metrics::counter!("rollup_sightings_total").increment(folded.sightings as u64);
        metrics::counter!("rollup_sightings_skipped_total").increment(folded.skipped as u64);

        let outcome = RollupOutcome {
            sightings: folded.sightings,
            skipped: folded.skipped,
            controllers: folded.controllers.len(),
        };

        if folded.controllers.is_empty() {
            tracing::debug!(skipped = folded.skipped, "No identifiable boards in report");
            return Ok(outcome);
        }

        tracing::info!(controllers = outcome.controllers, "Updating controller records");
        if let Err(e) = self.persist(folded.controllers).await {
            metrics::counter!("rollup_items_total", "outcome" => "failed").increment(1);
            tracing::error!(error = %e, "Error updating controller records");
            return Err(e);
        }

        if let Err(e) = self.cache.invalidate(RESULTS_STATS_KEY).await {
            tracing::warn!(error = %e, "Failed to invalidate stats cache");
        }

        metrics::counter!("rollup_items_total", "outcome" => "ok").increment(1);
        metrics::histogram!("rollup_duration_seconds").record(start.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Read-merge-write against the stored rows. Rows that lose an
    /// optimistic write are re-read and re-merged, up to the retry limit.
    async fn persist(
        &self,
        mut pending: BTreeMap<String, FoundController>,
    ) -> Result<(), RollupError> {
        for attempt in 0..=self.max_conflict_retries {
            let uuids: Vec<String> = pending.keys().cloned().collect();
            let previous = self.controllers.get_multi(&uuids).await?;

            let rows = pending
                .values()
                .map(|next| merge_with_previous(previous.get(&next.uuid), next.clone()))
                .collect();

            let lost = self.controllers.put_multi(rows).await?;
            if lost.is_empty() {
                return Ok(());
            }

            tracing::warn!(
                attempt,
                conflicts = lost.len(),
                "Concurrent update of controller records, retrying"
            );
            pending.retain(|uuid, _| lost.contains(uuid));
        }

        let uuid = pending.keys().next().cloned().unwrap_or_default();
        Err(RollupError::WriteConflict(uuid))
    }
}
