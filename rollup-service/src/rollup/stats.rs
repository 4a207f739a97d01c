//! Cached summary over the controller table.

use crate::error::RollupError;
use crate::models::StatsSummary;
use crate::services::{ControllerStore, StatsCache};
use futures::TryStreamExt;

/// Cache key of the summary; the rollup drops it after every write.
pub const RESULTS_STATS_KEY: &str = "results_stats";

pub async fn compute_summary(store: &dyn ControllerStore) -> Result<StatsSummary, RollupError> {
    let mut summary = StatsSummary::default();
    let mut rows = store.list_by_recency().await?;

    while let Some(fc) = rows.try_next().await? {
        summary.controllers += 1;
        summary.sightings = summary.sightings.saturating_add(fc.count);
        *summary.boards.entry(fc.name).or_default() += 1;
    }

    Ok(summary)
}

/// Serve the summary from cache, computing and caching it on a miss. Cache
/// trouble only costs a recomputation.
pub async fn cached_summary(
    store: &dyn ControllerStore,
    cache: &dyn StatsCache,
    ttl_secs: u64,
) -> Result<StatsSummary, RollupError> {
    match cache.get(RESULTS_STATS_KEY).await {
        Ok(Some(cached)) => match serde_json::from_str(&cached) {
            Ok(summary) => return Ok(summary),
            Err(e) => tracing::warn!(error = %e, "Discarding unreadable cached stats"),
        },
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Stats cache unavailable"),
    }

    let summary = compute_summary(store).await?;

    match serde_json::to_string(&summary) {
        Ok(json) => {
            if let Err(e) = cache.set(RESULTS_STATS_KEY, &json, ttl_secs).await {
                tracing::warn!(error = %e, "Failed to cache stats");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Failed to serialize stats"),
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FoundController;
    use crate::services::{InMemoryStore, MockStatsCache};
    use chrono::Utc;

    fn controller(uuid: &str, name: &str, count: i64) -> FoundController {
        FoundController {
            name: name.to_string(),
            count,
            ..FoundController::new(uuid.to_string(), Utc::now())
        }
    }

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .put_multi(vec![
                controller("a", "CC3D", 4),
                controller("b", "CC3D", 1),
                controller("c", "Revolution", 2),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_compute_summary_counts_controllers_and_sightings() {
        let store = seeded_store().await;

        let summary = compute_summary(&store).await.unwrap();

        assert_eq!(summary.controllers, 3);
        assert_eq!(summary.sightings, 7);
        assert_eq!(summary.boards["CC3D"], 2);
        assert_eq!(summary.boards["Revolution"], 1);
    }

    #[tokio::test]
    async fn test_cached_summary_is_reused_until_invalidated() {
        let store = seeded_store().await;
        let cache = MockStatsCache::new();

        let first = cached_summary(&store, &cache, 60).await.unwrap();
        store
            .put_multi(vec![controller("d", "Sparky2", 1)])
            .await
            .unwrap();

        let stale = cached_summary(&store, &cache, 60).await.unwrap();
        assert_eq!(stale, first);

        cache.invalidate(RESULTS_STATS_KEY).await.unwrap();
        let fresh = cached_summary(&store, &cache, 60).await.unwrap();
        assert_eq!(fresh.controllers, 4);
    }

    #[tokio::test]
    async fn test_cache_outage_falls_back_to_store() {
        let store = seeded_store().await;

        let summary = cached_summary(&store, &MockStatsCache::failing(), 60)
            .await
            .unwrap();

        assert_eq!(summary.controllers, 3);
    }
}
