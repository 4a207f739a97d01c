use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate view over all controllers, served from the result cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub controllers: u64,
    pub sightings: i64,
    /// Distinct controllers per board name.
    pub boards: BTreeMap<String, u64>,
}
