use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rolled-up record for one physical controller board.
///
/// Invariants kept by the merge engine: `oldest <= timestamp`, `count` never
/// decreases, `oldest` never increases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundController {
    /// Controller identity: the board UUID, or the SHA-256 of its CPU id.
    #[serde(rename = "_id")]
    pub uuid: String,
    pub name: String,
    pub git_hash: String,
    pub git_tag: String,
    pub uavo_hash: String,
    pub gcs_os: String,
    pub gcs_arch: String,
    pub gcs_version: String,
    /// Empty unless the reporting session opted in to sharing it.
    pub addr: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub oldest: DateTime<Utc>,
    pub count: i64,
    /// Optimistic concurrency token, bumped by the store on every write.
    #[serde(default)]
    pub version: i64,
}

impl FoundController {
    pub fn new(uuid: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            uuid,
            name: String::new(),
            git_hash: String::new(),
            git_tag: String::new(),
            uavo_hash: String::new(),
            gcs_os: String::new(),
            gcs_arch: String::new(),
            gcs_version: String::new(),
            addr: String::new(),
            country: String::new(),
            region: String::new(),
            city: String::new(),
            lat: 0.0,
            lon: 0.0,
            timestamp,
            oldest: timestamp,
            count: 0,
            version: 0,
        }
    }
}
