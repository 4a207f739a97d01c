use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A usage report as received from the application. The body is stored
/// compressed and never modified afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawUsageRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(with = "bytes_as_binary")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
}

impl RawUsageRecord {
    pub fn new(data: Vec<u8>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            data,
            addr: String::new(),
            country: String::new(),
            region: String::new(),
            city: String::new(),
            lat: 0.0,
            lon: 0.0,
            timestamp,
        }
    }
}

/// Release label for a firmware commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabel {
    pub label: String,
    pub hash: String,
}

/// Stores `Vec<u8>` as BSON binary instead of an array of integers.
mod bytes_as_binary {
    use mongodb::bson::{spec::BinarySubtype, Binary};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        Binary {
            subtype: BinarySubtype::Generic,
            bytes: bytes.to_vec(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Binary::deserialize(deserializer).map(|b| b.bytes)
    }
}
