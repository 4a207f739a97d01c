use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

/// Value of `ShareIP` that allows the reporting address to be retained.
pub const SHARE_IP_AFFIRMATIVE: &str = "true";

/// Queue payload carrying one usage report between fan-out and rollup.
///
/// Field names are part of the wire format shared with already-queued items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutWorkItem {
    #[serde(rename = "IP", default)]
    pub ip: String,
    #[serde(rename = "Country", default)]
    pub country: String,
    #[serde(rename = "Region", default)]
    pub region: String,
    #[serde(rename = "City", default)]
    pub city: String,
    #[serde(rename = "Lat", default)]
    pub lat: f64,
    #[serde(rename = "Lon", default)]
    pub lon: f64,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    /// The application's report, verbatim.
    #[serde(rename = "RawData")]
    pub raw_data: Box<RawValue>,
}

impl RolloutWorkItem {
    pub fn report(&self) -> Result<UsageReport, serde_json::Error> {
        serde_json::from_str(self.raw_data.get())
    }
}

/// The parts of an application report the rollup reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageReport {
    #[serde(rename = "BoardsSeen", default, deserialize_with = "null_as_default")]
    pub boards_seen: Vec<BoardSighting>,
    #[serde(flatten)]
    pub context: ReportContext,
}

/// One controller board the application talked to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BoardSighting {
    #[serde(rename = "CPU", default, deserialize_with = "null_as_default")]
    pub cpu: String,
    #[serde(rename = "UUID", default, deserialize_with = "null_as_default")]
    pub uuid: String,
    #[serde(rename = "FwHash", default, deserialize_with = "null_as_default")]
    pub fw_hash: String,
    #[serde(rename = "GitHash", default, deserialize_with = "null_as_default")]
    pub git_hash: String,
    #[serde(rename = "GitTag", default, deserialize_with = "null_as_default")]
    pub git_tag: String,
    #[serde(rename = "Name", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "UavoHash", default, deserialize_with = "null_as_default")]
    pub uavo_hash: String,
}

/// Host-side facts shared by every sighting in a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReportContext {
    #[serde(rename = "CurrentOS", default, deserialize_with = "null_as_default")]
    pub current_os: String,
    #[serde(rename = "CurrentArch", default, deserialize_with = "null_as_default")]
    pub current_arch: String,
    #[serde(rename = "gcs_version", default, deserialize_with = "null_as_default")]
    pub gcs_version: String,
    #[serde(rename = "ShareIP", default, deserialize_with = "null_as_default")]
    pub share_ip: String,
}

impl ReportContext {
    pub fn retains_address(&self) -> bool {
        self.share_ip == SHARE_IP_AFFIRMATIVE
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_application_report() {
        let raw = r#"{
            "BoardsSeen": [
                {"CPU": "ABC123", "UUID": "", "FwHash": "ff", "GitHash": "1a2b3c4d",
                 "GitTag": "Release-20160120", "Name": "CopterControl", "UavoHash": "9f"}
            ],
            "CurrentArch": "x86_64",
            "CurrentOS": "Ubuntu 15.10",
            "gcs_version": "20160120",
            "ShareIP": "true",
            "SomethingElse": {"ignored": 1}
        }"#;

        let report: UsageReport = serde_json::from_str(raw).unwrap();
        assert_eq!(report.boards_seen.len(), 1);
        assert_eq!(report.boards_seen[0].cpu, "ABC123");
        assert_eq!(report.boards_seen[0].name, "CopterControl");
        assert_eq!(report.context.current_os, "Ubuntu 15.10");
        assert_eq!(report.context.gcs_version, "20160120");
        assert!(report.context.retains_address());
    }

    #[test]
    fn test_missing_and_null_fields_default() {
        let report: UsageReport =
            serde_json::from_str(r#"{"BoardsSeen": null, "ShareIP": null}"#).unwrap();
        assert!(report.boards_seen.is_empty());
        assert!(!report.context.retains_address());
    }

    #[test]
    fn test_share_ip_must_be_exactly_true() {
        for value in ["True", "yes", "1", ""] {
            let ctx = ReportContext {
                share_ip: value.to_string(),
                ..Default::default()
            };
            assert!(!ctx.retains_address(), "{:?} must not retain", value);
        }
    }

    #[test]
    fn test_field_names_are_case_sensitive() {
        let report: UsageReport =
            serde_json::from_str(r#"{"boardsseen": [{"CPU": "x"}], "shareip": "true"}"#).unwrap();
        assert!(report.boards_seen.is_empty());
        assert!(!report.context.retains_address());
    }

    #[test]
    fn test_work_item_keeps_raw_data_verbatim() {
        let json = r#"{"IP":"10.0.0.1","Country":"NZ","Region":"","City":"Auckland","Lat":-36.85,"Lon":174.76,"Timestamp":"2016-01-20T10:00:00Z","RawData":{"CurrentOS": "OS X 10.11"}}"#;

        let item: RolloutWorkItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.raw_data.get(), r#"{"CurrentOS": "OS X 10.11"}"#);
        assert_eq!(item.report().unwrap().context.current_os, "OS X 10.11");
        assert_eq!(item.timestamp.to_rfc3339(), "2016-01-20T10:00:00+00:00");
    }
}
