//! CSV export of all controller aggregates.

use crate::error::RollupError;
use crate::models::{FoundController, GitLabel};
use crate::services::ControllerStore;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::TryStreamExt;

pub const EXPORT_HEADER: [&str; 18] = [
    "timestamp",
    "oldest",
    "count",
    "uuid",
    "name",
    "git_hash",
    "git_tag",
    "ref",
    "uavo_hash",
    "gcs_os",
    "gcs_os_abbrev",
    "gcs_arch",
    "gcs_version",
    "country",
    "region",
    "city",
    "lat",
    "lon",
];

/// Release labels indexed for commit lookup.
#[derive(Debug, Default, Clone)]
pub struct GitLabels {
    labels: Vec<GitLabel>,
}

impl GitLabels {
    pub fn new(labels: Vec<GitLabel>) -> Self {
        let labels = labels
            .into_iter()
            .map(|l| GitLabel {
                hash: l.hash.to_lowercase(),
                ..l
            })
            .collect();
        Self { labels }
    }

    /// First label whose commit matches `hash`. Firmware reports may carry
    /// an abbreviated hash, so a prefix of the full commit matches too.
    pub fn describe(&self, hash: &str) -> Option<&str> {
        if hash.is_empty() {
            return None;
        }
        let hash = hash.to_lowercase();
        self.labels
            .iter()
            .find(|l| l.hash.starts_with(&hash))
            .map(|l| l.label.as_str())
    }
}

pub fn abbrev_os(os: &str) -> &str {
    const LINUX: &[&str] = &["Ubuntu", "openSUSE", "Gentoo", "Arch"];

    if os.starts_with("Windows") {
        "Windows"
    } else if LINUX.iter().any(|p| os.starts_with(p)) {
        "Linux"
    } else if os.starts_with("OS X") {
        "Mac"
    } else {
        os
    }
}

/// Shortest decimal form, switching to exponent notation (`1e-05`) when the
/// decimal exponent is below -4 or at least 6, so exported coordinates read
/// the same as earlier exports.
pub fn format_coordinate(x: f64) -> String {
    if x.is_nan() {
        return "NaN".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }
    if x == 0.0 {
        return x.to_string();
    }

    let sci = format!("{:e}", x);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => return x.to_string(),
    };
    if (-4..6).contains(&exp) {
        x.to_string()
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    }
}

fn rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn export_row(fc: &FoundController, labels: &GitLabels) -> [String; 18] {
    [
        rfc3339(&fc.timestamp),
        rfc3339(&fc.oldest),
        fc.count.to_string(),
        fc.uuid.clone(),
        fc.name.clone(),
        fc.git_hash.clone(),
        fc.git_tag.clone(),
        labels.describe(&fc.git_hash).unwrap_or_default().to_string(),
        fc.uavo_hash.clone(),
        fc.gcs_os.clone(),
        abbrev_os(&fc.gcs_os).to_string(),
        fc.gcs_arch.clone(),
        fc.gcs_version.clone(),
        fc.country.clone(),
        fc.region.clone(),
        fc.city.clone(),
        format_coordinate(fc.lat),
        format_coordinate(fc.lon),
    ]
}

/// Render every controller, most recently seen first, as CSV.
pub async fn export_boards(
    store: &dyn ControllerStore,
    labels: &GitLabels,
) -> Result<Vec<u8>, RollupError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(EXPORT_HEADER)?;

    let mut rows = store.list_by_recency().await?;
    let mut written = 0usize;
    while let Some(fc) = rows.try_next().await? {
        writer.write_record(export_row(&fc, labels))?;
        written += 1;
    }

    tracing::info!(rows = written, "Exported controller records");
    writer
        .into_inner()
        .map_err(|e| RollupError::Export(anyhow::anyhow!("flushing csv: {}", e)))
}
