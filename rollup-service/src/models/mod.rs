pub mod controller;
pub mod report;
pub mod stats;
pub mod usage;

pub use controller::FoundController;
pub use report::{BoardSighting, ReportContext, RolloutWorkItem, UsageReport};
pub use stats::StatsSummary;
pub use usage::{GitLabel, RawUsageRecord};
