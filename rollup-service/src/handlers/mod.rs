pub mod export;
pub mod health;
pub mod rollup;
pub mod stats;
pub mod usage;

pub use export::export_boards;
pub use health::{health_check, metrics_endpoint, readiness_check};
pub use rollup::{async_rollup, update_controllers};
pub use stats::controller_stats;
pub use usage::ingest_usage;
