pub mod cache;
pub mod database;
pub mod memory;
pub mod metrics;
pub mod store;

pub use cache::{MockStatsCache, RedisStatsCache, StatsCache};
pub use database::MongoDb;
pub use memory::InMemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use store::{ControllerStore, LabelSource, RecordStream, UsageStore};
