//! The usage rollup pipeline.
//!
//! Stage one ([`fanout`]) re-wraps every stored usage report as a compressed
//! work item and queues it. Stage two ([`merge`]) folds the board sightings
//! of one delivered item into the per-controller aggregates.

pub mod codec;
pub mod export;
pub mod fanout;
pub mod identity;
pub mod merge;
pub mod stats;

pub use fanout::{FanOut, FanOutSummary, ROLLUP_QUEUE, ROLLUP_TASK_PATH};
pub use merge::{RollupEngine, RollupOutcome};
