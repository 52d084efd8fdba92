pub mod config;
pub mod idle_gc;
pub mod snapshot;
pub mod tier;
pub mod watcher;
pub mod worker;

pub use config::{ConfigError, IdleGcConfig, WorkerConfig, MAX_CHANNEL_BUFFER};
pub use idle_gc::{IdleGc, IdleGcStats};
pub use snapshot::{BoardColumn, Counts, IssueRow, Snapshot};
pub use tier::{DatasetTier, TierOutcome, TierPolicy};
pub use watcher::{FileWatcher, WatchMode};
pub use worker::{
    Health, Metrics, Phase, StartError, Worker, WorkerError, WorkerFault, WorkerMessage,
    WorkerState,
};
