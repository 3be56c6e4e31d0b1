//! Infrastructure layer: job store, worker pool, upload pipeline, config.

pub mod config;
pub mod jobs;
pub mod pipeline;
pub mod queue;

pub use config::{ConfigError, QueueConfig};
pub use queue::{JobHandle, UploadQueue, UploadQueueError};

mod integration_tests;
