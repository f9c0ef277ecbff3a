//! Core engine: schedule fetches, drain the queue, aggregate.

pub mod consumer;
pub mod pipeline;
pub mod scheduler;

pub use consumer::{AggregationConsumer, ConsumerReport, ConsumerSettings};
pub use pipeline::{AggregationRun, RunOutcome, RunParams, RunSummary};
pub use scheduler::{IngestionScheduler, SchedulerReport, SchedulerSettings};
