//! Metrics and observability module
//!
//! Records engine activity through the `metrics` facade. Installing a
//! recorder/exporter is left to the embedding application.
//!
//! Key metrics:
//! - Upload, download and deletion counts and durations
//! - Replica write failures and under-replicated chunks
//! - Corruption events at chunk and file level
//! - Swallowed cleanup failures

pub mod recorder;

pub use recorder::{init_metrics, Operation, OperationMetrics};
