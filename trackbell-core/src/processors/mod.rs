//! Processors of the polling pipeline.
//!
//! - `JobRegistry`: one timer task per tracked key; each fire runs ingestion
//!   and hands new events to the notifier
//! - `IngestionEngine`: fetches from the carrier, stores unseen events,
//!   returns the delta
//! - `Notifier`: formats updates and fans them out to current subscribers

pub mod ingestion;
pub mod job_registry;
pub mod notifier;

pub use ingestion::{IngestError, IngestionEngine};
pub use job_registry::{FirstFire, JobRegistry, JobSnapshot, JobStatus};
pub use notifier::{FanoutReport, Notifier, UpdateKind, format_update};
