//! Round Runtime - Round lifecycle orchestration
//!
//! This crate provides the core of the orchestrator:
//! - Phase/deadline derivation from polled round state
//! - Trigger coordination for the round-ending transition
//! - Event ingestion into a durable, deduplicated history store
//! - A read-only view snapshot for interactive clients

pub mod coordinator;
pub mod history;
pub mod ingestor;
pub mod timer;
pub mod view;

#[cfg(test)]
pub(crate) mod test_support;

pub use coordinator::{
    AttemptOutcome, CoordinatorConfig, IdleReason, TickOutcome, TriggerAttempt,
    TriggerCoordinator, TriggerState,
};
pub use history::{AppendOutcome, HistoryError, HistoryRecord, HistorySink, HistoryStore};
pub use ingestor::{EventIngestor, IngestStats, IngestorConfig};
pub use timer::{Phase, RoundTiming};
pub use view::{LastResult, ViewAggregator, ViewHandle, ViewSnapshot};

use std::time::Duration;
use tokio::sync::watch;

/// Trigger coordinator poll interval in milliseconds
pub const TRIGGER_INTERVAL_MS: u64 = 30_000;

/// View aggregator poll interval in milliseconds
pub const VIEW_INTERVAL_MS: u64 = 5_000;

/// Shutdown signal shared by all loops. `true` means stop.
pub type Shutdown = watch::Receiver<bool>;

/// Sleep for `delay` unless shutdown is requested first.
///
/// Returns `true` when the caller should stop.
pub(crate) async fn sleep_or_shutdown(delay: Duration, shutdown: &mut Shutdown) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown.changed() => true,
    }
}
