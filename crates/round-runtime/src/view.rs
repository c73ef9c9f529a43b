//! View Aggregator - read-side snapshot for interactive clients
//!
//! Polls the ledger on a shorter interval than the coordinator and publishes
//! a snapshot through a shared handle. A failed poll keeps the previous
//! snapshot (marked stale) instead of clearing it. Never submits anything.

use crate::timer::{self, Phase};
use crate::Shutdown;
use ledger_client::{LedgerClient, LedgerError};
use ledger_types::{Amount, RoundState};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Result of the last resolved round
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LastResult {
    pub winning_values: Vec<u32>,
    pub recipient: Option<String>,
}

/// Presentation snapshot
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ViewSnapshot {
    /// `None` until the first successful poll
    pub round_id: Option<u64>,
    pub phase: Option<Phase>,
    pub remaining: Option<u64>,
    pub deadline: Option<u64>,
    pub pool_balance: Amount,
    pub participant_count: u64,
    pub last_resolved_round_id: Option<u64>,
    pub last_result: Option<LastResult>,
    /// Unix time of the last successful poll
    pub observed_at: Option<u64>,
    /// The last poll failed; fields are from an earlier poll
    pub stale: bool,
    pub last_error: Option<String>,
}

impl ViewSnapshot {
    /// Build a fresh snapshot from a successful read
    pub fn from_state(state: &RoundState, now: u64) -> Self {
        let timing = timer::derive(state, now);

        let last_result = if state.has_draw_result() || state.last_recipient.is_some() {
            Some(LastResult {
                winning_values: state.winning_values.clone(),
                recipient: state.last_recipient.clone(),
            })
        } else {
            None
        };

        Self {
            round_id: Some(state.round_id),
            phase: Some(timing.phase),
            remaining: timing.remaining,
            deadline: timing.deadline,
            pool_balance: state.pool_balance,
            participant_count: state.participant_count,
            last_resolved_round_id: state.last_resolved_round_id(),
            last_result,
            observed_at: Some(now),
            stale: false,
            last_error: None,
        }
    }
}

/// Shared, cloneable access to the latest snapshot
#[derive(Clone, Default)]
pub struct ViewHandle {
    inner: Arc<RwLock<ViewSnapshot>>,
}

impl ViewHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the latest snapshot
    pub fn snapshot(&self) -> ViewSnapshot {
        self.inner.read().clone()
    }

    /// Replace the snapshot with a fresh one
    pub fn publish(&self, snapshot: ViewSnapshot) {
        *self.inner.write() = snapshot;
    }

    /// Keep the current snapshot but flag it stale
    pub fn mark_stale(&self, error: &LedgerError) {
        let mut snapshot = self.inner.write();
        snapshot.stale = true;
        snapshot.last_error = Some(error.to_string());
    }
}

/// Polls the ledger and publishes snapshots
pub struct ViewAggregator<C> {
    client: C,
    handle: ViewHandle,
    interval: Duration,
}

impl<C: LedgerClient> ViewAggregator<C> {
    /// Create a new aggregator publishing into `handle`
    pub fn new(client: C, handle: ViewHandle, interval: Duration) -> Self {
        Self {
            client,
            handle,
            interval,
        }
    }

    /// Handle to the published snapshot
    pub fn handle(&self) -> ViewHandle {
        self.handle.clone()
    }

    /// Poll once against the wall clock
    pub async fn poll(&self) -> Result<(), LedgerError> {
        self.poll_at(timer::now_unix()).await
    }

    /// Poll once with `now` as the current unix time.
    ///
    /// On failure the previous snapshot stays available and the error is
    /// returned as a soft error.
    pub async fn poll_at(&self, now: u64) -> Result<(), LedgerError> {
        match self.client.read_round_state().await {
            Ok(state) => {
                self.handle.publish(ViewSnapshot::from_state(&state, now));
                Ok(())
            }
            Err(e) => {
                tracing::warn!("View refresh failed, keeping previous snapshot: {}", e);
                self.handle.mark_stale(&e);
                Err(e)
            }
        }
    }

    /// Run the poll loop until shutdown
    pub async fn run(self, mut shutdown: Shutdown) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("View aggregator started ({}ms interval)", self.interval.as_millis());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let _ = self.poll().await;
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("View aggregator stopped");
    }
}
