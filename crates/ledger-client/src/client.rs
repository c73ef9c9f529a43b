//! Ledger Client - read, submit and subscribe against the round contract
//!
//! The trait is the seam between the orchestrator and the remote ledger.
//! Implementations never retry; callers own the retry policy.

use async_trait::async_trait;
use futures::stream::BoxStream;
use ledger_types::{DomainEvent, RoundState, SourcePosition, TxOutcome};
use std::sync::Arc;
use thiserror::Error;

/// Ledger client errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Network failure, timeout or unreadable response. Retry on the next poll.
    #[error("transient ledger error: {0}")]
    Transient(String),

    /// Business-rule rejection reported by the ledger itself
    #[error("rejected by ledger: {reason}")]
    Rejected { reason: String },

    /// Invalid endpoint or address
    #[error("invalid ledger configuration: {0}")]
    Configuration(String),

    /// Event notification that could not be decoded. The stream stays usable.
    #[error("malformed ledger event: {0}")]
    Malformed(String),
}

impl LedgerError {
    pub fn transient(msg: impl Into<String>) -> Self {
        LedgerError::Transient(msg.into())
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        LedgerError::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transient(_))
    }
}

/// Lazy, unbounded event sequence. Ends when the connection drops; the
/// consumer resubscribes.
pub type EventStream = BoxStream<'static, Result<DomainEvent, LedgerError>>;

/// Access to the remote round ledger.
///
/// Must be safe for concurrent read calls: the trigger coordinator and the
/// view aggregator poll independently.
#[async_trait]
pub trait LedgerClient: Send + Sync + 'static {
    /// Read the current round state
    async fn read_round_state(&self) -> Result<RoundState, LedgerError>;

    /// Dry-run the round-ending transition, surfacing the revert reason
    async fn simulate_round_transition(&self) -> Result<(), LedgerError>;

    /// Submit the round-ending transition
    async fn submit_round_transition(&self) -> Result<TxOutcome, LedgerError>;

    /// Subscribe to contract events, starting at `from` when given.
    /// Events at `from` itself may be redelivered.
    async fn subscribe_events(
        &self,
        from: Option<SourcePosition>,
    ) -> Result<EventStream, LedgerError>;
}

#[async_trait]
impl<T: LedgerClient + ?Sized> LedgerClient for Arc<T> {
    async fn read_round_state(&self) -> Result<RoundState, LedgerError> {
        (**self).read_round_state().await
    }

    async fn simulate_round_transition(&self) -> Result<(), LedgerError> {
        (**self).simulate_round_transition().await
    }

    async fn submit_round_transition(&self) -> Result<TxOutcome, LedgerError> {
        (**self).submit_round_transition().await
    }

    async fn subscribe_events(
        &self,
        from: Option<SourcePosition>,
    ) -> Result<EventStream, LedgerError> {
        (**self).subscribe_events(from).await
    }
}
