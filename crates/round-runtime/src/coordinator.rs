//! Trigger Coordinator - requests the round-ending transition
//!
//! Runs a fixed-interval control loop. Each tick reads the round, derives the
//! phase and submits the transition only when the round is expired, has
//! participants and no attempt of ours is still settling. The ledger stays
//! the arbiter: a rejection (someone else already triggered, eligibility lost
//! between read and submit) is an expected, benign outcome.
//!
//! Nothing here is persisted. After a restart the coordinator starts `Idle`
//! and learns everything from the next read.

use crate::timer::{self, Phase};
use crate::Shutdown;
use ledger_client::{LedgerClient, LedgerError};
use ledger_types::TxOutcome;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Coordinator states within one tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Evaluating,
    Submitting,
    Confirmed,
    Rejected,
    Retryable,
}

/// Outcome of one of our own trigger attempts
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Accepted, finalization not observed yet
    Pending { tx_hash: String },
    /// Accepted and finalized
    Confirmed { tx_hash: String },
    /// Ledger refused, reason preserved
    RejectedByLedger(String),
    /// Network or timeout failure
    TransientError(String),
}

/// In-memory record of a trigger attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerAttempt {
    pub round_id: u64,
    /// Unix seconds
    pub submitted_at: u64,
    pub outcome: AttemptOutcome,
}

impl TriggerAttempt {
    /// Whether this attempt still blocks a new submission at `now`
    fn is_outstanding(&self, round_id: u64, now: u64, settle_window: Duration) -> bool {
        self.round_id == round_id
            && matches!(
                self.outcome,
                AttemptOutcome::Pending { .. } | AttemptOutcome::Confirmed { .. }
            )
            && now.saturating_sub(self.submitted_at) < settle_window.as_secs()
    }
}

/// Why a tick ended without submitting
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdleReason {
    NotStarted,
    Active { remaining: u64 },
    Drawing,
    NoParticipants,
    AttemptOutstanding { round_id: u64 },
}

/// What one tick did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to do this tick
    Idle(IdleReason),
    /// Transition accepted and finalized
    Confirmed { round_id: u64, tx_hash: String },
    /// Transition accepted, still settling
    Pending { round_id: u64, tx_hash: String },
    /// Ledger refused the transition
    Rejected { round_id: u64, reason: String },
    /// Read or submit failed transiently; the next tick re-evaluates
    Retryable {
        round_id: Option<u64>,
        reason: String,
    },
}

impl TickOutcome {
    /// State the tick ended in before returning to `Idle`
    pub fn final_state(&self) -> TriggerState {
        match self {
            TickOutcome::Idle(_) => TriggerState::Idle,
            TickOutcome::Confirmed { .. } => TriggerState::Confirmed,
            TickOutcome::Pending { .. } => TriggerState::Submitting,
            TickOutcome::Rejected { .. } => TriggerState::Rejected,
            TickOutcome::Retryable { .. } => TriggerState::Retryable,
        }
    }
}

/// Coordinator configuration
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Poll interval
    pub interval: Duration,
    /// How long an accepted attempt blocks resubmission for the same round
    pub settle_window: Duration,
    /// Dry-run the transition before submitting
    pub preflight: bool,
    /// Attempts kept in memory
    pub max_attempts: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(crate::TRIGGER_INTERVAL_MS),
            settle_window: Duration::from_secs(120),
            preflight: false,
            max_attempts: 64,
        }
    }
}

/// Drives the round-ending transition
pub struct TriggerCoordinator<C> {
    client: C,
    config: CoordinatorConfig,
    state: TriggerState,
    attempts: VecDeque<TriggerAttempt>,
}

impl<C: LedgerClient> TriggerCoordinator<C> {
    /// Create a new coordinator, starting `Idle` with no attempts
    pub fn new(client: C, config: CoordinatorConfig) -> Self {
        Self {
            client,
            config,
            state: TriggerState::Idle,
            attempts: VecDeque::new(),
        }
    }

    /// Current state (always `Idle` between ticks)
    pub fn state(&self) -> TriggerState {
        self.state
    }

    /// Attempts made by this process, oldest first
    pub fn attempts(&self) -> impl Iterator<Item = &TriggerAttempt> {
        self.attempts.iter()
    }

    /// Run one tick against the wall clock
    pub async fn tick(&mut self) -> TickOutcome {
        self.tick_at(timer::now_unix()).await
    }

    /// Run one tick with `now` as the current unix time
    pub async fn tick_at(&mut self, now: u64) -> TickOutcome {
        self.transition(TriggerState::Evaluating);
        let outcome = self.evaluate(now).await;
        self.transition(outcome.final_state());

        match &outcome {
            TickOutcome::Idle(reason) => {
                tracing::debug!("Trigger idle: {:?}", reason);
            }
            TickOutcome::Confirmed { round_id, tx_hash } => {
                tracing::info!("Draw request confirmed for round {} ({})", round_id, tx_hash);
            }
            TickOutcome::Pending { round_id, tx_hash } => {
                tracing::info!("Draw request sent for round {} ({}), awaiting finalization", round_id, tx_hash);
            }
            TickOutcome::Rejected { round_id, reason } => {
                tracing::info!("Draw request for round {} rejected by ledger: {}", round_id, reason);
            }
            TickOutcome::Retryable { round_id, reason } => {
                tracing::warn!("Trigger tick failed (round {:?}): {}", round_id, reason);
            }
        }

        self.transition(TriggerState::Idle);
        outcome
    }

    async fn evaluate(&mut self, now: u64) -> TickOutcome {
        let round = match self.client.read_round_state().await {
            Ok(round) => round,
            Err(e) => {
                return TickOutcome::Retryable {
                    round_id: None,
                    reason: e.to_string(),
                }
            }
        };

        let timing = timer::derive(&round, now);
        match timing.phase {
            Phase::NotStarted => return TickOutcome::Idle(IdleReason::NotStarted),
            Phase::Active => {
                return TickOutcome::Idle(IdleReason::Active {
                    remaining: timing.remaining.unwrap_or(0),
                })
            }
            Phase::Drawing => return TickOutcome::Idle(IdleReason::Drawing),
            Phase::Expired => {}
        }

        if round.participant_count == 0 {
            return TickOutcome::Idle(IdleReason::NoParticipants);
        }

        let settle_window = self.config.settle_window;
        if self
            .attempts
            .iter()
            .any(|a| a.is_outstanding(round.round_id, now, settle_window))
        {
            return TickOutcome::Idle(IdleReason::AttemptOutstanding {
                round_id: round.round_id,
            });
        }

        self.transition(TriggerState::Submitting);
        tracing::info!(
            "Round {} expired with {} participants, requesting draw",
            round.round_id,
            round.participant_count
        );

        if self.config.preflight {
            if let Err(e) = self.client.simulate_round_transition().await {
                return self.record_failure(round.round_id, now, e);
            }
        }

        match self.client.submit_round_transition().await {
            Ok(TxOutcome::Confirmed { tx_hash }) => {
                self.record(round.round_id, now, AttemptOutcome::Confirmed { tx_hash: tx_hash.clone() });
                TickOutcome::Confirmed {
                    round_id: round.round_id,
                    tx_hash,
                }
            }
            Ok(TxOutcome::Pending { tx_hash }) => {
                self.record(round.round_id, now, AttemptOutcome::Pending { tx_hash: tx_hash.clone() });
                TickOutcome::Pending {
                    round_id: round.round_id,
                    tx_hash,
                }
            }
            Err(e) => self.record_failure(round.round_id, now, e),
        }
    }

    fn record_failure(&mut self, round_id: u64, now: u64, err: LedgerError) -> TickOutcome {
        match err {
            LedgerError::Rejected { reason } => {
                self.record(round_id, now, AttemptOutcome::RejectedByLedger(reason.clone()));
                TickOutcome::Rejected { round_id, reason }
            }
            other => {
                let reason = other.to_string();
                self.record(round_id, now, AttemptOutcome::TransientError(reason.clone()));
                TickOutcome::Retryable {
                    round_id: Some(round_id),
                    reason,
                }
            }
        }
    }

    fn record(&mut self, round_id: u64, submitted_at: u64, outcome: AttemptOutcome) {
        if self.attempts.len() >= self.config.max_attempts {
            self.attempts.pop_front();
        }
        self.attempts.push_back(TriggerAttempt {
            round_id,
            submitted_at,
            outcome,
        });
    }

    fn transition(&mut self, to: TriggerState) {
        if self.state != to {
            tracing::trace!("Trigger {:?} -> {:?}", self.state, to);
            self.state = to;
        }
    }

    /// Run the control loop until shutdown.
    ///
    /// Ticks never overlap and a tick in progress is finished before the
    /// shutdown signal is observed.
    pub async fn run(mut self, mut shutdown: Shutdown) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Trigger coordinator started ({}ms interval, preflight {})",
            self.config.interval.as_millis(),
            self.config.preflight
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Trigger coordinator stopped");
    }
}
