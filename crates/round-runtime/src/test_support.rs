//! Scripted in-memory ledger for runtime tests

use async_trait::async_trait;
use futures::StreamExt;
use ledger_client::{EventStream, LedgerClient, LedgerError};
use ledger_types::{
    Amount, DomainEvent, EventPayload, RoundState, SourcePosition, TxOutcome,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Round with the given timing and participant count
pub fn round(start_time: u64, duration: u64, participant_count: u64) -> RoundState {
    RoundState {
        round_id: 1,
        start_time,
        duration,
        participant_count,
        pool_balance: Amount(participant_count as u128 * 1_000_000_000_000_000),
        drawing_in_progress: false,
        winning_values: vec![0; 7],
        last_recipient: None,
    }
}

pub fn entry_event(round_id: u64, block: u64, log_index: u32) -> DomainEvent {
    DomainEvent {
        round_id,
        source_position: SourcePosition::new(block, log_index),
        payload: EventPayload::EntryRecorded {
            participant: "0x4ffAf25aC16311620f280c80c328694B4aa1f636".to_string(),
            values: vec![3, 9, 14, 22, 31, 40, 47],
        },
    }
}

pub fn resolved_event(round_id: u64, block: u64, log_index: u32) -> DomainEvent {
    DomainEvent {
        round_id,
        source_position: SourcePosition::new(block, log_index),
        payload: EventPayload::RoundResolved {
            winning_values: vec![5, 12, 19, 23, 34, 41, 48],
            distributed: Amount(3_000_000_000_000_000),
        },
    }
}

/// In-memory ledger with scripted responses
pub struct MockLedger {
    state: Mutex<Result<RoundState, LedgerError>>,
    simulate_response: Mutex<Result<(), LedgerError>>,
    submit_responses: Mutex<VecDeque<Result<TxOutcome, LedgerError>>>,
    sessions: Mutex<VecDeque<Vec<Result<DomainEvent, LedgerError>>>>,
    subscribed_from: Mutex<Vec<Option<SourcePosition>>>,
    reads: AtomicUsize,
    simulations: AtomicUsize,
    submissions: AtomicUsize,
}

impl MockLedger {
    pub fn new(state: RoundState) -> Self {
        Self {
            state: Mutex::new(Ok(state)),
            simulate_response: Mutex::new(Ok(())),
            submit_responses: Mutex::new(VecDeque::new()),
            sessions: Mutex::new(VecDeque::new()),
            subscribed_from: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
            simulations: AtomicUsize::new(0),
            submissions: AtomicUsize::new(0),
        }
    }

    pub fn set_state(&self, state: RoundState) {
        *self.state.lock() = Ok(state);
    }

    pub fn fail_reads(&self, err: LedgerError) {
        *self.state.lock() = Err(err);
    }

    pub fn set_simulate_response(&self, response: Result<(), LedgerError>) {
        *self.simulate_response.lock() = response;
    }

    /// Queue a submit response; with none queued submits confirm
    pub fn push_submit_response(&self, response: Result<TxOutcome, LedgerError>) {
        self.submit_responses.lock().push_back(response);
    }

    /// Queue one subscription session. Once the queue is empty new
    /// subscriptions stay open without delivering anything.
    pub fn push_session(&self, items: Vec<Result<DomainEvent, LedgerError>>) {
        self.sessions.lock().push_back(items);
    }

    pub fn subscribed_from(&self) -> Vec<Option<SourcePosition>> {
        self.subscribed_from.lock().clone()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn simulations(&self) -> usize {
        self.simulations.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn read_round_state(&self) -> Result<RoundState, LedgerError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.state.lock().clone()
    }

    async fn simulate_round_transition(&self) -> Result<(), LedgerError> {
        self.simulations.fetch_add(1, Ordering::SeqCst);
        self.simulate_response.lock().clone()
    }

    async fn submit_round_transition(&self) -> Result<TxOutcome, LedgerError> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst);
        self.submit_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(TxOutcome::Confirmed {
                    tx_hash: format!("0xmock{}", n),
                })
            })
    }

    async fn subscribe_events(
        &self,
        from: Option<SourcePosition>,
    ) -> Result<EventStream, LedgerError> {
        self.subscribed_from.lock().push(from);
        match self.sessions.lock().pop_front() {
            Some(items) => Ok(futures::stream::iter(items).boxed()),
            None => Ok(futures::stream::pending::<Result<DomainEvent, LedgerError>>().boxed()),
        }
    }
}
