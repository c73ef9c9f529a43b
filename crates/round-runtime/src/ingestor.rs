//! Event Ingestor - ledger events into the history store
//!
//! Consumes the ledger subscription in delivery order and appends each
//! event to the history. Dedup happens in the store: a redelivered event
//! comes back as `Duplicate` and triggers no side effects. A failed append
//! is retried until it succeeds; the ingestor never skips a record.

use crate::history::{AppendOutcome, HistoryError, HistoryRecord, HistorySink};
use crate::{sleep_or_shutdown, Shutdown};
use chrono::Utc;
use futures::StreamExt;
use ledger_client::{LedgerClient, LedgerError};
use ledger_types::{DomainEvent, EventPayload, SourcePosition};
use std::sync::Arc;
use std::time::Duration;

/// Ingestor configuration
#[derive(Clone, Debug)]
pub struct IngestorConfig {
    /// Delay before resubscribing after a disconnect
    pub reconnect_delay: Duration,
    /// Delay between retries of a failed append
    pub persist_retry_delay: Duration,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            persist_retry_delay: Duration::from_secs(1),
        }
    }
}

/// Counters for one ingestor run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub appended: u64,
    pub duplicates: u64,
    pub persist_failures: u64,
    /// Notifications skipped because they could not be decoded
    pub malformed: u64,
    pub subscriptions: u64,
}

/// Appends ledger events to the history
pub struct EventIngestor<C, S> {
    client: C,
    sink: Arc<S>,
    config: IngestorConfig,
    resume_from: Option<SourcePosition>,
    stats: IngestStats,
}

impl<C: LedgerClient, S: HistorySink> EventIngestor<C, S> {
    /// Create a new ingestor
    pub fn new(client: C, sink: S, config: IngestorConfig) -> Self {
        Self {
            client,
            sink: Arc::new(sink),
            config,
            resume_from: None,
            stats: IngestStats::default(),
        }
    }

    /// Counters so far
    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Position the next subscription starts from
    pub fn resume_from(&self) -> Option<SourcePosition> {
        self.resume_from
    }

    /// Store one event, retrying failed appends until they succeed.
    ///
    /// Returns `None` only when shutdown interrupts the retries.
    pub async fn ingest(
        &mut self,
        event: DomainEvent,
        shutdown: &mut Shutdown,
    ) -> Option<AppendOutcome> {
        let record = HistoryRecord::new(event, Utc::now());

        loop {
            match self.append_blocking(record.clone()).await {
                Ok(outcome) => {
                    self.on_stored(&record, outcome);
                    return Some(outcome);
                }
                Err(e) => {
                    self.stats.persist_failures += 1;
                    tracing::error!(
                        "Failed to persist {:?} at {}: {} (retrying)",
                        record.kind(),
                        record.source_position(),
                        e
                    );
                    if sleep_or_shutdown(self.config.persist_retry_delay, shutdown).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Append on the blocking pool; `append` ends with an fsync
    async fn append_blocking(&self, record: HistoryRecord) -> Result<AppendOutcome, HistoryError> {
        let sink = self.sink.clone();
        tokio::task::spawn_blocking(move || sink.append(&record))
            .await
            .map_err(|e| HistoryError::Task(e.to_string()))?
    }

    fn on_stored(&mut self, record: &HistoryRecord, outcome: AppendOutcome) {
        let position = record.source_position();
        self.resume_from = self.resume_from.max(Some(position));

        if outcome == AppendOutcome::Duplicate {
            self.stats.duplicates += 1;
            tracing::debug!("Skipping redelivered {:?} at {}", record.kind(), position);
            return;
        }

        self.stats.appended += 1;
        let round_id = record.event.round_id;
        match &record.event.payload {
            EventPayload::EntryRecorded {
                participant,
                values,
            } => {
                tracing::info!(
                    "[Round {}] Ticket: {} | Numbers: {:?}",
                    round_id,
                    participant,
                    values
                );
            }
            EventPayload::RoundResolved {
                winning_values,
                distributed,
            } => {
                tracing::info!(
                    "Draw complete - round {} | Winning numbers: {:?} | Prize distributed: {} ETH",
                    round_id,
                    winning_values,
                    distributed.format_ether()
                );
            }
        }
    }

    async fn load_resume_position(&mut self, shutdown: &mut Shutdown) -> bool {
        loop {
            match self.sink.last_position() {
                Ok(position) => {
                    self.resume_from = position;
                    return true;
                }
                Err(e) => {
                    tracing::error!("Failed to read last ingested position: {}", e);
                    if sleep_or_shutdown(self.config.persist_retry_delay, shutdown).await {
                        return false;
                    }
                }
            }
        }
    }

    /// Run until shutdown, resubscribing whenever the stream ends
    pub async fn run(mut self, mut shutdown: Shutdown) -> IngestStats {
        if !self.load_resume_position(&mut shutdown).await {
            return self.stats;
        }

        tracing::info!("Event ingestor started, resuming from {:?}", self.resume_from);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.client.subscribe_events(self.resume_from).await {
                Ok(mut stream) => {
                    self.stats.subscriptions += 1;

                    loop {
                        let item = tokio::select! {
                            item = stream.next() => item,
                            _ = shutdown.changed() => {
                                tracing::info!("Event ingestor stopped");
                                return self.stats;
                            }
                        };

                        match item {
                            Some(Ok(event)) => {
                                if self.ingest(event, &mut shutdown).await.is_none() {
                                    tracing::info!("Event ingestor stopped");
                                    return self.stats;
                                }
                            }
                            Some(Err(LedgerError::Malformed(reason))) => {
                                self.stats.malformed += 1;
                                tracing::warn!("Skipping undecodable event: {}", reason);
                            }
                            Some(Err(e)) => {
                                tracing::warn!("Event stream error: {}", e);
                                break;
                            }
                            None => {
                                tracing::warn!("Event stream ended");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to subscribe to ledger events: {}", e);
                }
            }

            if sleep_or_shutdown(self.config.reconnect_delay, &mut shutdown).await {
                break;
            }
            tracing::info!("Resubscribing from {:?}", self.resume_from);
        }

        tracing::info!("Event ingestor stopped");
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryStore;
    use crate::test_support::{entry_event, resolved_event, round, MockLedger};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio::sync::watch;

    fn fast_config() -> IngestorConfig {
        IngestorConfig {
            reconnect_delay: Duration::from_millis(5),
            persist_retry_delay: Duration::from_millis(1),
        }
    }

    /// Sink that fails the first `failures` appends
    struct FlakySink {
        inner: HistoryStore,
        failures: Mutex<usize>,
    }

    impl HistorySink for FlakySink {
        fn append(&self, record: &HistoryRecord) -> Result<AppendOutcome, HistoryError> {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(HistoryError::Aborted);
            }
            self.inner.append(record)
        }

        fn last_position(&self) -> Result<Option<SourcePosition>, HistoryError> {
            self.inner.last_position()
        }
    }

    async fn wait_for_len(store: &HistoryStore, len: usize) {
        for _ in 0..200 {
            if store.len() >= len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("history never reached {} records", len);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_stores_once() {
        let dir = tempdir().unwrap();
        let store = Arc::new(HistoryStore::open(dir.path()).unwrap());
        let ledger = Arc::new(MockLedger::new(round(0, 600, 0)));
        let mut ingestor = EventIngestor::new(ledger, store.clone(), fast_config());
        let (_tx, mut rx) = watch::channel(false);

        // Same source position delivered twice in sequence
        let event = entry_event(1, 100, 0);
        assert_eq!(ingestor.ingest(event.clone(), &mut rx).await, Some(AppendOutcome::Appended));
        assert_eq!(ingestor.ingest(event, &mut rx).await, Some(AppendOutcome::Duplicate));

        assert_eq!(store.read_all().unwrap().len(), 1);
        assert_eq!(ingestor.stats().appended, 1);
        assert_eq!(ingestor.stats().duplicates, 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_retried_not_skipped() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(FlakySink {
            inner: HistoryStore::open(dir.path()).unwrap(),
            failures: Mutex::new(3),
        });
        let ledger = Arc::new(MockLedger::new(round(0, 600, 0)));
        let mut ingestor = EventIngestor::new(ledger, sink.clone(), fast_config());
        let (_tx, mut rx) = watch::channel(false);

        let first = entry_event(1, 10, 0);
        let second = entry_event(1, 11, 0);
        assert_eq!(ingestor.ingest(first.clone(), &mut rx).await, Some(AppendOutcome::Appended));
        assert_eq!(ingestor.ingest(second.clone(), &mut rx).await, Some(AppendOutcome::Appended));

        assert_eq!(ingestor.stats().persist_failures, 3);
        let stored: Vec<_> = sink.inner.read_all().unwrap().into_iter().map(|r| r.event).collect();
        assert_eq!(stored, vec![first, second]);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_retries() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(FlakySink {
            inner: HistoryStore::open(dir.path()).unwrap(),
            failures: Mutex::new(usize::MAX),
        });
        let ledger = Arc::new(MockLedger::new(round(0, 600, 0)));
        let mut ingestor = EventIngestor::new(ledger, sink.clone(), fast_config());
        let (tx, mut rx) = watch::channel(false);

        tx.send(true).unwrap();
        assert_eq!(ingestor.ingest(entry_event(1, 10, 0), &mut rx).await, None);
        assert!(sink.inner.is_empty());
    }

    #[tokio::test]
    async fn test_resubscribes_and_tolerates_redelivery() {
        let dir = tempdir().unwrap();
        let store = Arc::new(HistoryStore::open(dir.path()).unwrap());
        let ledger = Arc::new(MockLedger::new(round(0, 600, 0)));

        // First session drops after two events; the second redelivers the
        // last one before continuing.
        ledger.push_session(vec![
            Ok(entry_event(1, 10, 0)),
            Ok(entry_event(1, 11, 0)),
            Err(LedgerError::transient("socket closed")),
        ]);
        ledger.push_session(vec![
            Ok(entry_event(1, 11, 0)),
            Ok(resolved_event(1, 12, 0)),
        ]);

        let ingestor = EventIngestor::new(ledger.clone(), store.clone(), fast_config());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(ingestor.run(rx));

        wait_for_len(&store, 3).await;
        // Let the ingestor settle on the idle third subscription
        for _ in 0..200 {
            if ledger.subscribed_from().len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(stats.appended, 3);
        assert_eq!(stats.duplicates, 1);

        let from = ledger.subscribed_from();
        assert_eq!(from[0], None);
        assert_eq!(from[1], Some(SourcePosition::new(11, 0)));
        assert_eq!(from[2], Some(SourcePosition::new(12, 0)));
    }

    #[tokio::test]
    async fn test_undecodable_event_is_skipped() {
        let dir = tempdir().unwrap();
        let store = Arc::new(HistoryStore::open(dir.path()).unwrap());
        let ledger = Arc::new(MockLedger::new(round(0, 600, 0)));

        ledger.push_session(vec![
            Ok(entry_event(1, 10, 0)),
            Err(LedgerError::Malformed("missing field `kind`".to_string())),
            Ok(resolved_event(1, 12, 0)),
        ]);

        let ingestor = EventIngestor::new(ledger.clone(), store.clone(), fast_config());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(ingestor.run(rx));

        wait_for_len(&store, 2).await;
        tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        let stored: Vec<_> = store.read_all().unwrap().into_iter().map(|r| r.event).collect();
        assert_eq!(stored, vec![entry_event(1, 10, 0), resolved_event(1, 12, 0)]);
        assert_eq!(stats.malformed, 1);
        // The session was not abandoned over the bad item
        assert_eq!(stats.subscriptions, 1);
        assert_eq!(ledger.subscribed_from()[0], None);
    }

    #[tokio::test]
    async fn test_resumes_from_stored_history() {
        let dir = tempdir().unwrap();
        let store = Arc::new(HistoryStore::open(dir.path()).unwrap());
        store
            .append(&HistoryRecord::new(entry_event(1, 42, 3), Utc::now()))
            .unwrap();

        let ledger = Arc::new(MockLedger::new(round(0, 600, 0)));
        let ingestor = EventIngestor::new(ledger.clone(), store.clone(), fast_config());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(ingestor.run(rx));

        for _ in 0..200 {
            if !ledger.subscribed_from().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(ledger.subscribed_from()[0], Some(SourcePosition::new(42, 3)));
    }
}
