//! History Store - durable, append-only event projections
//!
//! Uses a sled embedded database. Each event kind has its own tree, keyed by
//! a global big-endian sequence number so insertion order survives restarts.
//! A `positions` tree indexes the dedup key `(kind, source position)`; the
//! record and its index entry are written in one transaction and flushed
//! before `append` returns.
//!
//! Readers never take the writer lock. They read below the committed
//! sequence watermark taken when the read starts, so a reader running
//! alongside a writer always sees a prefix of the history.

use chrono::{DateTime, Utc};
use ledger_types::{DomainEvent, EventKind, SourcePosition};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::transaction::{TransactionError, TransactionResult, Transactional};
use sled::{Db, Tree};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// History store errors
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("history storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("history transaction aborted")]
    Aborted,

    #[error("history record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("corrupt history key ({0} bytes)")]
    CorruptKey(usize),

    #[error("history task failed: {0}")]
    Task(String),
}

/// Persisted projection of a `DomainEvent`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(flatten)]
    pub event: DomainEvent,
    /// When the orchestrator ingested the event
    pub ingested_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn new(event: DomainEvent, ingested_at: DateTime<Utc>) -> Self {
        Self { event, ingested_at }
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    pub fn source_position(&self) -> SourcePosition {
        self.event.source_position
    }
}

/// Result of an append
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    /// New record stored
    Appended,
    /// Dedup key already present, nothing written
    Duplicate,
}

/// Append side of the history, as needed by the event ingestor
pub trait HistorySink: Send + Sync + 'static {
    /// Idempotently append a record
    fn append(&self, record: &HistoryRecord) -> Result<AppendOutcome, HistoryError>;

    /// Highest source position stored so far
    fn last_position(&self) -> Result<Option<SourcePosition>, HistoryError>;
}

/// Durable history of ingested events
pub struct HistoryStore {
    /// Sled database instance
    db: Db,
    /// Entry-recorded events by sequence
    entries: Tree,
    /// Round-resolved events by sequence
    resolutions: Tree,
    /// Dedup index: kind tag + source position -> sequence
    positions: Tree,
    /// Writer lock, holds the next sequence number
    writer: Mutex<u64>,
    /// Every sequence below this is committed
    committed: AtomicU64,
}

impl HistoryStore {
    /// Open or create a history store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, HistoryError> {
        let db = sled::open(&path)?;
        let entries = db.open_tree(EventKind::EntryRecorded.collection())?;
        let resolutions = db.open_tree(EventKind::RoundResolved.collection())?;
        let positions = db.open_tree("positions")?;

        let mut next_seq = 0;
        for tree in [&entries, &resolutions] {
            if let Some((key, _)) = tree.last()? {
                next_seq = next_seq.max(decode_seq(&key)? + 1);
            }
        }

        tracing::info!(
            "Opened history store at {:?} ({} records)",
            path.as_ref(),
            entries.len() + resolutions.len()
        );

        Ok(Self {
            db,
            entries,
            resolutions,
            positions,
            writer: Mutex::new(next_seq),
            committed: AtomicU64::new(next_seq),
        })
    }

    fn tree(&self, kind: EventKind) -> &Tree {
        match kind {
            EventKind::EntryRecorded => &self.entries,
            EventKind::RoundResolved => &self.resolutions,
        }
    }

    /// Append a record unless its dedup key is already stored.
    ///
    /// Durable before returning.
    pub fn append(&self, record: &HistoryRecord) -> Result<AppendOutcome, HistoryError> {
        let key = position_key(record.kind(), record.source_position());
        let value = serde_json::to_vec(record)?;

        let mut next_seq = self.writer.lock();
        let seq_bytes = next_seq.to_be_bytes();

        let result: TransactionResult<bool, ()> = (self.tree(record.kind()), &self.positions)
            .transaction(|(tree, positions)| {
                if positions.get(&key[..])?.is_some() {
                    return Ok(false);
                }
                tree.insert(&seq_bytes[..], value.as_slice())?;
                positions.insert(&key[..], &seq_bytes[..])?;
                Ok(true)
            });

        let inserted = match result {
            Ok(inserted) => inserted,
            Err(TransactionError::Storage(e)) => return Err(e.into()),
            Err(TransactionError::Abort(())) => return Err(HistoryError::Aborted),
        };

        if !inserted {
            return Ok(AppendOutcome::Duplicate);
        }

        *next_seq += 1;
        self.committed.store(*next_seq, Ordering::Release);
        self.db.flush()?;
        Ok(AppendOutcome::Appended)
    }

    /// Read all records in insertion order
    pub fn read_all(&self) -> Result<Vec<HistoryRecord>, HistoryError> {
        let watermark = self.watermark();
        let mut sequenced = Vec::new();
        for kind in EventKind::ALL {
            sequenced.extend(self.read_sequenced(kind, watermark)?);
        }
        sequenced.sort_by_key(|(seq, _)| *seq);
        Ok(sequenced.into_iter().map(|(_, record)| record).collect())
    }

    /// Read the records of one kind in insertion order
    pub fn read_kind(&self, kind: EventKind) -> Result<Vec<HistoryRecord>, HistoryError> {
        Ok(self
            .read_sequenced(kind, self.watermark())?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    fn watermark(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }

    fn read_sequenced(
        &self,
        kind: EventKind,
        watermark: u64,
    ) -> Result<Vec<(u64, HistoryRecord)>, HistoryError> {
        let mut records = Vec::new();
        for item in self.tree(kind).range(..watermark.to_be_bytes()) {
            let (key, value) = item?;
            let record: HistoryRecord = serde_json::from_slice(&value)?;
            records.push((decode_seq(&key)?, record));
        }
        Ok(records)
    }

    /// Whether a dedup key is already stored
    pub fn contains(&self, kind: EventKind, position: SourcePosition) -> Result<bool, HistoryError> {
        Ok(self.positions.contains_key(position_key(kind, position))?)
    }

    /// Highest source position stored across all kinds
    pub fn last_position(&self) -> Result<Option<SourcePosition>, HistoryError> {
        let mut last = None;
        for kind in EventKind::ALL {
            if let Some((key, _)) = self.positions.scan_prefix([kind.tag()]).next_back().transpose()? {
                let position = decode_position(&key)?;
                last = last.max(Some(position));
            }
        }
        Ok(last)
    }

    /// Total number of stored records
    pub fn len(&self) -> usize {
        self.entries.len() + self.resolutions.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), HistoryError> {
        self.db.flush()?;
        Ok(())
    }
}

impl HistorySink for HistoryStore {
    fn append(&self, record: &HistoryRecord) -> Result<AppendOutcome, HistoryError> {
        HistoryStore::append(self, record)
    }

    fn last_position(&self) -> Result<Option<SourcePosition>, HistoryError> {
        HistoryStore::last_position(self)
    }
}

impl<T: HistorySink + ?Sized> HistorySink for Arc<T> {
    fn append(&self, record: &HistoryRecord) -> Result<AppendOutcome, HistoryError> {
        (**self).append(record)
    }

    fn last_position(&self) -> Result<Option<SourcePosition>, HistoryError> {
        (**self).last_position()
    }
}

/// Dedup key bytes: kind tag followed by the ordered position bytes
fn position_key(kind: EventKind, position: SourcePosition) -> [u8; 13] {
    let mut key = [0u8; 13];
    key[0] = kind.tag();
    key[1..].copy_from_slice(&position.to_be_bytes());
    key
}

fn decode_position(key: &[u8]) -> Result<SourcePosition, HistoryError> {
    if key.len() != 13 {
        return Err(HistoryError::CorruptKey(key.len()));
    }
    let mut block = [0u8; 8];
    block.copy_from_slice(&key[1..9]);
    let mut log = [0u8; 4];
    log.copy_from_slice(&key[9..13]);
    Ok(SourcePosition::new(u64::from_be_bytes(block), u32::from_be_bytes(log)))
}

fn decode_seq(key: &[u8]) -> Result<u64, HistoryError> {
    let arr: [u8; 8] = key
        .try_into()
        .map_err(|_| HistoryError::CorruptKey(key.len()))?;
    Ok(u64::from_be_bytes(arr))
}
