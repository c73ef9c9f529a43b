//! Shared types for the round ledger surface
//!
//! This crate contains the type definitions exchanged with the lottery
//! contract gateway: round state reads, transition outcomes and the two
//! event kinds the contract emits.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Number of winning values drawn per round (matches the deployed contract)
pub const WINNING_VALUE_COUNT: usize = 7;

/// Decimals of the pool currency (wei -> ether)
pub const POOL_DECIMALS: u32 = 18;

/// Amount in the smallest unit of the pool currency.
///
/// Carried on the wire as a decimal string since balances overflow JSON
/// numbers; plain numbers are accepted too.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Format with `decimals` fractional digits, trailing zeros trimmed
    /// but at least one kept (`1000000000000000` wei -> `"0.001"`).
    pub fn format_units(&self, decimals: u32) -> String {
        let base = 10u128.pow(decimals);
        let whole = self.0 / base;
        let frac = self.0 % base;
        if frac == 0 || decimals == 0 {
            return format!("{}.0", whole);
        }
        let digits = format!("{:0width$}", frac, width = decimals as usize);
        format!("{}.{}", whole, digits.trim_end_matches('0'))
    }

    /// Format as ether
    pub fn format_ether(&self) -> String {
        self.format_units(POOL_DECIMALS)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Amount(n as u128)),
            Raw::Text(s) => s
                .trim()
                .parse::<u128>()
                .map(Amount)
                .map_err(|e| serde::de::Error::custom(format!("invalid amount {:?}: {}", s, e))),
        }
    }
}

/// Round state as read from the ledger in one poll
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundState {
    /// Current round id (never decreases)
    pub round_id: u64,
    /// Round start in unix seconds, 0 when the round has not started
    pub start_time: u64,
    /// Fixed round duration in seconds
    pub duration: u64,
    /// Entries recorded in the current round
    pub participant_count: u64,
    /// Pool balance in the smallest currency unit
    pub pool_balance: Amount,
    /// Ledger flag: a round-ending transition is mid-flight
    pub drawing_in_progress: bool,
    /// Winning values of the most recent draw, all zero before the first one
    #[serde(default)]
    pub winning_values: Vec<u32>,
    /// Reward recipient of round `round_id - 1`
    #[serde(default)]
    pub last_recipient: Option<String>,
}

impl RoundState {
    /// Round deadline in unix seconds, `None` when not started
    pub fn deadline(&self) -> Option<u64> {
        if self.start_time == 0 {
            None
        } else {
            Some(self.start_time.saturating_add(self.duration))
        }
    }

    /// Whether the ledger holds a recorded draw result
    pub fn has_draw_result(&self) -> bool {
        self.winning_values.iter().any(|v| *v != 0)
    }

    /// Id of the last resolved round, if any
    pub fn last_resolved_round_id(&self) -> Option<u64> {
        if self.round_id > 1 {
            Some(self.round_id - 1)
        } else {
            None
        }
    }
}

/// Ledger-assigned position of an event (block number + log index)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourcePosition {
    pub block_number: u64,
    pub log_index: u32,
}

impl SourcePosition {
    pub fn new(block_number: u64, log_index: u32) -> Self {
        Self {
            block_number,
            log_index,
        }
    }

    /// Big-endian bytes, ordered the same way as the position itself
    pub fn to_be_bytes(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[..8].copy_from_slice(&self.block_number.to_be_bytes());
        out[8..].copy_from_slice(&self.log_index.to_be_bytes());
        out
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

/// Event kinds emitted by the contract
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A ticket was bought
    EntryRecorded,
    /// Winning values were picked and the pool distributed
    RoundResolved,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::EntryRecorded, EventKind::RoundResolved];

    /// Name of the history collection holding this kind
    pub fn collection(&self) -> &'static str {
        match self {
            EventKind::EntryRecorded => "entries",
            EventKind::RoundResolved => "resolutions",
        }
    }

    pub fn from_collection(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.collection() == name)
    }

    /// Stable one-byte tag used in dedup keys
    pub fn tag(&self) -> u8 {
        match self {
            EventKind::EntryRecorded => 1,
            EventKind::RoundResolved => 2,
        }
    }
}

/// Kind-specific event data
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    EntryRecorded {
        participant: String,
        values: Vec<u32>,
    },
    RoundResolved {
        winning_values: Vec<u32>,
        distributed: Amount,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::EntryRecorded { .. } => EventKind::EntryRecorded,
            EventPayload::RoundResolved { .. } => EventKind::RoundResolved,
        }
    }
}

/// Immutable fact emitted by the ledger.
///
/// `(kind, source_position)` is globally unique.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub round_id: u64,
    pub source_position: SourcePosition,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Deduplication key
    pub fn dedup_key(&self) -> (EventKind, SourcePosition) {
        (self.kind(), self.source_position)
    }
}

/// Outcome of an accepted round transition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TxOutcome {
    /// Accepted and finalized
    Confirmed { tx_hash: String },
    /// Accepted, finalization not observed yet
    Pending { tx_hash: String },
}

impl TxOutcome {
    pub fn tx_hash(&self) -> &str {
        match self {
            TxOutcome::Confirmed { tx_hash } | TxOutcome::Pending { tx_hash } => tx_hash,
        }
    }
}

/// Check a `0x`-prefixed 20-byte hex address
pub fn is_valid_address(addr: &str) -> bool {
    match addr.strip_prefix("0x").or_else(|| addr.strip_prefix("0X")) {
        Some(hex) => hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}
