//! Ledger Client - access to the round contract
//!
//! Handles communication with the remote ledger:
//! - Reading round state for the timer, coordinator and view
//! - Submitting (and dry-running) the round-ending transition
//! - Subscribing to the contract's event stream

pub mod client;
pub mod jsonrpc;

pub use client::{EventStream, LedgerClient, LedgerError};
pub use jsonrpc::{JsonRpcConfig, JsonRpcLedgerClient};
