//! View Server - HTTP presentation edge for interactive clients
//!
//! Serves the latest round snapshot and the ingested history as JSON:
//! - `GET /health`
//! - `GET /round`
//! - `GET /history`, `GET /history/:kind`

pub mod http_server;

pub use http_server::{RoundView, ViewServer};

/// Default bind address for the view server
pub const DEFAULT_VIEW_ADDR: &str = "127.0.0.1:8787";
