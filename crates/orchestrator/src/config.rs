//! Orchestrator Configuration
//!
//! Defaults, then an optional JSON file, then explicit command-line flags.

use ledger_client::{JsonRpcConfig, LedgerError};
use ledger_types::WINNING_VALUE_COUNT;
use round_runtime::{CoordinatorConfig, IngestorConfig, TRIGGER_INTERVAL_MS, VIEW_INTERVAL_MS};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors, fatal at startup
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<LedgerError> for ConfigError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Configuration(msg) => ConfigError::Invalid(msg),
            other => ConfigError::Invalid(other.to_string()),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// HTTP(S) JSON-RPC endpoint of the ledger gateway
    pub rpc_url: String,
    /// WS(S) endpoint for the event subscription
    pub ws_url: String,
    /// Round contract address
    pub contract_address: String,
    /// Address the round-ending transition is submitted from
    pub caller_address: String,
    /// Use this round duration instead of reading it from the ledger
    pub round_duration_secs: Option<u64>,
    /// Trigger coordinator poll interval
    pub trigger_interval_ms: u64,
    /// View aggregator poll interval
    pub view_interval_ms: u64,
    /// Per-request ledger timeout
    pub request_timeout_ms: u64,
    /// How long an accepted attempt blocks resubmission
    pub settle_window_secs: u64,
    /// Dry-run the transition before submitting
    pub preflight: bool,
    /// Delay before resubscribing to events
    pub reconnect_delay_ms: u64,
    /// Delay between retries of a failed history append
    pub persist_retry_delay_ms: u64,
    /// Winning values read per poll
    pub winning_value_count: usize,
    /// View server bind address
    pub view_addr: String,
    /// Data directory; the history lives in `<data_dir>/history`
    pub data_dir: PathBuf,
    /// How long shutdown waits for running loops
    pub shutdown_grace_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            ws_url: "ws://127.0.0.1:8546".to_string(),
            contract_address: String::new(),
            caller_address: String::new(),
            round_duration_secs: None,
            trigger_interval_ms: TRIGGER_INTERVAL_MS,
            view_interval_ms: VIEW_INTERVAL_MS,
            request_timeout_ms: 10_000,
            settle_window_secs: 120,
            preflight: true,
            reconnect_delay_ms: 5_000,
            persist_retry_delay_ms: 1_000,
            winning_value_count: WINNING_VALUE_COUNT,
            view_addr: view_server::DEFAULT_VIEW_ADDR.to_string(),
            data_dir: PathBuf::from("./data"),
            shutdown_grace_ms: 5_000,
        }
    }
}

/// Command-line overrides. Only flags given on the command line apply.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Ledger JSON-RPC endpoint
    #[arg(long)]
    pub rpc_url: Option<String>,

    /// Ledger event subscription endpoint
    #[arg(long)]
    pub ws_url: Option<String>,

    /// Round contract address
    #[arg(long)]
    pub contract_address: Option<String>,

    /// Caller address for the round-ending transition
    #[arg(long)]
    pub caller_address: Option<String>,

    /// Round duration override in seconds
    #[arg(long)]
    pub round_duration_secs: Option<u64>,

    /// Trigger coordinator interval in milliseconds
    #[arg(long)]
    pub trigger_interval_ms: Option<u64>,

    /// View aggregator interval in milliseconds
    #[arg(long)]
    pub view_interval_ms: Option<u64>,

    /// Ledger request timeout in milliseconds
    #[arg(long)]
    pub request_timeout_ms: Option<u64>,

    /// Dry-run the transition before submitting (true/false)
    #[arg(long)]
    pub preflight: Option<bool>,

    /// View server bind address
    #[arg(long)]
    pub view_addr: Option<String>,

    /// Data directory for the history store
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

impl OrchestratorConfig {
    /// Load from an optional JSON file; missing fields keep their defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply command-line overrides
    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(v) = &overrides.rpc_url {
            self.rpc_url = v.clone();
        }
        if let Some(v) = &overrides.ws_url {
            self.ws_url = v.clone();
        }
        if let Some(v) = &overrides.contract_address {
            self.contract_address = v.clone();
        }
        if let Some(v) = &overrides.caller_address {
            self.caller_address = v.clone();
        }
        if let Some(v) = overrides.round_duration_secs {
            self.round_duration_secs = Some(v);
        }
        if let Some(v) = overrides.trigger_interval_ms {
            self.trigger_interval_ms = v;
        }
        if let Some(v) = overrides.view_interval_ms {
            self.view_interval_ms = v;
        }
        if let Some(v) = overrides.request_timeout_ms {
            self.request_timeout_ms = v;
        }
        if let Some(v) = overrides.preflight {
            self.preflight = v;
        }
        if let Some(v) = &overrides.view_addr {
            self.view_addr = v.clone();
        }
        if let Some(v) = &overrides.data_dir {
            self.data_dir = v.clone();
        }
    }

    /// Reject configurations the orchestrator cannot start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ledger_config().validate()?;

        for (name, value) in [
            ("trigger_interval_ms", self.trigger_interval_ms),
            ("view_interval_ms", self.view_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        if self.view_interval_ms >= self.trigger_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "view_interval_ms ({}) must be shorter than trigger_interval_ms ({})",
                self.view_interval_ms, self.trigger_interval_ms
            )));
        }
        if self.round_duration_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "round_duration_secs must be positive".to_string(),
            ));
        }
        if self.winning_value_count == 0 {
            return Err(ConfigError::Invalid(
                "winning_value_count must be positive".to_string(),
            ));
        }
        self.view_addr.parse::<SocketAddr>().map_err(|e| {
            ConfigError::Invalid(format!("view_addr {:?}: {}", self.view_addr, e))
        })?;
        Ok(())
    }

    /// Ledger client settings
    pub fn ledger_config(&self) -> JsonRpcConfig {
        JsonRpcConfig {
            rpc_url: self.rpc_url.clone(),
            ws_url: self.ws_url.clone(),
            contract_address: self.contract_address.clone(),
            caller_address: self.caller_address.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            round_duration_override: self.round_duration_secs,
            winning_value_count: self.winning_value_count,
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            interval: Duration::from_millis(self.trigger_interval_ms),
            settle_window: Duration::from_secs(self.settle_window_secs),
            preflight: self.preflight,
            ..Default::default()
        }
    }

    pub fn ingestor_config(&self) -> IngestorConfig {
        IngestorConfig {
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            persist_retry_delay: Duration::from_millis(self.persist_retry_delay_ms),
        }
    }

    pub fn view_interval(&self) -> Duration {
        Duration::from_millis(self.view_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn history_dir(&self) -> PathBuf {
        self.data_dir.join("history")
    }
}
