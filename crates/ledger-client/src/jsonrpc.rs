//! JSON-RPC Ledger Client
//!
//! Talks to the contract gateway over HTTP (views and transitions) and
//! WebSocket (event subscription). Every contract view is its own method and
//! one poll issues them concurrently.

use crate::client::{EventStream, LedgerClient, LedgerError};
use async_trait::async_trait;
use futures::StreamExt;
use jsonrpsee::core::client::{ClientT, Subscription, SubscriptionClientT};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::core::ClientError;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use jsonrpsee::ws_client::WsClientBuilder;
use ledger_types::{
    is_valid_address, Amount, DomainEvent, RoundState, SourcePosition, TxOutcome,
    WINNING_VALUE_COUNT,
};
use serde::de::DeserializeOwned;
use std::time::Duration;

const REVERT_PREFIX: &str = "execution reverted: ";
const REVERT_CODE: i32 = 3;
const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// JSON-RPC client configuration
#[derive(Clone, Debug)]
pub struct JsonRpcConfig {
    /// HTTP(S) endpoint for reads and transitions
    pub rpc_url: String,
    /// WS(S) endpoint for the event subscription
    pub ws_url: String,
    /// Round contract address
    pub contract_address: String,
    /// Caller identity used for transitions
    pub caller_address: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Round duration to use instead of reading it from the ledger
    pub round_duration_override: Option<u64>,
    /// Number of winning values to read per poll
    pub winning_value_count: usize,
}

impl Default for JsonRpcConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            ws_url: "ws://127.0.0.1:8546".to_string(),
            contract_address: String::new(),
            caller_address: String::new(),
            request_timeout: Duration::from_secs(10),
            round_duration_override: None,
            winning_value_count: WINNING_VALUE_COUNT,
        }
    }
}

impl JsonRpcConfig {
    /// Validate endpoints and addresses
    pub fn validate(&self) -> Result<(), LedgerError> {
        check_url(&self.rpc_url, &["http", "https"])?;
        check_url(&self.ws_url, &["ws", "wss"])?;
        if !is_valid_address(&self.contract_address) {
            return Err(LedgerError::Configuration(format!(
                "invalid contract address {:?}",
                self.contract_address
            )));
        }
        if !is_valid_address(&self.caller_address) {
            return Err(LedgerError::Configuration(format!(
                "invalid caller address {:?}",
                self.caller_address
            )));
        }
        Ok(())
    }
}

fn check_url(url: &str, schemes: &[&str]) -> Result<(), LedgerError> {
    let valid = url
        .split_once("://")
        .map(|(scheme, rest)| schemes.contains(&scheme) && !rest.is_empty())
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(LedgerError::Configuration(format!(
            "endpoint {:?} must use one of {:?}",
            url, schemes
        )))
    }
}

/// Map a jsonrpsee error into the ledger taxonomy.
///
/// Only a contract revert (code 3, or an "execution reverted" message) is a
/// rejection. Standard server errors such as internal error, method not
/// found or rate limiting are gateway trouble and stay transient.
pub fn map_client_error(err: ClientError) -> LedgerError {
    match err {
        ClientError::Call(obj) if is_revert(obj.code(), obj.message()) => {
            let message = obj.message();
            let reason = message.strip_prefix(REVERT_PREFIX).unwrap_or(message);
            LedgerError::rejected(reason)
        }
        ClientError::Call(obj) => LedgerError::transient(format!(
            "gateway error {}: {}",
            obj.code(),
            obj.message()
        )),
        ClientError::RequestTimeout => LedgerError::transient("request timed out"),
        other => LedgerError::transient(other.to_string()),
    }
}

fn is_revert(code: i32, message: &str) -> bool {
    code == REVERT_CODE || message.starts_with(REVERT_PREFIX.trim_end_matches(": "))
}

/// Ledger client backed by a JSON-RPC contract gateway
pub struct JsonRpcLedgerClient {
    http: HttpClient,
    config: JsonRpcConfig,
}

impl JsonRpcLedgerClient {
    /// Create a new client. Fails with `Configuration` on invalid settings.
    pub fn new(config: JsonRpcConfig) -> Result<Self, LedgerError> {
        config.validate()?;

        let http = HttpClientBuilder::default()
            .request_timeout(config.request_timeout)
            .build(&config.rpc_url)
            .map_err(|e| LedgerError::Configuration(format!("{}: {}", config.rpc_url, e)))?;

        tracing::info!(
            "Ledger client for contract {} via {}",
            config.contract_address,
            config.rpc_url
        );

        Ok(Self { http, config })
    }

    /// Get the client configuration
    pub fn config(&self) -> &JsonRpcConfig {
        &self.config
    }

    async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: ArrayParams,
    ) -> Result<R, LedgerError> {
        self.http
            .request(method, params)
            .await
            .map_err(map_client_error)
    }

    async fn read_duration(&self) -> Result<u64, LedgerError> {
        match self.config.round_duration_override {
            Some(secs) => Ok(secs),
            None => {
                self.call("lotto_roundDuration", rpc_params![&self.config.contract_address])
                    .await
            }
        }
    }

    async fn read_winning_values(&self) -> Result<Vec<u32>, LedgerError> {
        let contract = &self.config.contract_address;
        let reads = (0..self.config.winning_value_count)
            .map(|index| self.call::<u32>("lotto_winningNumber", rpc_params![contract, index]));
        futures::future::try_join_all(reads).await
    }

    async fn read_recipient(&self, round_id: u64) -> Result<Option<String>, LedgerError> {
        let recipient: Option<String> = self
            .call(
                "lotto_rewardRecipient",
                rpc_params![&self.config.contract_address, round_id],
            )
            .await?;
        Ok(recipient.filter(|addr| !addr.eq_ignore_ascii_case(ZERO_ADDRESS)))
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedgerClient {
    async fn read_round_state(&self) -> Result<RoundState, LedgerError> {
        let contract = &self.config.contract_address;

        let (round_id, start_time, duration, participant_count, pool_balance, drawing_in_progress, winning_values) = tokio::try_join!(
            self.call::<u64>("lotto_roundId", rpc_params![contract]),
            self.call::<u64>("lotto_roundStart", rpc_params![contract]),
            self.read_duration(),
            self.call::<u64>("lotto_participantsCount", rpc_params![contract]),
            self.call::<Amount>("lotto_poolBalance", rpc_params![contract]),
            self.call::<bool>("lotto_drawingInProgress", rpc_params![contract]),
            self.read_winning_values(),
        )?;

        let last_recipient = if round_id > 1 {
            self.read_recipient(round_id - 1).await?
        } else {
            None
        };

        Ok(RoundState {
            round_id,
            start_time,
            duration,
            participant_count,
            pool_balance,
            drawing_in_progress,
            winning_values,
            last_recipient,
        })
    }

    async fn simulate_round_transition(&self) -> Result<(), LedgerError> {
        let _: Option<serde_json::Value> = self
            .call(
                "lotto_simulateRequestWinningNumbers",
                rpc_params![&self.config.contract_address, &self.config.caller_address],
            )
            .await?;
        Ok(())
    }

    async fn submit_round_transition(&self) -> Result<TxOutcome, LedgerError> {
        let outcome: TxOutcome = self
            .call(
                "lotto_requestWinningNumbers",
                rpc_params![&self.config.contract_address, &self.config.caller_address],
            )
            .await?;
        tracing::debug!("Transition sent: {}", outcome.tx_hash());
        Ok(outcome)
    }

    async fn subscribe_events(
        &self,
        from: Option<SourcePosition>,
    ) -> Result<EventStream, LedgerError> {
        let ws = WsClientBuilder::default()
            .request_timeout(self.config.request_timeout)
            .build(&self.config.ws_url)
            .await
            .map_err(map_client_error)?;

        let subscription: Subscription<DomainEvent> = ws
            .subscribe(
                "lotto_subscribeEvents",
                rpc_params![&self.config.contract_address, from],
                "lotto_unsubscribeEvents",
            )
            .await
            .map_err(map_client_error)?;

        tracing::info!("Subscribed to ledger events from {:?}", from);

        // The ws client must outlive the subscription, so it rides along
        // in the stream state.
        let stream = futures::stream::unfold((ws, subscription), |(ws, mut sub)| async move {
            let item = sub.next().await?;
            let item = item.map_err(|e| LedgerError::Malformed(e.to_string()));
            Some((item, (ws, sub)))
        });

        Ok(stream.boxed())
    }
}
