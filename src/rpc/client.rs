//! JSON-RPC client for Ethereum-style endpoints. Implements the log, block,
//! and receipt capabilities consumed by the executor and the bundle detector.
//!
//! Every call is a single attempt gated by the circuit breaker and bounded by
//! the request timeout; retrying is left to the caller.

use crate::processor::range::BlockRange;
use crate::rpc::auth::build_auth_headers;
use crate::rpc::circuit_breaker::{CircuitBreakerError, RpcCircuitBreaker};
use crate::rpc::metrics::{RpcMetrics, RpcMetricsSnapshot};
use crate::rpc::options::RpcClientOptions;
use crate::rpc::source::{BlockSource, LogSource, ReceiptSource};
use crate::rpc::types::{
    LogEntry, LogFilter, RpcBlock, RpcLog, RpcReceipt, TransactionReceipt, TxRef,
};
use alloy_primitives::{B256, U64};
use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use jsonrpsee::core::{
    client::{ClientT, Error as JsonRpcError},
    http_helpers::HttpError,
    params::ArrayParams,
};
use jsonrpsee::http_client::transport::Error as HttpTransportError;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::time::{timeout, Instant};

#[derive(Debug)]
pub enum RpcError {
    Timeout {
        method: &'static str,
    },
    CircuitOpen,
    ResponseTooLarge {
        method: &'static str,
    },
    NotFound {
        method: &'static str,
        what: String,
    },
    Call {
        method: &'static str,
        code: i32,
        message: String,
    },
}

impl RpcError {
    /// Errors a retry cannot fix: the request itself must change.
    pub fn is_permanent(&self) -> bool {
        match self {
            RpcError::ResponseTooLarge { .. } => true,
            RpcError::Call { message, .. } => is_range_limit_message(message),
            _ => false,
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::CircuitOpen => write!(f, "rpc circuit breaker is open"),
            RpcError::ResponseTooLarge { method } => {
                write!(f, "rpc {method} response exceeded HTTP size limits")
            }
            RpcError::NotFound { method, what } => write!(f, "rpc {method} found no {what}"),
            RpcError::Call {
                method,
                code,
                message,
            } => write!(f, "rpc {method} call failed (code={code}, message={message})"),
        }
    }
}

impl std::error::Error for RpcError {}

/// Lower-cased fragments of the range or result-count limits hosted providers
/// put in `eth_getLogs` errors.
const RANGE_LIMIT_MESSAGES: &[&str] = &[
    "query returned more than",
    "block range too large",
    "block range is too large",
    "block range is too wide",
    "exceed maximum block range",
    "eth_getlogs is limited to",
    "log response size exceeded",
];

fn is_range_limit_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    RANGE_LIMIT_MESSAGES
        .iter()
        .any(|fragment| message.contains(fragment))
}

#[derive(Debug, Clone)]
pub struct EthRpcClient {
    rpc_url: Arc<String>,
    client: HttpClient,
    options: RpcClientOptions,
    metrics: Arc<RpcMetrics>,
    breaker: Arc<RpcCircuitBreaker>,
}

impl LogSource for EthRpcClient {
    fn fetch_logs<'a>(
        &'a self,
        range: BlockRange,
        filter: &'a LogFilter,
    ) -> BoxFuture<'a, Result<Vec<LogEntry>>> {
        Box::pin(self.get_logs(range, filter))
    }
}

impl BlockSource for EthRpcClient {
    fn fetch_block_transactions(&self, block_number: u64) -> BoxFuture<'_, Result<Vec<TxRef>>> {
        Box::pin(self.get_block_transactions(block_number))
    }
}

impl ReceiptSource for EthRpcClient {
    fn fetch_transaction_receipt(
        &self,
        tx_hash: B256,
    ) -> BoxFuture<'_, Result<TransactionReceipt>> {
        Box::pin(self.get_transaction_receipt(tx_hash))
    }
}

impl EthRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_options(url, RpcClientOptions::default())
    }

    pub fn with_options(url: impl Into<String>, options: RpcClientOptions) -> Result<Self> {
        Self::with_options_and_breaker(url, options, Arc::new(RpcCircuitBreaker::default()))
    }

    pub fn with_options_and_breaker(
        url: impl Into<String>,
        options: RpcClientOptions,
        breaker: Arc<RpcCircuitBreaker>,
    ) -> Result<Self> {
        options.validate()?;

        let rpc_url = url.into();
        let headers = build_auth_headers(options.basic_auth.as_ref())?;
        let max_request_body_size = options.max_request_body_bytes.min(u32::MAX as usize) as u32;
        let max_response_body_size = options.max_response_body_bytes.min(u32::MAX as usize) as u32;

        let client = HttpClientBuilder::default()
            .set_headers(headers)
            .request_timeout(options.request_timeout)
            .max_concurrent_requests(options.max_concurrent_requests)
            .max_request_size(max_request_body_size)
            .max_response_size(max_response_body_size)
            .build(&rpc_url)
            .map_err(|err| anyhow!("failed to build RPC client: {err}"))?;

        Ok(Self {
            rpc_url: Arc::new(rpc_url),
            client,
            options,
            metrics: Arc::new(RpcMetrics::default()),
            breaker,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.rpc_url
    }

    pub fn metrics(&self) -> RpcMetricsSnapshot {
        self.metrics.snapshot(self.breaker.snapshot().state)
    }

    pub async fn get_logs(&self, range: BlockRange, filter: &LogFilter) -> Result<Vec<LogEntry>> {
        let raw: Vec<RpcLog> = self
            .call("eth_getLogs", rpc_params![filter.to_rpc_filter(range)])
            .await?;

        raw.into_iter()
            .map(LogEntry::try_from)
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("invalid log in eth_getLogs response for blocks {range}"))
    }

    pub async fn get_block_transactions(&self, block_number: u64) -> Result<Vec<TxRef>> {
        const METHOD: &str = "eth_getBlockByNumber";

        let block: Option<RpcBlock> = self
            .call(METHOD, rpc_params![U64::from(block_number), false])
            .await?;
        let block = block.ok_or_else(|| RpcError::NotFound {
            method: METHOD,
            what: format!("block {block_number}"),
        })?;

        if block.number != U64::from(block_number) {
            return Err(anyhow!(
                "{METHOD} returned block {} for requested block {block_number}",
                block.number
            ));
        }

        Ok(block.into_tx_refs())
    }

    pub async fn get_transaction_receipt(&self, tx_hash: B256) -> Result<TransactionReceipt> {
        const METHOD: &str = "eth_getTransactionReceipt";

        let receipt: Option<RpcReceipt> = self.call(METHOD, rpc_params![tx_hash]).await?;
        let receipt = receipt.ok_or_else(|| RpcError::NotFound {
            method: METHOD,
            what: format!("receipt for {tx_hash}"),
        })?;
        TransactionReceipt::try_from(receipt)
    }

    /// Height of the most recent block known to the endpoint.
    pub async fn latest_block(&self) -> Result<u64> {
        let height: U64 = self.call("eth_blockNumber", rpc_params![]).await?;
        let height = height.to::<u64>();
        tracing::debug!(height, "fetched latest block");
        Ok(height)
    }

    async fn call<R>(&self, method: &'static str, params: ArrayParams) -> Result<R>
    where
        R: DeserializeOwned,
    {
        if let Err(CircuitBreakerError::CircuitOpen) = self.breaker.before_request() {
            self.metrics.record_rejection();
            tracing::warn!(method, "rpc circuit breaker rejected request");
            return Err(RpcError::CircuitOpen.into());
        }

        let start = Instant::now();
        let response = timeout(
            self.options.request_timeout,
            self.client.request::<R, _>(method, params),
        )
        .await;
        let elapsed = start.elapsed();

        match response {
            Ok(Ok(value)) => {
                self.metrics.record_success(elapsed);
                self.breaker.record_success();
                Ok(value)
            }
            Ok(Err(err)) => {
                self.metrics.record_failure(elapsed);
                // An error object means the endpoint answered; only transport
                // failures count against the breaker.
                if matches!(err, JsonRpcError::Call(_)) {
                    self.breaker.record_success();
                } else {
                    self.breaker.record_failure();
                }
                let err = map_rpc_error(method, err);
                tracing::debug!(method, error = %err, "rpc call failed");
                Err(err)
            }
            Err(_) => {
                self.metrics.record_timeout(elapsed);
                self.breaker.record_failure();
                Err(RpcError::Timeout { method }.into())
            }
        }
    }
}

fn map_rpc_error(method: &'static str, err: JsonRpcError) -> anyhow::Error {
    if response_too_large(&err) {
        return RpcError::ResponseTooLarge { method }.into();
    }
    match err {
        JsonRpcError::Call(object) => RpcError::Call {
            method,
            code: object.code(),
            message: object.message().to_owned(),
        }
        .into(),
        JsonRpcError::RequestTimeout => RpcError::Timeout { method }.into(),
        other => anyhow!("rpc {method} call failed: {other}"),
    }
}

fn response_too_large(err: &JsonRpcError) -> bool {
    match err {
        JsonRpcError::Transport(inner) => match inner.downcast_ref::<HttpTransportError>() {
            Some(HttpTransportError::Http(http_err)) => matches!(http_err, HttpError::TooLarge),
            Some(HttpTransportError::RequestTooLarge) => true,
            _ => false,
        },
        _ => false,
    }
}
