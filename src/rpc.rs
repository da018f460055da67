//! Ledger access: the capability traits, their domain records, and the
//! JSON-RPC client with its circuit breaker, metrics, and auth.

pub mod auth;
pub mod circuit_breaker;
pub mod client;
pub mod metrics;
#[cfg(test)]
pub(crate) mod mock;
pub mod options;
pub mod source;
pub mod types;

pub use circuit_breaker::{
    CircuitBreakerError, CircuitBreakerSnapshot, CircuitState, RpcCircuitBreaker,
};
pub use client::{EthRpcClient, RpcError};
pub use metrics::RpcMetricsSnapshot;
pub use options::{BasicAuth, RpcClientOptions};
pub use source::{BlockSource, LedgerSource, LogSource, ReceiptSource};
pub use types::{LogEntry, LogFilter, TransactionReceipt, TxRef};
