pub mod bundles;
pub mod processor;
pub mod rpc;
pub mod runtime;

pub use bundles::{
    sort_bundles, Bundle, BundleDetector, BundleReport, BundleTransaction, DiscardReason,
    DiscardedCandidate, EventSignatureSequence, SequenceStep,
};
pub use processor::backoff::RetryPolicy;
pub use processor::budget::RequestBudget;
pub use processor::executor::RangeQueryExecutor;
pub use processor::range::{split_range, BlockRange};
pub use rpc::{
    CircuitState, EthRpcClient, LogEntry, LogFilter, RpcClientOptions, RpcError,
    TransactionReceipt, TxRef,
};
pub use runtime::config::{ScanConfig, ScanConfigBuilder, ScanConfigParams};
pub use runtime::error::{AggregateQueryError, ChunkFailure, QueryError};
pub use runtime::profile::ChainProfile;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
