//! Capability traits the executor and detector depend on. The JSON-RPC client
//! implements all three; tests substitute in-memory ledgers.

use crate::processor::range::BlockRange;
use crate::rpc::types::{LogEntry, LogFilter, TransactionReceipt, TxRef};
use alloy_primitives::B256;
use anyhow::Result;
use futures::future::BoxFuture;

pub trait LogSource: Send + Sync {
    /// Logs matching `filter` emitted in `range`, in one request.
    fn fetch_logs<'a>(
        &'a self,
        range: BlockRange,
        filter: &'a LogFilter,
    ) -> BoxFuture<'a, Result<Vec<LogEntry>>>;
}

pub trait BlockSource: Send + Sync {
    /// Transaction hashes of `block_number` in execution order.
    fn fetch_block_transactions(&self, block_number: u64) -> BoxFuture<'_, Result<Vec<TxRef>>>;
}

pub trait ReceiptSource: Send + Sync {
    fn fetch_transaction_receipt(&self, tx_hash: B256)
        -> BoxFuture<'_, Result<TransactionReceipt>>;
}

/// Everything the bundle detector needs from a ledger.
pub trait LedgerSource: LogSource + BlockSource + ReceiptSource {}

impl<T> LedgerSource for T where T: LogSource + BlockSource + ReceiptSource {}
