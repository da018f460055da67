//! In-memory ledger implementing every capability trait, for unit tests.

use crate::processor::range::BlockRange;
use crate::rpc::source::{BlockSource, LogSource, ReceiptSource};
use crate::rpc::types::{LogEntry, LogFilter, TransactionReceipt, TxRef};
use alloy_primitives::{Address, Bytes, B256};
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type ErrorFactory = Arc<dyn Fn() -> anyhow::Error + Send + Sync>;

/// Deterministic hash for the transaction at `index` of `block`.
pub(crate) fn tx_hash(block: u64, index: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&block.to_be_bytes());
    bytes[8..16].copy_from_slice(&index.to_be_bytes());
    bytes[31] = 0x01;
    B256::from(bytes)
}

#[derive(Debug, Clone)]
pub(crate) struct TestLog {
    address: Address,
    topics: Vec<B256>,
}

impl TestLog {
    pub(crate) fn new(address: Address, signature: B256) -> Self {
        Self {
            address,
            topics: vec![signature],
        }
    }
}

#[derive(Default)]
pub(crate) struct MockLedgerBuilder {
    blocks: BTreeMap<u64, Vec<Vec<TestLog>>>,
}

impl MockLedgerBuilder {
    /// Adds `block` whose transaction `i` emits `transactions[i]`.
    pub(crate) fn block(mut self, block: u64, transactions: Vec<Vec<TestLog>>) -> Self {
        self.blocks.insert(block, transactions);
        self
    }

    pub(crate) fn build(self) -> MockLedger {
        let mut logs = Vec::new();
        let mut blocks = HashMap::new();
        let mut receipts = HashMap::new();

        for (number, transactions) in self.blocks {
            let mut refs = Vec::with_capacity(transactions.len());
            let mut log_index = 0u64;
            for (index, emitted) in transactions.into_iter().enumerate() {
                let index = index as u64;
                let hash = tx_hash(number, index);
                refs.push(TxRef { hash, index });

                let tx_logs: Vec<LogEntry> = emitted
                    .into_iter()
                    .map(|log| {
                        let entry = LogEntry {
                            address: log.address,
                            topics: log.topics,
                            data: Bytes::new(),
                            block_number: number,
                            transaction_hash: hash,
                            transaction_index: index,
                            log_index,
                            removed: false,
                        };
                        log_index += 1;
                        entry
                    })
                    .collect();

                logs.extend(tx_logs.iter().cloned());
                receipts.insert(
                    hash,
                    TransactionReceipt {
                        transaction_hash: hash,
                        transaction_index: index,
                        block_number: number,
                        logs: tx_logs,
                        gas_used: 21_000 + index,
                        effective_gas_price: 1_000_000_000,
                        success: true,
                    },
                );
            }
            blocks.insert(number, refs);
        }

        MockLedger {
            logs,
            blocks: Mutex::new(blocks),
            receipts,
            latency: None,
            log_queries: Mutex::new(Vec::new()),
            log_failures: Mutex::new(HashMap::new()),
            failing_blocks: Mutex::new(HashSet::new()),
            failing_receipts: Mutex::new(HashSet::new()),
            block_calls: AtomicUsize::new(0),
            receipt_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

struct InjectedFailure {
    remaining: usize,
    make: ErrorFactory,
}

pub(crate) struct MockLedger {
    logs: Vec<LogEntry>,
    blocks: Mutex<HashMap<u64, Vec<TxRef>>>,
    receipts: HashMap<B256, TransactionReceipt>,
    latency: Option<Duration>,
    log_queries: Mutex<Vec<BlockRange>>,
    log_failures: Mutex<HashMap<BlockRange, InjectedFailure>>,
    failing_blocks: Mutex<HashSet<u64>>,
    failing_receipts: Mutex<HashSet<B256>>,
    block_calls: AtomicUsize,
    receipt_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockLedger {
    pub(crate) fn builder() -> MockLedgerBuilder {
        MockLedgerBuilder::default()
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// The next `times` log queries for exactly `range` fail.
    pub(crate) fn fail_range(&self, range: BlockRange, times: usize) {
        self.fail_range_with(range, times, || anyhow!("injected eth_getLogs failure"));
    }

    pub(crate) fn fail_range_with<F>(&self, range: BlockRange, times: usize, make: F)
    where
        F: Fn() -> anyhow::Error + Send + Sync + 'static,
    {
        self.log_failures.lock().expect("mock poisoned").insert(
            range,
            InjectedFailure {
                remaining: times,
                make: Arc::new(make),
            },
        );
    }

    pub(crate) fn fail_block(&self, block: u64) {
        self.failing_blocks.lock().expect("mock poisoned").insert(block);
    }

    pub(crate) fn fail_receipt(&self, hash: B256) {
        self.failing_receipts.lock().expect("mock poisoned").insert(hash);
    }

    /// Replaces the transaction list served for `block`.
    pub(crate) fn set_block_transactions(&self, block: u64, transactions: Vec<TxRef>) {
        self.blocks
            .lock()
            .expect("mock poisoned")
            .insert(block, transactions);
    }

    pub(crate) fn log_queries(&self) -> Vec<BlockRange> {
        self.log_queries.lock().expect("mock poisoned").clone()
    }

    pub(crate) fn log_calls_for(&self, range: BlockRange) -> usize {
        self.log_queries()
            .into_iter()
            .filter(|queried| *queried == range)
            .count()
    }

    pub(crate) fn block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn receipt_calls(&self) -> usize {
        self.receipt_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let guard = InFlightGuard(&self.in_flight);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        guard
    }

    fn injected_log_failure(&self, range: BlockRange) -> Option<anyhow::Error> {
        let mut failures = self.log_failures.lock().expect("mock poisoned");
        let failure = failures.get_mut(&range)?;
        if failure.remaining == 0 {
            return None;
        }
        failure.remaining -= 1;
        Some((failure.make)())
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl LogSource for MockLedger {
    fn fetch_logs<'a>(
        &'a self,
        range: BlockRange,
        filter: &'a LogFilter,
    ) -> BoxFuture<'a, Result<Vec<LogEntry>>> {
        Box::pin(async move {
            let _guard = self.enter().await;
            self.log_queries.lock().expect("mock poisoned").push(range);
            if let Some(err) = self.injected_log_failure(range) {
                return Err(err);
            }
            Ok(self
                .logs
                .iter()
                .filter(|log| range.contains(log.block_number) && filter.matches(log))
                .cloned()
                .collect())
        })
    }
}

impl BlockSource for MockLedger {
    fn fetch_block_transactions(&self, block_number: u64) -> BoxFuture<'_, Result<Vec<TxRef>>> {
        Box::pin(async move {
            let _guard = self.enter().await;
            self.block_calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failing_blocks
                .lock()
                .expect("mock poisoned")
                .contains(&block_number)
            {
                return Err(anyhow!("injected block {block_number} failure"));
            }
            self.blocks
                .lock()
                .expect("mock poisoned")
                .get(&block_number)
                .cloned()
                .ok_or_else(|| anyhow!("block {block_number} not found"))
        })
    }
}

impl ReceiptSource for MockLedger {
    fn fetch_transaction_receipt(
        &self,
        tx_hash: B256,
    ) -> BoxFuture<'_, Result<TransactionReceipt>> {
        Box::pin(async move {
            let _guard = self.enter().await;
            self.receipt_calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failing_receipts
                .lock()
                .expect("mock poisoned")
                .contains(&tx_hash)
            {
                return Err(anyhow!("injected receipt failure for {tx_hash}"));
            }
            self.receipts
                .get(&tx_hash)
                .cloned()
                .ok_or_else(|| anyhow!("receipt {tx_hash} not found"))
        })
    }
}
