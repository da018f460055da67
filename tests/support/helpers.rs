use std::time::Duration;

use alloy_primitives::{Address, B256};
use once_cell::sync::Lazy;
use rangelog::{LogEntry, RetryPolicy, ScanConfig};
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Deterministic hash for the transaction at `index` of `block`.
pub fn tx_hash(block: u64, index: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&block.to_be_bytes());
    bytes[8..16].copy_from_slice(&index.to_be_bytes());
    bytes[31] = 0xee;
    B256::from(bytes)
}

pub fn topic(tag: u8) -> B256 {
    B256::repeat_byte(tag)
}

pub fn contract(tag: u8) -> Address {
    Address::repeat_byte(tag)
}

/// Small chunks, fast backoff, and a bounded retry budget.
pub fn test_config(chunk_size: u64, workers: usize, attempts: Option<usize>) -> ScanConfig {
    let retry = match attempts {
        Some(limit) => RetryPolicy::bounded(limit),
        None => RetryPolicy::unbounded(),
    }
    .with_backoff(Duration::from_millis(2), Duration::from_millis(10));

    ScanConfig::builder()
        .chunk_size(chunk_size)
        .max_workers(workers)
        .verify_workers(workers)
        .retry(retry)
        .build()
        .expect("test config must be valid")
}

pub fn assert_ordered(logs: &[LogEntry]) {
    for window in logs.windows(2) {
        if let [lhs, rhs] = window {
            assert!(
                (lhs.block_number, lhs.log_index) < (rhs.block_number, rhs.log_index),
                "logs must be ordered by (block, log index) without duplicates"
            );
        }
    }
}
