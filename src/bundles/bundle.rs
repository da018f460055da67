use crate::rpc::types::TxRef;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleTransaction {
    pub tx: TxRef,
    pub gas_used: u64,
    pub effective_gas_price: u128,
}

/// Consecutive transactions of one block that emitted the whole sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub block_number: u64,
    pub start_index: u64,
    pub transactions: Vec<BundleTransaction>,
}

impl Bundle {
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn total_gas_used(&self) -> u64 {
        self.transactions
            .iter()
            .map(|tx| tx.gas_used)
            .fold(0, u64::saturating_add)
    }
}

/// Orders bundles by `(block_number, start_index)`.
pub fn sort_bundles(bundles: &mut [Bundle]) {
    bundles.sort_by_key(|bundle| (bundle.block_number, bundle.start_index));
}
