//! Why a candidate start did not become a bundle.

use crate::bundles::bundle::Bundle;
use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Serialized with a `kind` tag equal to [`DiscardReason::kind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscardReason {
    BlockUnavailable { error: String },
    TransactionNotInBlock,
    MissingTransaction { step: usize, index: u64 },
    ReceiptUnavailable { step: usize, tx_hash: B256, error: String },
    NoMatchingLog { step: usize, tx_hash: B256 },
    Cancelled,
}

impl DiscardReason {
    /// Short label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            DiscardReason::BlockUnavailable { .. } => "block_unavailable",
            DiscardReason::TransactionNotInBlock => "transaction_not_in_block",
            DiscardReason::MissingTransaction { .. } => "missing_transaction",
            DiscardReason::ReceiptUnavailable { .. } => "receipt_unavailable",
            DiscardReason::NoMatchingLog { .. } => "no_matching_log",
            DiscardReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::BlockUnavailable { error } => {
                write!(f, "block transactions unavailable: {error}")
            }
            DiscardReason::TransactionNotInBlock => {
                write!(f, "transaction not found in block transaction list")
            }
            DiscardReason::MissingTransaction { step, index } => {
                write!(f, "step {step}: block has no transaction at index {index}")
            }
            DiscardReason::ReceiptUnavailable {
                step,
                tx_hash,
                error,
            } => write!(f, "step {step}: receipt for {tx_hash} unavailable: {error}"),
            DiscardReason::NoMatchingLog { step, tx_hash } => {
                write!(f, "step {step}: receipt for {tx_hash} has no matching log")
            }
            DiscardReason::Cancelled => write!(f, "verification cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscardedCandidate {
    pub block_number: u64,
    pub transaction_hash: B256,
    /// Unknown when the block could not be resolved.
    pub start_index: Option<u64>,
    pub reason: DiscardReason,
}

/// Outcome of one detection run, including every discarded candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleReport {
    pub bundles: Vec<Bundle>,
    pub discarded: Vec<DiscardedCandidate>,
    /// Distinct transactions that emitted the first signature.
    pub head_matches: usize,
    pub blocks_scanned: usize,
}

impl BundleReport {
    pub fn candidates(&self) -> usize {
        self.bundles.len() + self.discarded.len()
    }

    pub fn discarded_by<'a>(
        &'a self,
        kind: &'a str,
    ) -> impl Iterator<Item = &'a DiscardedCandidate> + 'a {
        self.discarded
            .iter()
            .filter(move |candidate| candidate.reason.kind() == kind)
    }
}
