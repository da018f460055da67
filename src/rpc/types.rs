//! Domain records exchanged with the ledger plus their JSON-RPC wire shapes.

use crate::processor::range::BlockRange;
use crate::runtime::error::QueryError;
use alloy_primitives::{Address, Bytes, B256, U256, U64};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Maximum number of topic positions an EVM log can carry.
pub const MAX_TOPICS: usize = 4;

/// One event record emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub log_index: u64,
    #[serde(default)]
    pub removed: bool,
}

impl LogEntry {
    /// Topic 0, the event signature hash for non-anonymous events.
    pub fn signature(&self) -> Option<&B256> {
        self.topics.first()
    }
}

/// Address and topic constraints evaluated with `eth_getLogs` semantics.
///
/// An empty address list matches any emitter. Each topic position holds a set
/// of accepted values; an empty set is a wildcard for that position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    addresses: Vec<Address>,
    topics: Vec<Vec<B256>>,
}

impl LogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address(mut self, address: Address) -> Self {
        if !self.addresses.contains(&address) {
            self.addresses.push(address);
        }
        self
    }

    pub fn addresses(mut self, addresses: impl IntoIterator<Item = Address>) -> Self {
        for address in addresses {
            self = self.address(address);
        }
        self
    }

    /// Restricts topic 0 to `signature`.
    pub fn event_signature(self, signature: B256) -> Self {
        self.topic(0, [signature])
    }

    /// Replaces the accepted values for topic `position`.
    pub fn topic(mut self, position: usize, values: impl IntoIterator<Item = B256>) -> Self {
        if self.topics.len() <= position {
            self.topics.resize_with(position + 1, Vec::new);
        }
        self.topics[position] = values.into_iter().collect();
        self
    }

    pub fn address_set(&self) -> &[Address] {
        &self.addresses
    }

    pub fn topic_sets(&self) -> &[Vec<B256>] {
        &self.topics
    }

    pub fn validate(&self) -> Result<()> {
        if self.topics.len() > MAX_TOPICS {
            return Err(QueryError::validation(format!(
                "log filter has {} topic positions, at most {MAX_TOPICS} are allowed",
                self.topics.len()
            ))
            .into());
        }
        Ok(())
    }

    pub fn matches(&self, log: &LogEntry) -> bool {
        if !self.addresses.is_empty() && !self.addresses.contains(&log.address) {
            return false;
        }

        self.topics
            .iter()
            .enumerate()
            .all(|(position, accepted)| match log.topics.get(position) {
                _ if accepted.is_empty() => true,
                Some(topic) => accepted.contains(topic),
                None => false,
            })
    }

    /// `eth_getLogs` filter object for `range`.
    pub fn to_rpc_filter(&self, range: BlockRange) -> Value {
        let mut filter = json!({
            "fromBlock": U64::from(range.start()),
            "toBlock": U64::from(range.end()),
        });

        if !self.addresses.is_empty() {
            filter["address"] = json!(self.addresses);
        }

        let last_constrained = self.topics.iter().rposition(|set| !set.is_empty());
        if let Some(last) = last_constrained {
            let topics: Vec<Value> = self.topics[..=last]
                .iter()
                .map(|set| match set.as_slice() {
                    [] => Value::Null,
                    values => json!(values),
                })
                .collect();
            filter["topics"] = Value::Array(topics);
        }

        filter
    }
}

/// Position of a transaction inside its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxRef {
    pub hash: B256,
    pub index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub block_number: u64,
    pub logs: Vec<LogEntry>,
    pub gas_used: u64,
    pub effective_gas_price: u128,
    pub success: bool,
}

// Wire shapes. Quantities arrive as 0x-prefixed hex strings.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    block_number: Option<U64>,
    transaction_hash: Option<B256>,
    transaction_index: Option<U64>,
    log_index: Option<U64>,
    #[serde(default)]
    removed: bool,
}

impl TryFrom<RpcLog> for LogEntry {
    type Error = anyhow::Error;

    fn try_from(log: RpcLog) -> Result<Self> {
        Ok(LogEntry {
            address: log.address,
            topics: log.topics,
            data: log.data,
            block_number: log.block_number.context("log is missing blockNumber")?.to(),
            transaction_hash: log
                .transaction_hash
                .context("log is missing transactionHash")?,
            transaction_index: log
                .transaction_index
                .context("log is missing transactionIndex")?
                .to(),
            log_index: log.log_index.context("log is missing logIndex")?.to(),
            removed: log.removed,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcBlock {
    pub number: U64,
    #[serde(default)]
    pub transactions: Vec<B256>,
}

impl RpcBlock {
    pub(crate) fn into_tx_refs(self) -> Vec<TxRef> {
        self.transactions
            .into_iter()
            .enumerate()
            .map(|(index, hash)| TxRef {
                hash,
                index: index as u64,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcReceipt {
    transaction_hash: B256,
    transaction_index: U64,
    block_number: U64,
    #[serde(default)]
    logs: Vec<RpcLog>,
    gas_used: U256,
    #[serde(default)]
    effective_gas_price: Option<U256>,
    #[serde(default)]
    status: Option<U64>,
}

impl TryFrom<RpcReceipt> for TransactionReceipt {
    type Error = anyhow::Error;

    fn try_from(receipt: RpcReceipt) -> Result<Self> {
        let logs = receipt
            .logs
            .into_iter()
            .map(LogEntry::try_from)
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("invalid log in receipt {}", receipt.transaction_hash))?;

        Ok(TransactionReceipt {
            transaction_hash: receipt.transaction_hash,
            transaction_index: receipt.transaction_index.to(),
            block_number: receipt.block_number.to(),
            logs,
            gas_used: receipt.gas_used.saturating_to(),
            effective_gas_price: receipt
                .effective_gas_price
                .map(|price| price.saturating_to())
                .unwrap_or_default(),
            success: receipt.status.map(|status| status == U64::from(1)).unwrap_or(true),
        })
    }
}
