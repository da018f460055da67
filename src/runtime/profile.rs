//! Per-chain constants: block-range limits, worker defaults and the named
//! contracts and event signatures a caller scans for.

use crate::processor::range::BlockRange;
use crate::rpc::types::LogFilter;
use alloy_primitives::{address, b256, Address, B256};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const TIMEBOOST_AUCTION: &str = "timeboost_auction";
pub const SET_EXPRESS_LANE_CONTROLLER: &str = "SetExpressLaneController";
pub const AUCTION_RESOLVED: &str = "AuctionResolved";
pub const WETH: &str = "weth";

const DEFAULT_MAX_BLOCK_RANGE: u64 = 10_000;
const DEFAULT_WORKERS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainProfile {
    name: String,
    chain_id: u64,
    max_block_range: u64,
    default_workers: usize,
    #[serde(default)]
    signatures: BTreeMap<String, B256>,
    #[serde(default)]
    addresses: BTreeMap<String, Address>,
    #[serde(default)]
    deployment_blocks: BTreeMap<String, u64>,
}

impl ChainProfile {
    /// Blank profile. Zero limits fall back to the common provider defaults.
    pub fn custom(
        name: impl Into<String>,
        chain_id: u64,
        max_block_range: u64,
        default_workers: usize,
    ) -> Self {
        Self {
            name: name.into(),
            chain_id,
            max_block_range: if max_block_range == 0 {
                DEFAULT_MAX_BLOCK_RANGE
            } else {
                max_block_range
            },
            default_workers: if default_workers == 0 {
                DEFAULT_WORKERS
            } else {
                default_workers
            },
            signatures: BTreeMap::new(),
            addresses: BTreeMap::new(),
            deployment_blocks: BTreeMap::new(),
        }
    }

    pub fn ethereum_mainnet() -> Self {
        Self::custom("ethereum", 1, DEFAULT_MAX_BLOCK_RANGE, DEFAULT_WORKERS).with_address(
            WETH,
            address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
            None,
        )
    }

    /// Arbitrum One with the timeboost express-lane auction.
    pub fn arbitrum_one() -> Self {
        Self::custom("arbitrum-one", 42161, DEFAULT_MAX_BLOCK_RANGE, DEFAULT_WORKERS)
            .with_address(
                TIMEBOOST_AUCTION,
                address!("5fcb496a31b7AE91e7c9078Ec662bd7A55cd3079"),
                Some(314_529_691),
            )
            .with_signature(
                SET_EXPRESS_LANE_CONTROLLER,
                b256!("b59adc820ca642dad493a0a6e0bdf979dcae037dea114b70d5c66b1c0b791c4b"),
            )
            .with_signature(
                AUCTION_RESOLVED,
                b256!("7f5bdabbd27a8fc572781b177055488d7c6729a2bade4f57da9d200f31c15d47"),
            )
    }

    pub fn with_signature(mut self, name: impl Into<String>, signature: B256) -> Self {
        self.signatures.insert(name.into(), signature);
        self
    }

    pub fn with_address(
        mut self,
        name: impl Into<String>,
        address: Address,
        deployed_at: Option<u64>,
    ) -> Self {
        let name = name.into();
        if let Some(block) = deployed_at {
            self.deployment_blocks.insert(name.clone(), block);
        }
        self.addresses.insert(name, address);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn max_block_range(&self) -> u64 {
        self.max_block_range
    }

    pub fn default_workers(&self) -> usize {
        self.default_workers
    }

    pub fn signature(&self, name: &str) -> Result<B256> {
        self.signatures
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("chain profile {} has no signature named {name}", self.name))
    }

    pub fn address(&self, name: &str) -> Result<Address> {
        self.addresses
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("chain profile {} has no address named {name}", self.name))
    }

    pub fn deployment_block(&self, name: &str) -> Option<u64> {
        self.deployment_blocks.get(name).copied()
    }

    /// Blocks from the contract's deployment (or genesis) through `latest`.
    pub fn history_range(&self, contract: &str, latest: u64) -> Result<BlockRange> {
        let start = self.deployment_block(contract).unwrap_or(0);
        BlockRange::new(start, latest)
    }

    /// Filter for one named event emitted by one named contract.
    pub fn event_filter(&self, contract: &str, event: &str) -> Result<LogFilter> {
        Ok(LogFilter::new()
            .address(self.address(contract)?)
            .event_signature(self.signature(event)?))
    }
}
