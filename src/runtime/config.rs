use crate::processor::backoff::RetryPolicy;
use crate::runtime::profile::ChainProfile;
use anyhow::{bail, Result};
use std::time::Duration;

/// Default block span of a single `eth_getLogs` call.
pub const DEFAULT_CHUNK_SIZE: u64 = 10_000;
pub const DEFAULT_MAX_WORKERS: usize = 5;
pub const DEFAULT_VERIFY_WORKERS: usize = 3;

/// Tuning for range queries and bundle detection.
///
/// All instances must be constructed via [`ScanConfig::builder`] or [`ScanConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    chunk_size: u64,
    max_workers: usize,
    verify_workers: usize,
    max_in_flight: Option<usize>,
    retry: RetryPolicy,
    progress_interval: Option<Duration>,
}

pub struct ScanConfigParams {
    pub chunk_size: u64,
    pub max_workers: usize,
    pub verify_workers: usize,
    pub max_in_flight: Option<usize>,
    pub retry: RetryPolicy,
    pub progress_interval: Option<Duration>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            verify_workers: DEFAULT_VERIFY_WORKERS,
            max_in_flight: None,
            retry: RetryPolicy::default(),
            progress_interval: None,
        }
    }
}

impl ScanConfig {
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    pub fn new(params: ScanConfigParams) -> Result<Self> {
        let ScanConfigParams {
            chunk_size,
            max_workers,
            verify_workers,
            max_in_flight,
            retry,
            progress_interval,
        } = params;

        let config = Self {
            chunk_size,
            max_workers,
            verify_workers,
            max_in_flight,
            retry,
            progress_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Maximum blocks per `eth_getLogs` call.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Concurrent chunk workers per range query.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Concurrent workers resolving and verifying bundle candidates.
    pub fn verify_workers(&self) -> usize {
        self.verify_workers
    }

    /// Cap on simultaneous endpoint calls across every pool. `None` is unlimited.
    pub fn max_in_flight(&self) -> Option<usize> {
        self.max_in_flight
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn progress_interval(&self) -> Option<Duration> {
        self.progress_interval
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size must be greater than 0");
        }

        if self.max_workers == 0 {
            bail!("max_workers must be greater than 0");
        }

        if self.verify_workers == 0 {
            bail!("verify_workers must be greater than 0");
        }

        if self.max_in_flight == Some(0) {
            bail!("max_in_flight must be greater than 0 when set");
        }

        if self.progress_interval.is_some_and(|interval| interval.is_zero()) {
            bail!("progress_interval must be greater than 0 when set");
        }

        self.retry.validate()
    }
}

#[derive(Debug, Default, Clone)]
pub struct ScanConfigBuilder {
    chunk_size: Option<u64>,
    max_workers: Option<usize>,
    verify_workers: Option<usize>,
    max_in_flight: Option<usize>,
    retry: Option<RetryPolicy>,
    progress_interval: Option<Duration>,
}

impl ScanConfigBuilder {
    /// Seeds chunk size and worker count from a chain profile.
    pub fn from_profile(profile: &ChainProfile) -> Self {
        Self::default()
            .chunk_size(profile.max_block_range())
            .max_workers(profile.default_workers())
    }

    pub fn chunk_size(mut self, blocks: u64) -> Self {
        self.chunk_size = Some(blocks);
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    pub fn verify_workers(mut self, workers: usize) -> Self {
        self.verify_workers = Some(workers);
        self
    }

    pub fn max_in_flight(mut self, calls: usize) -> Self {
        self.max_in_flight = Some(calls);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<ScanConfig> {
        ScanConfig::new(ScanConfigParams {
            chunk_size: self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            max_workers: self.max_workers.unwrap_or(DEFAULT_MAX_WORKERS),
            verify_workers: self.verify_workers.unwrap_or(DEFAULT_VERIFY_WORKERS),
            max_in_flight: self.max_in_flight,
            retry: self.retry.unwrap_or_default(),
            progress_interval: self.progress_interval,
        })
    }
}
