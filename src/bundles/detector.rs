//! Finds runs of consecutive transactions in one block whose receipts emit a
//! given sequence of events.
//!
//! The first signature is located with a chunked range query. Every block
//! holding a match is then resolved to its ordered transaction list and each
//! candidate start is verified against the following transactions' receipts.
//! Both phases run on bounded worker pools sized by `verify_workers`.

use crate::bundles::bundle::{Bundle, BundleTransaction};
use crate::bundles::diagnostics::{BundleReport, DiscardReason, DiscardedCandidate};
use crate::bundles::sequence::{EventSignatureSequence, SequenceStep};
use crate::processor::budget::RequestBudget;
use crate::processor::executor::RangeQueryExecutor;
use crate::processor::range::BlockRange;
use crate::processor::worker_pool::run_pool;
use crate::rpc::source::{LedgerSource, LogSource};
use crate::rpc::types::{LogEntry, TxRef};
use crate::runtime::config::ScanConfig;
use crate::runtime::error::QueryError;
use crate::runtime::telemetry::Telemetry;
use alloy_primitives::B256;
use anyhow::{bail, Result};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct BundleDetector<C> {
    source: Arc<C>,
    config: ScanConfig,
    budget: RequestBudget,
    telemetry: Arc<Telemetry>,
}

impl<C> Clone for BundleDetector<C> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            config: self.config.clone(),
            budget: self.budget.clone(),
            telemetry: self.telemetry.clone(),
        }
    }
}

/// Transactions of one block that emitted the first signature.
struct BlockWork {
    block_number: u64,
    tx_hashes: Vec<B256>,
}

#[derive(Default)]
struct BlockResolution {
    candidates: Vec<Candidate>,
    discarded: Vec<DiscardedCandidate>,
}

struct Candidate {
    block_number: u64,
    tx_hash: B256,
    start_index: u64,
    /// Sorted by index.
    transactions: Arc<Vec<TxRef>>,
}

struct DetectContext<C> {
    source: Arc<C>,
    budget: RequestBudget,
    token: CancellationToken,
    sequence: EventSignatureSequence,
}

impl<C: LedgerSource> DetectContext<C> {
    /// Runs one endpoint call under a budget permit. `None` means the token
    /// fired first.
    async fn guarded<T>(&self, call: impl Future<Output = Result<T>>) -> Option<Result<T>> {
        let _permit = self.budget.acquire(&self.token).await?;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            result = call => Some(result),
        }
    }
}

impl<C: LedgerSource + 'static> BundleDetector<C> {
    pub fn new(source: Arc<C>, config: ScanConfig) -> Self {
        let budget = RequestBudget::from_limit(config.max_in_flight());
        Self {
            source,
            config,
            budget,
            telemetry: Arc::new(Telemetry::default()),
        }
    }

    /// Shares `budget` with other executors or detectors.
    pub fn with_budget(mut self, budget: RequestBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Executor used for the first-signature query, sharing this detector's
    /// budget and telemetry.
    pub fn executor(&self) -> RangeQueryExecutor {
        let source: Arc<dyn LogSource> = self.source.clone();
        RangeQueryExecutor::with_budget(source, self.config.clone(), self.budget.clone())
            .with_telemetry(self.telemetry.clone())
    }

    /// Bundles in completion order. Use [`sort_bundles`] for a stable order.
    ///
    /// [`sort_bundles`]: crate::bundles::bundle::sort_bundles
    pub async fn detect_bundles(
        &self,
        token: &CancellationToken,
        range: BlockRange,
        sequence: &EventSignatureSequence,
    ) -> Result<Vec<Bundle>> {
        Ok(self.detect_report(token, range, sequence).await?.bundles)
    }

    #[tracing::instrument(
        name = "bundle_detection",
        skip_all,
        fields(start_block = range.start(), end_block = range.end(), steps = sequence.len())
    )]
    pub async fn detect_report(
        &self,
        token: &CancellationToken,
        range: BlockRange,
        sequence: &EventSignatureSequence,
    ) -> Result<BundleReport> {
        let started = Instant::now();
        let head_logs = self
            .executor()
            .execute(token, &sequence.head_filter(), range)
            .await?;

        let blocks = group_head_matches(sequence.head(), head_logs);
        let mut report = BundleReport {
            head_matches: blocks.iter().map(|work| work.tx_hashes.len()).sum(),
            blocks_scanned: blocks.len(),
            ..BundleReport::default()
        };
        if blocks.is_empty() {
            tracing::info!("no transaction emitted the first signature");
            return Ok(report);
        }

        let workers = self.config.verify_workers();
        let call_token = token.child_token();
        let _cancel_on_drop = call_token.clone().drop_guard();
        let ctx = Arc::new(DetectContext {
            source: self.source.clone(),
            budget: self.budget.clone(),
            token: call_token.clone(),
            sequence: sequence.clone(),
        });

        let mut candidates = Vec::new();
        let block_count = blocks.len();
        let summary = {
            let ctx = ctx.clone();
            let telemetry = &self.telemetry;
            let discarded = &mut report.discarded;
            run_pool(
                "bundle_blocks",
                blocks,
                workers.min(block_count),
                &call_token,
                move |worker_id, work| resolve_block(ctx.clone(), worker_id, work),
                |resolution: BlockResolution| {
                    candidates.extend(resolution.candidates);
                    for candidate in resolution.discarded {
                        record_discard(telemetry, discarded, candidate);
                    }
                },
            )
            .await
        };
        if summary.missing() > 0 {
            bail!(
                "{} of {} candidate blocks were lost to panicked workers",
                summary.missing(),
                summary.issued
            );
        }
        if token.is_cancelled() {
            return Err(cancelled(&report).into());
        }

        let candidate_count = candidates.len();
        if candidate_count > 0 {
            let telemetry = &self.telemetry;
            let bundles = &mut report.bundles;
            let discarded = &mut report.discarded;
            let summary = run_pool(
                "bundle_verify",
                candidates,
                workers.min(candidate_count),
                &call_token,
                move |worker_id, candidate| verify_candidate(ctx.clone(), worker_id, candidate),
                |verdict: Result<Bundle, DiscardedCandidate>| {
                    telemetry.record_candidate_verified();
                    match verdict {
                        Ok(bundle) => {
                            telemetry.record_bundle_found();
                            bundles.push(bundle);
                        }
                        Err(candidate) => record_discard(telemetry, discarded, candidate),
                    }
                },
            )
            .await;
            if summary.missing() > 0 {
                bail!(
                    "{} of {} bundle candidates were lost to panicked workers",
                    summary.missing(),
                    summary.issued
                );
            }
        }
        if token.is_cancelled() {
            return Err(cancelled(&report).into());
        }

        tracing::info!(
            head_matches = report.head_matches,
            blocks = report.blocks_scanned,
            bundles = report.bundles.len(),
            discarded = report.discarded.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "bundle detection completed"
        );
        Ok(report)
    }
}

fn group_head_matches(head: &SequenceStep, logs: Vec<LogEntry>) -> Vec<BlockWork> {
    let mut blocks: BTreeMap<u64, Vec<B256>> = BTreeMap::new();
    for log in logs
        .into_iter()
        .filter(|log| !log.removed && head.matches(log))
    {
        let hashes = blocks.entry(log.block_number).or_default();
        if !hashes.contains(&log.transaction_hash) {
            hashes.push(log.transaction_hash);
        }
    }

    blocks
        .into_iter()
        .map(|(block_number, tx_hashes)| BlockWork {
            block_number,
            tx_hashes,
        })
        .collect()
}

fn discard_block(work: &BlockWork, reason: DiscardReason) -> BlockResolution {
    BlockResolution {
        candidates: Vec::new(),
        discarded: work
            .tx_hashes
            .iter()
            .map(|hash| DiscardedCandidate {
                block_number: work.block_number,
                transaction_hash: *hash,
                start_index: None,
                reason: reason.clone(),
            })
            .collect(),
    }
}

async fn resolve_block<C: LedgerSource>(
    ctx: Arc<DetectContext<C>>,
    worker_id: usize,
    work: BlockWork,
) -> BlockResolution {
    if ctx.token.is_cancelled() {
        return discard_block(&work, DiscardReason::Cancelled);
    }

    let mut transactions = match ctx
        .guarded(ctx.source.fetch_block_transactions(work.block_number))
        .await
    {
        None => return discard_block(&work, DiscardReason::Cancelled),
        Some(Err(err)) => {
            return discard_block(
                &work,
                DiscardReason::BlockUnavailable {
                    error: format!("{err:#}"),
                },
            )
        }
        Some(Ok(transactions)) => transactions,
    };
    transactions.sort_by_key(|tx| tx.index);

    let positions: HashMap<B256, u64> = transactions
        .iter()
        .map(|tx| (tx.hash, tx.index))
        .collect();
    let transactions = Arc::new(transactions);

    let mut resolution = BlockResolution::default();
    for tx_hash in work.tx_hashes {
        match positions.get(&tx_hash) {
            Some(&start_index) => resolution.candidates.push(Candidate {
                block_number: work.block_number,
                tx_hash,
                start_index,
                transactions: transactions.clone(),
            }),
            None => resolution.discarded.push(DiscardedCandidate {
                block_number: work.block_number,
                transaction_hash: tx_hash,
                start_index: None,
                reason: DiscardReason::TransactionNotInBlock,
            }),
        }
    }

    tracing::debug!(
        worker = worker_id,
        block = work.block_number,
        transactions = transactions.len(),
        candidates = resolution.candidates.len(),
        "resolved candidate block"
    );
    resolution
}

async fn verify_candidate<C: LedgerSource>(
    ctx: Arc<DetectContext<C>>,
    worker_id: usize,
    candidate: Candidate,
) -> Result<Bundle, DiscardedCandidate> {
    let discard = |reason: DiscardReason| DiscardedCandidate {
        block_number: candidate.block_number,
        transaction_hash: candidate.tx_hash,
        start_index: Some(candidate.start_index),
        reason,
    };

    let steps = ctx.sequence.steps();
    let mut members = Vec::with_capacity(steps.len());
    for step in 0..steps.len() {
        let index = candidate.start_index.saturating_add(step as u64);
        match candidate
            .transactions
            .binary_search_by_key(&index, |tx| tx.index)
        {
            Ok(position) => members.push(candidate.transactions[position]),
            Err(_) => return Err(discard(DiscardReason::MissingTransaction { step, index })),
        }
    }

    let mut transactions = Vec::with_capacity(members.len());
    for (step_number, (step, tx)) in steps.iter().zip(members).enumerate() {
        if ctx.token.is_cancelled() {
            return Err(discard(DiscardReason::Cancelled));
        }

        let receipt = match ctx
            .guarded(ctx.source.fetch_transaction_receipt(tx.hash))
            .await
        {
            None => return Err(discard(DiscardReason::Cancelled)),
            Some(Err(err)) => {
                return Err(discard(DiscardReason::ReceiptUnavailable {
                    step: step_number,
                    tx_hash: tx.hash,
                    error: format!("{err:#}"),
                }))
            }
            Some(Ok(receipt)) => receipt,
        };

        if !receipt
            .logs
            .iter()
            .any(|log| !log.removed && step.matches(log))
        {
            return Err(discard(DiscardReason::NoMatchingLog {
                step: step_number,
                tx_hash: tx.hash,
            }));
        }

        transactions.push(BundleTransaction {
            tx,
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
        });
    }

    tracing::debug!(
        worker = worker_id,
        block = candidate.block_number,
        start_index = candidate.start_index,
        "bundle verified"
    );
    Ok(Bundle {
        block_number: candidate.block_number,
        start_index: candidate.start_index,
        transactions,
    })
}

fn record_discard(
    telemetry: &Telemetry,
    discarded: &mut Vec<DiscardedCandidate>,
    candidate: DiscardedCandidate,
) {
    telemetry.record_candidate_discarded();
    tracing::debug!(
        target: "rangelog::bundles",
        block = candidate.block_number,
        tx_hash = %candidate.transaction_hash,
        start_index = ?candidate.start_index,
        reason = candidate.reason.kind(),
        detail = %candidate.reason,
        "bundle candidate discarded"
    );
    discarded.push(candidate);
}

fn cancelled(report: &BundleReport) -> QueryError {
    let settled = report
        .discarded
        .iter()
        .filter(|candidate| candidate.reason != DiscardReason::Cancelled)
        .count();
    QueryError::Cancelled {
        completed: report.bundles.len() + settled,
        total: report.head_matches,
    }
}
