//! Single-owner merge of chunk results into the executor's final answer.

use crate::processor::range::BlockRange;
use crate::processor::task::{ChunkCancelled, QueryResult};
use crate::processor::worker_pool::PoolSummary;
use crate::rpc::types::LogEntry;
use crate::runtime::error::{AggregateQueryError, ChunkFailure, QueryError};
use anyhow::{anyhow, Result};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub(crate) struct ResultAggregator {
    logs: Vec<LogEntry>,
    failures: Vec<ChunkFailure>,
    reported: HashSet<BlockRange>,
    succeeded: usize,
    cancelled: usize,
}

impl ResultAggregator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, result: QueryResult) {
        self.reported.insert(result.range);
        tracing::trace!(
            task = result.task_id,
            worker = result.worker_id,
            range = %result.range,
            elapsed_ms = result.duration.as_millis() as u64,
            ok = result.outcome.is_ok(),
            "chunk result received"
        );

        match result.outcome {
            Ok(logs) => {
                self.succeeded += 1;
                self.logs.extend(logs);
            }
            Err(err) if err.is::<ChunkCancelled>() => self.cancelled += 1,
            Err(cause) => self.failures.push(ChunkFailure {
                range: result.range,
                worker_id: Some(result.worker_id),
                attempts: result.attempts,
                cause,
            }),
        }
    }

    pub(crate) fn succeeded(&self) -> usize {
        self.succeeded
    }

    /// Merged logs ordered by `(block_number, log_index)` when every chunk of
    /// `range` succeeded; otherwise the cancellation or aggregate error.
    pub(crate) fn finish(
        mut self,
        range: BlockRange,
        chunk_size: u64,
        summary: PoolSummary,
        token: &CancellationToken,
    ) -> Result<Vec<LogEntry>> {
        let total = range.chunk_count(chunk_size)?;

        if token.is_cancelled() || self.cancelled > 0 {
            return Err(QueryError::Cancelled {
                completed: self.succeeded,
                total,
            }
            .into());
        }

        if self.reported.len() < total {
            tracing::error!(
                issued = summary.issued,
                delivered = summary.delivered,
                panicked_workers = summary.panicked_workers,
                total,
                "chunks finished without a result"
            );
            for chunk in range.chunks(chunk_size)? {
                if !self.reported.contains(&chunk) {
                    self.failures.push(ChunkFailure {
                        range: chunk,
                        worker_id: None,
                        attempts: 0,
                        cause: anyhow!("no result was reported for this chunk"),
                    });
                }
            }
        }

        if !self.failures.is_empty() {
            return Err(QueryError::from(AggregateQueryError::new(self.failures, total)).into());
        }

        self.logs
            .sort_by_key(|log| (log.block_number, log.log_index));
        Ok(self.logs)
    }
}
