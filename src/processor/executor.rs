//! Chunked, concurrent `eth_getLogs` execution over arbitrarily large block
//! ranges.

use crate::processor::aggregate::ResultAggregator;
use crate::processor::backoff::{retry_with_backoff, RetryDisposition, RetryOutcome, RetryPolicy};
use crate::processor::budget::RequestBudget;
use crate::processor::range::BlockRange;
use crate::processor::task::{ChunkCancelled, QueryResult, QueryTask};
use crate::processor::worker_pool::{run_pool, PoolSummary};
use crate::rpc::client::RpcError;
use crate::rpc::source::LogSource;
use crate::rpc::types::{LogEntry, LogFilter};
use crate::runtime::config::ScanConfig;
use crate::runtime::error::QueryError;
use crate::runtime::telemetry::{spawn_progress_reporter, Telemetry};
use anyhow::Result;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Splits a block range into chunks and fetches them on a bounded worker pool.
///
/// Every chunk is retried according to the configured [`RetryPolicy`]. The call
/// returns all logs only when every chunk succeeded; otherwise it returns a
/// [`QueryError`] describing the cancellation or every failing chunk.
#[derive(Clone)]
pub struct RangeQueryExecutor {
    source: Arc<dyn LogSource>,
    config: ScanConfig,
    budget: RequestBudget,
    telemetry: Arc<Telemetry>,
}

struct ChunkContext {
    source: Arc<dyn LogSource>,
    retry: RetryPolicy,
    budget: RequestBudget,
    telemetry: Arc<Telemetry>,
    token: CancellationToken,
}

impl RangeQueryExecutor {
    pub fn new(source: Arc<dyn LogSource>, config: ScanConfig) -> Self {
        let budget = RequestBudget::from_limit(config.max_in_flight());
        Self::with_budget(source, config, budget)
    }

    /// Shares `budget` with other executors or detectors.
    pub fn with_budget(source: Arc<dyn LogSource>, config: ScanConfig, budget: RequestBudget) -> Self {
        Self {
            source,
            config,
            budget,
            telemetry: Arc::new(Telemetry::default()),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn budget(&self) -> &RequestBudget {
        &self.budget
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Fetches every log matching `filter` in `range` using the configured
    /// chunk size and worker count.
    pub async fn execute(
        &self,
        token: &CancellationToken,
        filter: &LogFilter,
        range: BlockRange,
    ) -> Result<Vec<LogEntry>> {
        self.execute_with(
            token,
            filter,
            range,
            self.config.chunk_size(),
            self.config.max_workers(),
        )
        .await
    }

    #[tracing::instrument(
        name = "range_query",
        skip_all,
        fields(
            start_block = range.start(),
            end_block = range.end(),
            chunk_size = chunk_size,
            max_workers = max_workers
        )
    )]
    pub async fn execute_with(
        &self,
        token: &CancellationToken,
        filter: &LogFilter,
        range: BlockRange,
        chunk_size: u64,
        max_workers: usize,
    ) -> Result<Vec<LogEntry>> {
        if max_workers == 0 {
            return Err(QueryError::validation("max_workers must be greater than 0").into());
        }
        filter.validate()?;
        let total = range.chunk_count(chunk_size)?;

        if token.is_cancelled() {
            return Err(QueryError::Cancelled {
                completed: 0,
                total,
            }
            .into());
        }

        let started = Instant::now();
        // Fires when the caller cancels or drops this call, so no worker or
        // reporter outlives it.
        let call_token = token.child_token();
        let _cancel_on_drop = call_token.clone().drop_guard();

        let filter = Arc::new(filter.clone());
        let context = Arc::new(ChunkContext {
            source: self.source.clone(),
            retry: *self.config.retry(),
            budget: self.budget.clone(),
            telemetry: self.telemetry.clone(),
            token: call_token.clone(),
        });

        let reporter = self.config.progress_interval().map(|interval| {
            let stop = call_token.child_token();
            let handle = spawn_progress_reporter(self.telemetry.clone(), stop.clone(), interval);
            (handle, stop.drop_guard())
        });

        let mut aggregator = ResultAggregator::new();
        let summary = if total == 1 {
            let task = QueryTask {
                id: 0,
                range,
                filter,
            };
            aggregator.record(run_chunk(context, 0, task).await);
            PoolSummary {
                issued: 1,
                delivered: 1,
                panicked_workers: 0,
            }
        } else {
            let tasks = range
                .chunks(chunk_size)?
                .enumerate()
                .map(move |(id, range)| QueryTask {
                    id,
                    range,
                    filter: filter.clone(),
                });
            run_pool(
                "range_query",
                tasks,
                max_workers.min(total),
                &call_token,
                move |worker_id, task| run_chunk(context.clone(), worker_id, task),
                |result| aggregator.record(result),
            )
            .await
        };

        if let Some((handle, stop)) = reporter {
            drop(stop);
            let _ = handle.await;
        }

        let succeeded = aggregator.succeeded();
        let outcome = aggregator.finish(range, chunk_size, summary, token);
        match &outcome {
            Ok(logs) => tracing::info!(
                chunks = total,
                logs = logs.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "range query completed"
            ),
            Err(err) => tracing::warn!(
                chunks = total,
                succeeded,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %err,
                "range query failed"
            ),
        }
        outcome
    }
}

async fn run_chunk(ctx: Arc<ChunkContext>, worker_id: usize, task: QueryTask) -> QueryResult {
    let started = Instant::now();
    let range = task.range;

    let outcome = retry_with_backoff(
        &ctx.retry,
        &ctx.token,
        |_| {
            let ctx = ctx.clone();
            let filter = task.filter.clone();
            async move {
                let Some(_permit) = ctx.budget.acquire(&ctx.token).await else {
                    return Err(ChunkCancelled.into());
                };
                ctx.source.fetch_logs(range, &filter).await
            }
        },
        |attempt, backoff, err| {
            ctx.telemetry.record_chunk_retry();
            tracing::warn!(
                worker = worker_id,
                start_block = range.start(),
                end_block = range.end(),
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "chunk query failed, retrying"
            );
        },
        |err| classify_chunk_error(&ctx.retry, err),
    )
    .await;

    let (outcome, attempts) = match outcome {
        RetryOutcome::Success { value, attempts } => {
            ctx.telemetry.record_chunk_completed(value.len() as u64);
            tracing::debug!(
                worker = worker_id,
                start_block = range.start(),
                end_block = range.end(),
                logs = value.len(),
                attempts,
                "chunk query completed"
            );
            (Ok(value), attempts)
        }
        RetryOutcome::Failed { error, attempts } => {
            ctx.telemetry.record_chunk_failure();
            tracing::warn!(
                worker = worker_id,
                start_block = range.start(),
                end_block = range.end(),
                attempts,
                error = %error,
                "chunk query gave up"
            );
            (Err(error), attempts)
        }
        RetryOutcome::Cancelled { attempts } => (Err(ChunkCancelled.into()), attempts),
    };

    QueryResult {
        task_id: task.id,
        range,
        outcome,
        worker_id,
        attempts,
        duration: started.elapsed(),
    }
}

fn classify_chunk_error(policy: &RetryPolicy, err: &anyhow::Error) -> RetryDisposition {
    if policy.aborts_on_permanent()
        && err
            .downcast_ref::<RpcError>()
            .is_some_and(RpcError::is_permanent)
    {
        return RetryDisposition::Abort;
    }
    if err.is::<ChunkCancelled>() || err.is::<QueryError>() {
        return RetryDisposition::Abort;
    }
    RetryDisposition::Retry
}
