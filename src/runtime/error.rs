//! Error taxonomy shared by the range executor and the bundle detector.
//!
//! Public entry points return `anyhow::Result`; callers recover the typed
//! variants below with `err.downcast_ref::<QueryError>()`.

use crate::processor::range::BlockRange;
use std::fmt;

#[derive(Debug)]
pub enum QueryError {
    /// Malformed range, filter, sequence, or configuration. Never retried.
    Validation { reason: String },
    /// The governing cancellation token fired before the call finished.
    Cancelled { completed: usize, total: usize },
    /// At least one chunk failed permanently.
    Aggregate(AggregateQueryError),
}

impl QueryError {
    pub fn validation(reason: impl Into<String>) -> Self {
        QueryError::Validation {
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled { .. })
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Validation { reason } => write!(f, "invalid query: {reason}"),
            QueryError::Cancelled { completed, total } => write!(
                f,
                "query cancelled after {completed}/{total} chunks completed"
            ),
            QueryError::Aggregate(inner) => inner.fmt(f),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<AggregateQueryError> for QueryError {
    fn from(value: AggregateQueryError) -> Self {
        QueryError::Aggregate(value)
    }
}

/// One chunk that exhausted its retry policy (or failed permanently).
#[derive(Debug)]
pub struct ChunkFailure {
    pub range: BlockRange,
    /// `None` when no worker ever reported on the chunk.
    pub worker_id: Option<usize>,
    pub attempts: usize,
    pub cause: anyhow::Error,
}

impl fmt::Display for ChunkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.worker_id {
            Some(worker_id) => write!(
                f,
                "chunk {} failed (worker {worker_id}, {} attempt{}): {:#}",
                self.range,
                self.attempts,
                if self.attempts == 1 { "" } else { "s" },
                self.cause
            ),
            None => write!(f, "chunk {} failed: {:#}", self.range, self.cause),
        }
    }
}

/// Every failing chunk of a range query, reported together.
#[derive(Debug)]
pub struct AggregateQueryError {
    failures: Vec<ChunkFailure>,
    total_chunks: usize,
}

impl AggregateQueryError {
    pub(crate) fn new(mut failures: Vec<ChunkFailure>, total_chunks: usize) -> Self {
        failures.sort_by_key(|failure| failure.range);
        Self {
            failures,
            total_chunks,
        }
    }

    /// Failing chunks ordered by block range.
    pub fn failures(&self) -> &[ChunkFailure] {
        &self.failures
    }

    pub fn failed_ranges(&self) -> Vec<BlockRange> {
        self.failures.iter().map(|failure| failure.range).collect()
    }

    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    pub fn successful_chunks(&self) -> usize {
        self.total_chunks.saturating_sub(self.failures.len())
    }
}

impl fmt::Display for AggregateQueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "query completed with {}/{} chunks successful",
            self.successful_chunks(),
            self.total_chunks
        )?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateQueryError {}
