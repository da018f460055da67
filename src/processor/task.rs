use crate::processor::range::BlockRange;
use crate::rpc::types::{LogEntry, LogFilter};
use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One chunk of a range query, owned by exactly one worker at a time.
#[derive(Debug, Clone)]
pub struct QueryTask {
    pub id: usize,
    pub range: BlockRange,
    pub filter: Arc<LogFilter>,
}

/// Outcome of a [`QueryTask`]; produced once per issued task.
#[derive(Debug)]
pub struct QueryResult {
    pub task_id: usize,
    pub range: BlockRange,
    pub outcome: Result<Vec<LogEntry>>,
    pub worker_id: usize,
    pub attempts: usize,
    pub duration: Duration,
}

/// Outcome error of a chunk abandoned because its query was cancelled. The
/// aggregator turns any of these into one [`QueryError::Cancelled`] carrying
/// the real chunk counts.
///
/// [`QueryError::Cancelled`]: crate::runtime::error::QueryError::Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkCancelled;

impl fmt::Display for ChunkCancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("chunk query cancelled")
    }
}

impl std::error::Error for ChunkCancelled {}
