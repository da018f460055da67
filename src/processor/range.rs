//! Inclusive block ranges and the splitter that breaks them into chunks an
//! endpoint will accept in one `eth_getLogs` call.

use crate::runtime::error::QueryError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive `[start, end]` block interval. `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockRange {
    start: u64,
    end: u64,
}

impl BlockRange {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(QueryError::validation(format!(
                "from block {start} is greater than to block {end}"
            ))
            .into());
        }
        Ok(Self { start, end })
    }

    /// Builds a range from optional bounds, rejecting a missing side.
    pub fn from_bounds(start: Option<u64>, end: Option<u64>) -> Result<Self> {
        match (start, end) {
            (Some(start), Some(end)) => Self::new(start, end),
            (None, _) => Err(QueryError::validation("from block is required").into()),
            (_, None) => Err(QueryError::validation("to block is required").into()),
        }
    }

    pub fn single(block: u64) -> Self {
        Self {
            start: block,
            end: block,
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of blocks covered. Saturates for the full `u64` domain.
    pub fn len(&self) -> u64 {
        (self.end - self.start).saturating_add(1)
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, block: u64) -> bool {
        self.start <= block && block <= self.end
    }

    /// Number of chunks [`BlockRange::chunks`] yields for `chunk_size`.
    pub fn chunk_count(&self, chunk_size: u64) -> Result<usize> {
        ensure_chunk_size(chunk_size)?;
        let blocks = u128::from(self.end - self.start) + 1;
        let count = blocks.div_ceil(u128::from(chunk_size));
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    /// Lazily yields contiguous sub-ranges of at most `chunk_size` blocks.
    pub fn chunks(&self, chunk_size: u64) -> Result<RangeChunks> {
        ensure_chunk_size(chunk_size)?;
        Ok(RangeChunks {
            next: Some(self.start),
            end: self.end,
            chunk_size,
        })
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Iterator returned by [`BlockRange::chunks`].
#[derive(Debug, Clone)]
pub struct RangeChunks {
    next: Option<u64>,
    end: u64,
    chunk_size: u64,
}

impl Iterator for RangeChunks {
    type Item = BlockRange;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next?;
        let end = start.saturating_add(self.chunk_size - 1).min(self.end);
        self.next = if end == self.end { None } else { Some(end + 1) };
        Some(BlockRange { start, end })
    }
}

/// Splits `range` into ascending, non-overlapping chunks that exactly cover it.
pub fn split_range(range: BlockRange, chunk_size: u64) -> Result<Vec<BlockRange>> {
    Ok(range.chunks(chunk_size)?.collect())
}

fn ensure_chunk_size(chunk_size: u64) -> Result<()> {
    if chunk_size == 0 {
        return Err(QueryError::validation("chunk_size must be greater than 0").into());
    }
    Ok(())
}
