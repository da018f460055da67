//! Range splitting, retrying chunk execution, and the bounded worker pool.

pub(crate) mod aggregate;
pub mod backoff;
pub mod budget;
pub mod executor;
pub mod range;
pub mod task;
pub(crate) mod worker_pool;
