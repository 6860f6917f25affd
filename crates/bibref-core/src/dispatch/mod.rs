//! Backend call scheduling: retries for every fetch, and per-backend
//! worker pools for asynchronous fetches.

mod pool;
mod queue;
mod retry;

pub use pool::WorkersPool;
pub use queue::FetchCallback;
pub use retry::{net_retry, retry_async, RetryConfig, RetryStats};

pub(crate) use queue::FetchQueues;
