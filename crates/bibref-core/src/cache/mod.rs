//! Tiered document cache.
//!
//! A [`DbCache`] is one tier (static, local or global) rooted at a
//! directory of the process-wide [`Storage`](crate::storage::Storage).

mod db_cache;
mod entry;

pub use db_cache::{prefix, DbCache};
pub use entry::{is_not_found, not_found_value, redirect_target, redirect_value, CacheEntry};
