//! Bibref Core - resolve standards-document references to bibliographic
//! records, with a tiered on-disk cache.
//!
//! Backends ("processors") that know how to query a standards body are
//! supplied by the host through the [`Processor`] trait and registered in a
//! [`Registry`]. A [`Db`] picks the processor by reference prefix, serves
//! repeat lookups from the static, local or global cache tier, and writes
//! new results back.
//!
//! # Example
//!
//! ```rust,ignore
//! use bibref_core::{init_bib_caches, FetchOptions, Registry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> bibref_core::Result<()> {
//!     let registry = Registry::new().with(Arc::new(MyIsoProcessor::new()));
//!     let db = init_bib_caches(Arc::new(registry), true, Some(""), false)?;
//!
//!     if let Some(item) = db.fetch("ISO 19115-1", None, &FetchOptions::default()).await? {
//!         println!("{:?}", item.primary_id());
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod identifier;
pub mod models;
pub mod processor;
pub mod registry;
pub mod storage;

// Re-export commonly used types
pub use cache::{CacheEntry, DbCache};
pub use config::{CacheConfig, FetchConfig, PathsConfig, Settings, StorageMode};
pub use db::{init_bib_caches, CacheTier, Db, DbBuilder};
pub use dispatch::{FetchCallback, RetryConfig, WorkersPool};
pub use error::{BibrefError, Result};
pub use models::{
    BibliographicDate, BibliographicItem, DocumentIdentifier, DocumentRelation, FetchOptions,
    RelationType,
};
pub use processor::{grammar_hash_of, Processor};
pub use registry::Registry;
pub use storage::{FileStorage, MemoryObjectStore, ObjectStorage, ObjectStoreClient, Storage};
