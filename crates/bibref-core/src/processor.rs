//! Backend capability consumed by the engine.
//!
//! A processor knows how to query one standards body and how to
//! serialize its records. Implementations live outside this crate.

use crate::config::FetchConfig;
use crate::error::Result;
use crate::models::{BibliographicItem, FetchOptions};
use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};

#[async_trait]
pub trait Processor: Send + Sync {
    /// Registry name, e.g. `relaton_iso`.
    fn short(&self) -> &str;

    /// Reference prefix and cache subdirectory name, e.g. `ISO`.
    fn prefix(&self) -> &str;

    /// Looser pattern for bare references lacking the prefix token.
    fn default_prefix(&self) -> &Regex;

    /// Document identifier type reported by `docid_type`.
    fn idtype(&self) -> &str;

    /// Fetch a record. `Ok(None)` means the backend has no such document.
    ///
    /// Network and service failures must be reported as
    /// [`BibrefError::Request`](crate::BibrefError::Request) so they are retried.
    async fn get(
        &self,
        code: &str,
        year: Option<&str>,
        opts: &FetchOptions,
    ) -> Result<Option<BibliographicItem>>;

    /// Serialize a record into the cache's record format.
    fn serialize(&self, item: &BibliographicItem) -> String;

    fn deserialize(&self, content: &str) -> Result<BibliographicItem>;

    /// Fingerprint of the record grammar; a change invalidates cached entries.
    fn grammar_hash(&self) -> String;

    /// Preferred number of concurrent async fetches.
    fn threads(&self) -> usize {
        FetchConfig::DEFAULT_THREADS
    }

    /// Datasets this backend can bulk-fetch.
    fn datasets(&self) -> &[String] {
        &[]
    }

    /// Decode a URN into a plain reference, if this backend understands URNs.
    fn urn_to_code(&self, _urn: &str) -> Option<String> {
        None
    }

    /// Joins code and year in cache keys.
    fn year_separator(&self) -> &str {
        ":"
    }

    /// Joins a base reference and an amendment in compound references.
    fn amendment_divider(&self) -> &str {
        "/"
    }

    /// Whether compound references are split into relations.
    fn combines_documents(&self) -> bool {
        true
    }
}

/// Hex SHA-256 over grammar sources, for [`Processor::grammar_hash`].
pub fn grammar_hash_of<I, B>(parts: I) -> String
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref());
    }
    hex::encode(hasher.finalize())
}
