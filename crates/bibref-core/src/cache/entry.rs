//! Stored entry variants and their sentinel text forms.

use crate::config::CacheConfig;
use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

static SENTINEL_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap());
static FETCHED_ELEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<fetched>(\d{4}-\d{2}-\d{2})</fetched>").unwrap());

/// A cached value, classified by its leading sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry<'a> {
    /// Serialized record, opaque to the cache.
    Found(&'a str),
    /// Negative-cache marker carrying the date the miss was recorded.
    NotFound(Option<NaiveDate>),
    /// Alias pointing at another cache key.
    Redirect(&'a str),
}

impl<'a> CacheEntry<'a> {
    pub fn parse(value: &'a str) -> Self {
        if value.starts_with(CacheConfig::NOT_FOUND_SENTINEL) {
            let date = SENTINEL_DATE
                .find(value)
                .and_then(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").ok());
            CacheEntry::NotFound(date)
        } else if let Some(target) = redirect_target(value) {
            CacheEntry::Redirect(target)
        } else {
            CacheEntry::Found(value)
        }
    }

    /// Storage extension for this variant.
    pub fn extension(&self) -> &'static str {
        match self {
            CacheEntry::Found(_) => CacheConfig::RECORD_EXT,
            CacheEntry::NotFound(_) => CacheConfig::NOT_FOUND_EXT,
            CacheEntry::Redirect(_) => CacheConfig::REDIRECT_EXT,
        }
    }

    /// Date the entry was fetched, from the sentinel or the record's
    /// `<fetched>` element.
    pub fn fetched(&self) -> Option<NaiveDate> {
        match self {
            CacheEntry::NotFound(date) => *date,
            CacheEntry::Found(record) => FETCHED_ELEMENT
                .captures(record)
                .and_then(|c| c.get(1))
                .and_then(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").ok()),
            CacheEntry::Redirect(_) => None,
        }
    }
}

pub fn is_not_found(value: &str) -> bool {
    value.starts_with(CacheConfig::NOT_FOUND_SENTINEL)
}

/// Target key of a redirect value.
pub fn redirect_target(value: &str) -> Option<&str> {
    value
        .strip_prefix(CacheConfig::REDIRECT_SENTINEL)
        .and_then(|rest| rest.strip_prefix(' '))
        .map(str::trim)
        .filter(|target| !target.is_empty())
}

/// `not_found YYYY-MM-DD`
pub fn not_found_value(date: NaiveDate) -> String {
    format!(
        "{} {}",
        CacheConfig::NOT_FOUND_SENTINEL,
        date.format("%Y-%m-%d")
    )
}

/// `redirection TARGET`
pub fn redirect_value(target: &str) -> String {
    format!("{} {}", CacheConfig::REDIRECT_SENTINEL, target)
}
