//! Shared fixtures: a scriptable in-memory processor and Db helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use bibref_core::{
    BibliographicDate, BibliographicItem, BibrefError, Db, DocumentIdentifier, FetchOptions,
    Processor, Registry, Result, RetryConfig,
};
use chrono::{Local, NaiveDate};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Processor answering from a script instead of the network.
///
/// Codes without a scripted answer resolve to a record whose identifier is
/// the requested code.
pub struct MockProcessor {
    short: String,
    prefix: String,
    pattern: Regex,
    grammar: String,
    threads: usize,
    delay: Duration,
    answers: Mutex<HashMap<String, Option<BibliographicItem>>>,
    transient_failures: AtomicU32,
    fail_hard: Mutex<bool>,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
    datasets: Vec<String>,
}

impl MockProcessor {
    pub fn new(short: &str, prefix: &str) -> Self {
        Self {
            short: short.to_string(),
            prefix: prefix.to_string(),
            pattern: Regex::new(&format!(r"^{}[/\s]", regex::escape(prefix))).unwrap(),
            grammar: format!("{}-grammar-1", short),
            threads: 3,
            delay: Duration::ZERO,
            answers: Mutex::new(HashMap::new()),
            transient_failures: AtomicU32::new(0),
            fail_hard: Mutex::new(false),
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            datasets: vec![format!("{}-dataset", short)],
        }
    }

    pub fn iso() -> Self {
        Self::new("relaton_iso", "ISO")
    }

    pub fn with_grammar(mut self, grammar: &str) -> Self {
        self.grammar = grammar.to_string();
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Backend has no such document.
    pub fn missing(self, code: &str) -> Self {
        self.answers.lock().unwrap().insert(code.to_string(), None);
        self
    }

    /// Backend answers `code` with `item`.
    pub fn answer(self, code: &str, item: BibliographicItem) -> Self {
        self.answers
            .lock()
            .unwrap()
            .insert(code.to_string(), Some(item));
        self
    }

    /// Fail the next `n` calls with a transient request error.
    pub fn fail_transient(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Fail every call with a non-transient error.
    pub fn fail_hard(&self, fail: bool) {
        *self.fail_hard.lock().unwrap() = fail;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn item_for(&self, code: &str) -> Option<BibliographicItem> {
        match self.answers.lock().unwrap().get(code) {
            Some(answer) => answer.clone(),
            None => Some(item(code, Some(&self.prefix))),
        }
    }
}

/// Record with a single identifier, fetched today.
pub fn item(id: &str, id_type: Option<&str>) -> BibliographicItem {
    BibliographicItem {
        fetched: Some(today()),
        ..BibliographicItem::with_docid(id, id_type)
    }
}

/// Record carrying an edition and published year as well.
pub fn dated_item(id: &str, edition: &str, published: &str) -> BibliographicItem {
    BibliographicItem {
        title: Some(format!("Title of {}", id)),
        edition: Some(edition.to_string()),
        date: vec![BibliographicDate {
            date_type: "published".to_string(),
            on: published.to_string(),
        }],
        ..item(id, Some("ISO"))
    }
}

fn capture(re: &str, content: &str) -> Option<String> {
    Regex::new(re)
        .unwrap()
        .captures(content)
        .map(|c| c[1].to_string())
}

#[async_trait]
impl Processor for MockProcessor {
    fn short(&self) -> &str {
        &self.short
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn default_prefix(&self) -> &Regex {
        &self.pattern
    }

    fn idtype(&self) -> &str {
        &self.prefix
    }

    async fn get(
        &self,
        code: &str,
        _year: Option<&str>,
        _opts: &FetchOptions,
    ) -> Result<Option<BibliographicItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        let pending = self.transient_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_failures.store(pending - 1, Ordering::SeqCst);
            return Err(BibrefError::request(&self.short, "connection reset by peer"));
        }
        if *self.fail_hard.lock().unwrap() {
            return Err(BibrefError::Other("unparseable response".to_string()));
        }
        Ok(self.item_for(code))
    }

    fn serialize(&self, item: &BibliographicItem) -> String {
        let mut xml = String::from("<bibitem>");
        if let Some(fetched) = item.fetched {
            xml.push_str(&format!("<fetched>{}</fetched>", fetched.format("%Y-%m-%d")));
        }
        for docid in &item.docidentifier {
            xml.push_str(&format!(
                "<docidentifier type=\"{}\">{}</docidentifier>",
                docid.id_type.as_deref().unwrap_or_default(),
                docid.id
            ));
        }
        if let Some(title) = &item.title {
            xml.push_str(&format!("<title>{}</title>", title));
        }
        if let Some(edition) = &item.edition {
            xml.push_str(&format!("<edition>{}</edition>", edition));
        }
        for date in &item.date {
            xml.push_str(&format!("<date type=\"{}\"><on>{}</on></date>", date.date_type, date.on));
        }
        xml.push_str("</bibitem>");
        xml
    }

    fn deserialize(&self, content: &str) -> Result<BibliographicItem> {
        if !content.starts_with("<bibitem>") {
            return Err(BibrefError::Other(format!("not a bibitem: {}", content)));
        }
        let docidentifier = Regex::new(r#"<docidentifier type="([^"]*)">([^<]*)</docidentifier>"#)
            .unwrap()
            .captures_iter(content)
            .map(|c| DocumentIdentifier::new(&c[2], Some(&c[1]).filter(|t| !t.is_empty())))
            .collect();
        let date = Regex::new(r#"<date type="([^"]*)"><on>([^<]*)</on></date>"#)
            .unwrap()
            .captures_iter(content)
            .map(|c| BibliographicDate {
                date_type: c[1].to_string(),
                on: c[2].to_string(),
            })
            .collect();
        Ok(BibliographicItem {
            docidentifier,
            title: capture(r"<title>([^<]*)</title>", content),
            edition: capture(r"<edition>([^<]*)</edition>", content),
            date,
            fetched: capture(r"<fetched>([^<]*)</fetched>", content)
                .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            ..Default::default()
        })
    }

    fn grammar_hash(&self) -> String {
        self.grammar.clone()
    }

    fn threads(&self) -> usize {
        self.threads
    }

    fn datasets(&self) -> &[String] {
        &self.datasets
    }

    fn urn_to_code(&self, urn: &str) -> Option<String> {
        let rest = urn.strip_prefix("urn:iso:std:iso:")?;
        Some(format!("ISO {}", rest.replace(":-", "-").trim_end_matches(':')))
    }
}

pub fn registry_with(processors: Vec<Arc<MockProcessor>>) -> Arc<Registry> {
    let mut registry = Registry::new();
    for processor in processors {
        registry.register(processor);
    }
    Arc::new(registry)
}

fn no_backoff() -> RetryConfig {
    RetryConfig::new()
        .with_base_delay(Duration::ZERO)
        .with_jitter(false)
}

/// Db with only a global tier at `dir`.
pub fn global_db(registry: Arc<Registry>, dir: &Path) -> Db {
    Db::builder(registry)
        .global_cache(dir)
        .retry_config(no_backoff())
        .build()
        .unwrap()
}

/// Db with both writable tiers.
pub fn tiered_db(registry: Arc<Registry>, global: &Path, local: &Path) -> Db {
    Db::builder(registry)
        .global_cache(global)
        .local_cache(local)
        .retry_config(no_backoff())
        .build()
        .unwrap()
}
