//! Ordered registry of backend processors.
//!
//! Prefix matching is first-match-wins, so registration order is kept as
//! a list. The registry is built once at startup and shared read-only.

use crate::identifier::unwrap_reference;
use crate::processor::Processor;
use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct Entry {
    processor: Arc<dyn Processor>,
    /// `^(urn:)?PREFIX\b`, case-insensitive.
    matcher: Regex,
}

impl Entry {
    fn matches(&self, reference: &str) -> bool {
        self.matcher.is_match(reference) || self.processor.default_prefix().is_match(reference)
    }
}

/// Registered processors in registration order.
#[derive(Default)]
pub struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor.
    ///
    /// Returns `false` when a processor with the same short name is
    /// already present; the first registration wins.
    pub fn register(&mut self, processor: Arc<dyn Processor>) -> bool {
        if self.find_processor(processor.short()).is_some() {
            debug!("processor \"{}\" already registered", processor.short());
            return false;
        }
        let pattern = format!(r"^(urn:)?{}\b", regex::escape(processor.prefix()));
        let matcher = match RegexBuilder::new(&pattern).case_insensitive(true).build() {
            Ok(re) => re,
            Err(e) => {
                warn!(
                    "processor \"{}\" has an unusable prefix {:?}: {}",
                    processor.short(),
                    processor.prefix(),
                    e
                );
                return false;
            }
        };
        info!("processor \"{}\" registered", processor.short());
        self.entries.push(Entry { processor, matcher });
        true
    }

    /// Builder-style registration.
    pub fn with(mut self, processor: Arc<dyn Processor>) -> Self {
        self.register(processor);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find a processor by its short name.
    pub fn find_processor(&self, short: &str) -> Option<Arc<dyn Processor>> {
        self.entries
            .iter()
            .find(|e| e.processor.short() == short)
            .map(|e| e.processor.clone())
    }

    /// Short names in registration order.
    pub fn supported_processors(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.processor.short()).collect()
    }

    /// Processors in registration order.
    pub fn processors(&self) -> impl Iterator<Item = &Arc<dyn Processor>> {
        self.entries.iter().map(|e| &e.processor)
    }

    /// Find a processor by its prefix, e.g. `iso` or `CN`.
    pub fn by_type(&self, type_: &str) -> Option<Arc<dyn Processor>> {
        let type_ = type_.to_uppercase();
        self.entries
            .iter()
            .find(|e| e.processor.prefix() == type_)
            .map(|e| e.processor.clone())
    }

    /// Resolve a processor from a reference's prefix.
    ///
    /// Logs and returns `None` when no processor recognises the reference.
    pub fn processor_by_ref(&self, reference: &str) -> Option<Arc<dyn Processor>> {
        let unwrapped = unwrap_reference(reference);
        let found = self
            .entries
            .iter()
            .find(|e| e.matches(unwrapped))
            .map(|e| e.processor.clone());
        if found.is_none() {
            info!(
                "({}) `{}` does not have a recognised prefix",
                reference, unwrapped
            );
        }
        found
    }

    /// Short name of the processor matching a reference.
    pub fn class_by_ref(&self, reference: &str) -> Option<String> {
        self.processor_by_ref(reference)
            .map(|p| p.short().to_string())
    }

    pub fn find_processor_by_dataset(&self, dataset: &str) -> Option<Arc<dyn Processor>> {
        self.entries
            .iter()
            .find(|e| e.processor.datasets().iter().any(|d| d == dataset))
            .map(|e| e.processor.clone())
    }

    /// Grammar hash for a cache category (the prefix subdirectory name).
    ///
    /// Categories without a registered processor hash to the empty string.
    pub fn grammar_hash_for(&self, category: &str) -> String {
        self.by_type(category)
            .map(|p| p.grammar_hash())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("processors", &self.supported_processors())
            .finish()
    }
}
