//! Reference parsing and cache-key construction.
//!
//! A cache key has the shape `PREFIX(CODE[:YEAR][ (all parts)])`, where
//! PREFIX names the backend and CODE is the bare reference text.

use crate::models::{FetchOptions, RelationType};
use crate::processor::Processor;
use regex::Regex;
use std::sync::LazyLock;

/// Any `WORD(inner)` wrapper around a whole reference.
static ANY_WRAPPER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w+\((.*)\)$").unwrap());

const EN_DASH: char = '\u{2013}';

/// Separator for "base + included amendment" references.
pub const DERIVED_SEPARATOR: &str = " + ";
/// Separator for "base, applied amendment" references.
pub const AMENDMENT_SEPARATOR: &str = ", ";
/// Description attached to applied-amendment relations.
pub const AMENDMENT_DESCRIPTION: &str = "amendment";
const ALL_PARTS_SUFFIX: &str = " (all parts)";

/// Trim surrounding whitespace from raw input.
pub fn normalize(reference: &str) -> &str {
    reference.trim()
}

/// Unwrap `X(inner)` to `inner`, leaving other references untouched.
///
/// Used before prefix matching so `CN(GB/T 20223)` matches on `GB/T`.
pub fn unwrap_reference(reference: &str) -> &str {
    ANY_WRAPPER
        .captures(reference)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(reference)
}

/// True for `urn:`-scheme references.
pub fn is_urn(reference: &str) -> bool {
    reference
        .get(..4)
        .map(|s| s.eq_ignore_ascii_case("urn:"))
        .unwrap_or(false)
}

/// Split `PREFIX(code)` into the processor prefix and the bare code.
///
/// En-dashes are normalized to ASCII hyphens first.
pub fn strip_id_wrapper(code: &str, processor: &dyn Processor) -> (String, String) {
    let prefix = processor.prefix().to_string();
    let code = code.replace(EN_DASH, "-");
    let inner = code
        .strip_prefix(prefix.as_str())
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.strip_suffix(')'))
        .filter(|inner| !inner.is_empty())
        .map(str::to_string);
    (prefix, inner.unwrap_or(code))
}

/// Build the cache key and the search code handed to the backend.
pub fn std_id(
    code: &str,
    year: Option<&str>,
    opts: &FetchOptions,
    processor: &dyn Processor,
) -> (String, String) {
    let (prefix, code) = strip_id_wrapper(code, processor);
    let mut ret = code.clone();
    if let Some(year) = year {
        ret.push_str(processor.year_separator());
        ret.push_str(year);
    }
    if opts.all_parts {
        ret.push_str(ALL_PARTS_SUFFIX);
    }
    (format!("{}({})", prefix, ret.trim()), code)
}

/// A reference naming a base document plus amendments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundReference<'a> {
    pub base: &'a str,
    pub amendments: Vec<&'a str>,
    /// Relation attached for each amendment.
    pub relation: RelationType,
    pub description: Option<&'static str>,
}

/// Split a compound reference, or `None` for a single document.
///
/// `" + "` takes precedence over `", "`.
pub fn split_compound(code: &str) -> Option<CompoundReference<'_>> {
    let (parts, relation, description) = {
        let parts: Vec<&str> = code.split(DERIVED_SEPARATOR).collect();
        if parts.len() > 1 {
            (parts, RelationType::DerivedFrom, None)
        } else {
            let parts: Vec<&str> = code.split(AMENDMENT_SEPARATOR).collect();
            if parts.len() > 1 {
                (parts, RelationType::Complements, Some(AMENDMENT_DESCRIPTION))
            } else {
                return None;
            }
        }
    };
    Some(CompoundReference {
        base: parts[0],
        amendments: parts[1..].to_vec(),
        relation,
        description,
    })
}
