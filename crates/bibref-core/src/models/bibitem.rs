//! Bibliographic record shared between the engine and backends.
//!
//! Backends own the serialized form; the engine only reads the primary
//! identifier, relations, edition and published date.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A document identifier such as `ISO 19115-1:2014`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentIdentifier {
    pub id: String,
    /// Identifier scheme, e.g. "ISO" or "IETF".
    #[serde(rename = "type")]
    pub id_type: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

impl DocumentIdentifier {
    pub fn new(id: impl Into<String>, id_type: Option<&str>) -> Self {
        Self {
            id: id.into(),
            id_type: id_type.map(str::to_string),
            primary: false,
        }
    }
}

/// A dated event in a document's life.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BibliographicDate {
    /// Event kind, e.g. "published".
    #[serde(rename = "type")]
    pub date_type: String,
    /// Free-form date, `YYYY`, `YYYY-MM` or `YYYY-MM-DD`.
    pub on: String,
}

impl BibliographicDate {
    /// Leading four-digit year of `on`, if present.
    pub fn year(&self) -> Option<i32> {
        self.on.get(..4).and_then(|y| y.parse().ok())
    }
}

/// How a related document connects to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationType {
    Updates,
    DerivedFrom,
    Complements,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Updates => "updates",
            RelationType::DerivedFrom => "derivedFrom",
            RelationType::Complements => "complements",
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRelation {
    #[serde(rename = "type")]
    pub relation_type: RelationType,
    pub description: Option<String>,
    pub bibitem: BibliographicItem,
}

/// A bibliographic item as produced by a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BibliographicItem {
    /// Anchor id, e.g. `ISO19115-1`.
    pub id: Option<String>,
    #[serde(default)]
    pub docidentifier: Vec<DocumentIdentifier>,
    pub title: Option<String>,
    pub edition: Option<String>,
    #[serde(default)]
    pub date: Vec<BibliographicDate>,
    /// When the backend fetched this record.
    pub fetched: Option<NaiveDate>,
    #[serde(default)]
    pub relation: Vec<DocumentRelation>,
}

impl BibliographicItem {
    /// Item carrying only a single identifier.
    pub fn with_docid(id: impl Into<String>, id_type: Option<&str>) -> Self {
        Self {
            docidentifier: vec![DocumentIdentifier::new(id, id_type)],
            ..Default::default()
        }
    }

    /// The identifier used for cache keys and redirects.
    ///
    /// Prefers an identifier flagged `primary`, falling back to the first.
    pub fn primary_id(&self) -> Option<&str> {
        self.docidentifier
            .iter()
            .find(|d| d.primary)
            .or_else(|| self.docidentifier.first())
            .map(|d| d.id.as_str())
    }

    /// Year of the `published` date, if any.
    pub fn published_year(&self) -> Option<i32> {
        self.date
            .iter()
            .find(|d| d.date_type == "published")
            .and_then(BibliographicDate::year)
    }

    pub fn add_relation(
        &mut self,
        relation_type: RelationType,
        description: Option<&str>,
        bibitem: BibliographicItem,
    ) {
        self.relation.push(DocumentRelation {
            relation_type,
            description: description.map(str::to_string),
            bibitem,
        });
    }
}
