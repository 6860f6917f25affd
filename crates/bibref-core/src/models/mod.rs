//! Data types shared by the engine and backends.

mod bibitem;
mod options;

pub use bibitem::{
    BibliographicDate, BibliographicItem, DocumentIdentifier, DocumentRelation, RelationType,
};
pub use options::FetchOptions;
