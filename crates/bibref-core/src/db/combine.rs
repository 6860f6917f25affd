//! Compound references such as `ISO 19115-1 + Amd 1` or
//! `IEC 60027-1, Amd 1, Amd 2`.
//!
//! The result is a synthetic record identified by the full compound string,
//! related to the base document (`updates`) and to each amendment found.
//! Combined records are never cached themselves; their parts are.

use super::Db;
use crate::error::Result;
use crate::identifier::CompoundReference;
use crate::models::{BibliographicItem, FetchOptions, RelationType};
use crate::processor::Processor;
use tracing::debug;

impl Db {
    pub(crate) async fn combine_doc(
        &self,
        code: &str,
        compound: CompoundReference<'_>,
        year: Option<&str>,
        opts: &FetchOptions,
        processor: &dyn Processor,
    ) -> Result<BibliographicItem> {
        let mut doc = BibliographicItem::with_docid(code, None);

        if let Some(base) = self
            .check_bibliocache(compound.base, year, opts, processor)
            .await?
        {
            doc.add_relation(RelationType::Updates, None, base);
        }

        let divider = processor.amendment_divider();
        for amendment in &compound.amendments {
            let reference = format!("{}{}{}", compound.base, divider, amendment);
            match self
                .check_bibliocache(&reference, year, opts, processor)
                .await?
            {
                Some(item) => doc.add_relation(compound.relation, compound.description, item),
                None => debug!("({}) part {} not found, skipped", code, reference),
            }
        }
        Ok(doc)
    }
}
