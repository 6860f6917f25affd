//! Full-table scans over stored records.

use super::Db;
use crate::cache::DbCache;
use crate::error::Result;
use crate::models::BibliographicItem;
use regex::RegexBuilder;
use tracing::warn;

impl Db {
    /// Every stored record matching the given filters.
    ///
    /// `text` must occur in an attribute value or element text, ignoring
    /// case. `edition` compares exactly; `year` matches the published date.
    /// The static tier is scanned first, then the global tier (or the local
    /// one when no global tier exists).
    pub fn fetch_all(
        &self,
        text: Option<&str>,
        edition: Option<&str>,
        year: Option<i32>,
    ) -> Result<Vec<BibliographicItem>> {
        let text_pattern = match text {
            Some(text) => {
                let t = regex::escape(text);
                let pattern = format!(r#"='[^']*{t}[^']*'|="[^"]*{t}[^"]*"|>[^<]*{t}[^<]*<"#);
                let re = RegexBuilder::new(&pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| crate::BibrefError::Other(e.to_string()))?;
                Some(re)
            }
            None => None,
        };

        let mut found = Vec::new();
        let tiers = [
            self.static_db.as_ref(),
            self.global_db.as_ref().or(self.local_db.as_ref()),
        ];
        for db in tiers.into_iter().flatten() {
            self.scan(db, |content| {
                text_pattern
                    .as_ref()
                    .is_none_or(|re| re.is_match(content))
            }, edition, year, &mut found)?;
        }
        Ok(found)
    }

    fn scan(
        &self,
        db: &DbCache,
        matches_text: impl Fn(&str) -> bool,
        edition: Option<&str>,
        year: Option<i32>,
        found: &mut Vec<BibliographicItem>,
    ) -> Result<()> {
        for entry in db.all()? {
            let (path, content) = entry?;
            if !matches_text(&content) {
                continue;
            }
            let category = path
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let processor = match self.registry.by_type(&category) {
                Some(p) => p,
                None => continue,
            };
            let item = match processor.deserialize(&content) {
                Ok(item) => item,
                Err(e) => {
                    warn!("Skipping unreadable record {}: {}", path.display(), e);
                    continue;
                }
            };
            let edition_ok = edition.is_none_or(|e| item.edition.as_deref() == Some(e));
            let year_ok = year.is_none_or(|y| item.published_year() == Some(y));
            if edition_ok && year_ok {
                found.push(item);
            }
        }
        Ok(())
    }
}
