//! Searchable sub-indexer: the inverted term → document wordlist.

use super::IndexerContext;
use super::source::document_or_default;
use super::types::{EntitySnapshot, weights};
use crate::error::IndexError;
use crate::storage::types::{DocType, IndexRole, Table, WordlistEntry};

use std::collections::{BTreeMap, HashSet};

pub struct SearchableIndexer {
    ctx: IndexerContext,
}

impl SearchableIndexer {
    pub fn new(ctx: IndexerContext) -> Self {
        Self { ctx }
    }

    /// Wordlist rows of one document version.
    ///
    /// `hit_count` is the number of fields containing the term, `field_weight` the
    /// highest weight among them.
    pub fn terms_for(&self, snapshot: &EntitySnapshot) -> Vec<WordlistEntry> {
        let mut fields: Vec<(u32, String)> = vec![(weights::TITLE, snapshot.title.clone())];
        if let Some(sku) = &snapshot.sku {
            fields.push((weights::SKU, sku.clone()));
        }
        for names in snapshot.terms.values() {
            fields.push((weights::TERMS, names.join(" ")));
        }
        if let Some(excerpt) = &snapshot.excerpt {
            fields.push((weights::EXCERPT, strip_tags(excerpt)));
        }
        fields.push((weights::CONTENT, strip_tags(&snapshot.content)));
        for value in snapshot.custom.values() {
            fields.push((weights::CUSTOM, value.clone()));
        }

        let mut stats: BTreeMap<String, (u32, u32)> = BTreeMap::new();
        for (weight, text) in fields {
            let unique: HashSet<String> = self.ctx.tokenizer.tokenize(&text).into_iter().collect();
            for term in unique {
                let entry = stats.entry(term).or_insert((0, 0));
                entry.0 = entry.0.max(weight);
                entry.1 += 1;
            }
        }

        stats
            .into_iter()
            .map(|(term, (field_weight, hit_count))| WordlistEntry {
                term,
                lang: snapshot.lang.clone(),
                doc_type: snapshot.doc_type,
                doc_id: snapshot.id,
                field_weight,
                hit_count,
            })
            .collect()
    }

    /// Indexes `id` in `lang`, or in every configured language. Returns the rows written.
    pub async fn insert(
        &self,
        role: IndexRole,
        doc_type: DocType,
        id: u64,
        lang: Option<&str>,
    ) -> Result<usize, IndexError> {
        if !self.ctx.tables.has_table(role, Table::Wordlist) {
            tracing::debug!(scope = "searchable", "No wordlist table for {}, skipping {} {}", role, doc_type, id);
            return Ok(0);
        }

        let mut written = 0;
        for lang in self.ctx.languages(lang) {
            let Some(snapshot) = document_or_default(
                self.ctx.source.as_ref(),
                doc_type,
                id,
                &lang,
                &self.ctx.settings.default_language,
            )
            .await?
            else {
                tracing::debug!(scope = "searchable", "{} {} has no {} version", doc_type, id, lang);
                continue;
            };

            let entries = self.terms_for(&snapshot);
            written += entries.len();
            self.ctx.tables.insert_terms(role, entries)?;
        }
        Ok(written)
    }

    pub fn delete(&self, role: IndexRole, doc_type: DocType, id: u64) -> Result<usize, IndexError> {
        if !self.ctx.tables.has_table(role, Table::Wordlist) {
            return Ok(0);
        }
        self.ctx.tables.delete_terms(role, doc_type, id, None)
    }

    pub async fn update(&self, role: IndexRole, doc_type: DocType, id: u64) -> Result<usize, IndexError> {
        self.delete(role, doc_type, id)?;
        self.insert(role, doc_type, id, None).await
    }
}

/// Drops `<...>` markup, keeping the text between tags.
pub(crate) fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    text
}
