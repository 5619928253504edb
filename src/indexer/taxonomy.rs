//! Taxonomy sub-indexer: category/tag term snapshots.

use super::IndexerContext;
use super::types::TaxonomyTerm;
use crate::error::IndexError;
use crate::storage::types::{IndexRole, Table, TaxonomyRecord};

pub struct TaxonomyIndexer {
    ctx: IndexerContext,
}

impl TaxonomyIndexer {
    pub fn new(ctx: IndexerContext) -> Self {
        Self { ctx }
    }

    pub fn record_for(&self, term: &TaxonomyTerm) -> TaxonomyRecord {
        let mut breadcrumbs = term.parents.clone();
        breadcrumbs.push(term.name.clone());
        TaxonomyRecord {
            term_id: term.term_id,
            taxonomy: term.taxonomy.clone(),
            lang: term.lang.clone(),
            name: term.name.clone(),
            link: term.link.clone(),
            image_url: term.image_url.clone(),
            count: term.count,
            breadcrumbs,
            terms: self.ctx.tokenizer.tokenize(&term.name),
        }
    }

    async fn term_in(&self, taxonomy: &str, term_id: u64, lang: &str) -> Result<Option<TaxonomyTerm>, IndexError> {
        if let Some(term) = self.ctx.source.term(taxonomy, term_id, lang).await? {
            return Ok(Some(term));
        }
        let default_lang = &self.ctx.settings.default_language;
        if lang == default_lang {
            return Ok(None);
        }
        Ok(self
            .ctx
            .source
            .term(taxonomy, term_id, default_lang)
            .await?
            .map(|mut term| {
                term.lang = lang.to_string();
                term
            }))
    }

    pub async fn insert(
        &self,
        role: IndexRole,
        taxonomy: &str,
        term_id: u64,
        lang: Option<&str>,
    ) -> Result<usize, IndexError> {
        if !self.ctx.tables.has_table(role, Table::Taxonomy) {
            tracing::debug!(scope = "taxonomy", "No taxonomy table for {}, skipping {} {}", role, taxonomy, term_id);
            return Ok(0);
        }

        let mut written = 0;
        for lang in self.ctx.languages(lang) {
            if let Some(term) = self.term_in(taxonomy, term_id, &lang).await? {
                self.ctx.tables.upsert_taxonomy(role, self.record_for(&term))?;
                written += 1;
            }
        }
        Ok(written)
    }

    pub fn delete(&self, role: IndexRole, taxonomy: &str, term_id: u64) -> Result<usize, IndexError> {
        if !self.ctx.tables.has_table(role, Table::Taxonomy) {
            return Ok(0);
        }
        self.ctx.tables.delete_taxonomy(role, taxonomy, term_id)
    }

    pub async fn update(&self, role: IndexRole, taxonomy: &str, term_id: u64) -> Result<usize, IndexError> {
        self.delete(role, taxonomy, term_id)?;
        self.insert(role, taxonomy, term_id, None).await
    }
}
