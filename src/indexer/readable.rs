//! Readable sub-indexer: denormalized snapshots used to render results.

use super::IndexerContext;
use super::filters::FilterChain;
use super::searchable::strip_tags;
use super::source::document_or_default;
use super::types::EntitySnapshot;
use crate::error::IndexError;
use crate::storage::types::{DocType, IndexRole, ReadableRecord, Table};

const EXCERPT_WORDS: usize = 30;

pub struct ReadableIndexer {
    ctx: IndexerContext,
    filters: FilterChain<ReadableRecord>,
}

impl ReadableIndexer {
    pub fn new(ctx: IndexerContext, filters: FilterChain<ReadableRecord>) -> Self {
        Self { ctx, filters }
    }

    pub fn record_for(&self, snapshot: &EntitySnapshot) -> ReadableRecord {
        let excerpt = snapshot.excerpt.clone().or_else(|| {
            let text = strip_tags(&snapshot.content);
            let words: Vec<&str> = text.split_whitespace().take(EXCERPT_WORDS).collect();
            (!words.is_empty()).then(|| words.join(" "))
        });

        let record = ReadableRecord {
            id: snapshot.id,
            doc_type: snapshot.doc_type,
            lang: snapshot.lang.clone(),
            title: snapshot.title.clone(),
            link: snapshot.link.clone(),
            thumbnail_url: snapshot.thumbnail_url.clone(),
            price: snapshot.price,
            sku: snapshot.sku.clone(),
            excerpt,
            breadcrumbs: snapshot.breadcrumbs.clone(),
            custom: snapshot.custom.clone(),
        };
        self.filters.apply(record)
    }

    pub async fn insert(
        &self,
        role: IndexRole,
        doc_type: DocType,
        id: u64,
        lang: Option<&str>,
    ) -> Result<usize, IndexError> {
        if !self.ctx.tables.has_table(role, Table::Readable) {
            tracing::debug!(scope = "readable", "No readable table for {}, skipping {} {}", role, doc_type, id);
            return Ok(0);
        }

        let mut written = 0;
        for lang in self.ctx.languages(lang) {
            let snapshot = document_or_default(
                self.ctx.source.as_ref(),
                doc_type,
                id,
                &lang,
                &self.ctx.settings.default_language,
            )
            .await?;
            if let Some(snapshot) = snapshot {
                self.ctx.tables.upsert_readable(role, self.record_for(&snapshot))?;
                written += 1;
            }
        }
        Ok(written)
    }

    pub fn delete(&self, role: IndexRole, doc_type: DocType, id: u64) -> Result<usize, IndexError> {
        if !self.ctx.tables.has_table(role, Table::Readable) {
            return Ok(0);
        }
        self.ctx.tables.delete_readable(role, doc_type, id)
    }

    pub async fn update(&self, role: IndexRole, doc_type: DocType, id: u64) -> Result<usize, IndexError> {
        self.delete(role, doc_type, id)?;
        self.insert(role, doc_type, id, None).await
    }
}
