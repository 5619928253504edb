use super::IndexerContext;
use super::types::Variation;
use crate::error::IndexError;
use crate::storage::types::{IndexRole, Table, VariationRecord};

/// Product variation sub-indexer. Rows are grouped by parent product so a
/// product update replaces all of its variations at once.
pub struct VariationIndexer {
    ctx: IndexerContext,
}

impl VariationIndexer {
    pub fn new(ctx: IndexerContext) -> Self {
        Self { ctx }
    }

    pub fn record_for(&self, variation: &Variation) -> VariationRecord {
        let searchable = format!(
            "{} {}",
            variation.sku.as_deref().unwrap_or_default(),
            variation.title
        );
        VariationRecord {
            variation_id: variation.variation_id,
            product_id: variation.product_id,
            lang: variation.lang.clone(),
            sku: variation.sku.clone(),
            title: variation.title.clone(),
            link: variation.link.clone(),
            price: variation.price,
            thumbnail_url: variation.thumbnail_url.clone(),
            terms: self.ctx.tokenizer.tokenize(&searchable),
        }
    }

    async fn variation_in(&self, variation_id: u64, lang: &str) -> Result<Option<Variation>, IndexError> {
        if let Some(variation) = self.ctx.source.variation(variation_id, lang).await? {
            return Ok(Some(variation));
        }
        let default_lang = &self.ctx.settings.default_language;
        if lang == default_lang {
            return Ok(None);
        }
        Ok(self
            .ctx
            .source
            .variation(variation_id, default_lang)
            .await?
            .map(|mut variation| {
                variation.lang = lang.to_string();
                variation
            }))
    }

    /// Indexes every variation of `product_id`.
    pub async fn insert(&self, role: IndexRole, product_id: u64, lang: Option<&str>) -> Result<usize, IndexError> {
        if !self.ctx.tables.has_table(role, Table::Variation) {
            tracing::debug!(scope = "variation", "No variation table for {}, skipping product {}", role, product_id);
            return Ok(0);
        }

        let variation_ids = self.ctx.source.variation_ids(product_id).await?;
        let mut written = 0;
        for lang in self.ctx.languages(lang) {
            for variation_id in variation_ids.iter() {
                if let Some(variation) = self.variation_in(*variation_id, &lang).await? {
                    self.ctx.tables.upsert_variation(role, self.record_for(&variation))?;
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    pub fn delete(&self, role: IndexRole, product_id: u64) -> Result<usize, IndexError> {
        if !self.ctx.tables.has_table(role, Table::Variation) {
            return Ok(0);
        }
        self.ctx.tables.delete_variations_of(role, product_id)
    }

    pub async fn update(&self, role: IndexRole, product_id: u64) -> Result<usize, IndexError> {
        self.delete(role, product_id)?;
        self.insert(role, product_id, None).await
    }
}
