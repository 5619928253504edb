use super::IndexerContext;
use super::types::Vendor;
use crate::error::IndexError;
use crate::storage::types::{IndexRole, Table, VendorRecord};

/// Marketplace vendor sub-indexer.
pub struct VendorIndexer {
    ctx: IndexerContext,
}

impl VendorIndexer {
    pub fn new(ctx: IndexerContext) -> Self {
        Self { ctx }
    }

    pub fn record_for(&self, vendor: &Vendor) -> VendorRecord {
        VendorRecord {
            vendor_id: vendor.vendor_id,
            lang: vendor.lang.clone(),
            name: vendor.name.clone(),
            link: vendor.link.clone(),
            logo_url: vendor.logo_url.clone(),
            description: vendor.description.clone(),
            terms: self.ctx.tokenizer.tokenize(&vendor.name),
        }
    }

    async fn vendor_in(&self, vendor_id: u64, lang: &str) -> Result<Option<Vendor>, IndexError> {
        if let Some(vendor) = self.ctx.source.vendor(vendor_id, lang).await? {
            return Ok(Some(vendor));
        }
        let default_lang = &self.ctx.settings.default_language;
        if lang == default_lang {
            return Ok(None);
        }
        Ok(self
            .ctx
            .source
            .vendor(vendor_id, default_lang)
            .await?
            .map(|mut vendor| {
                vendor.lang = lang.to_string();
                vendor
            }))
    }

    pub async fn insert(&self, role: IndexRole, vendor_id: u64, lang: Option<&str>) -> Result<usize, IndexError> {
        if !self.ctx.tables.has_table(role, Table::Vendor) {
            tracing::debug!(scope = "vendor", "No vendor table for {}, skipping {}", role, vendor_id);
            return Ok(0);
        }

        let mut written = 0;
        for lang in self.ctx.languages(lang) {
            if let Some(vendor) = self.vendor_in(vendor_id, &lang).await? {
                self.ctx.tables.upsert_vendor(role, self.record_for(&vendor))?;
                written += 1;
            }
        }
        Ok(written)
    }

    pub fn delete(&self, role: IndexRole, vendor_id: u64) -> Result<usize, IndexError> {
        if !self.ctx.tables.has_table(role, Table::Vendor) {
            return Ok(0);
        }
        self.ctx.tables.delete_vendor(role, vendor_id)
    }

    pub async fn update(&self, role: IndexRole, vendor_id: u64) -> Result<usize, IndexError> {
        self.delete(role, vendor_id)?;
        self.insert(role, vendor_id, None).await
    }
}
