//! Indexer Module
//!
//! Sub-indexers that turn entity-source records into index rows. Each one writes a
//! single table family for a given `IndexRole`:
//!
//! - **`searchable`**: wordlist (term → document postings with weights).
//! - **`readable`**: rendering snapshots of products/posts/pages.
//! - **`taxonomy`**, **`vendor`**, **`variation`**: snapshots of their entity kind.
//!
//! Every sub-indexer exposes `insert` / `delete` / `update` (delete then insert). Writes
//! into a role whose table does not exist are silent no-ops. When a language has no
//! translation, the default-language version is stored under that language instead.

pub mod filters;
pub mod readable;
pub mod searchable;
pub mod source;
pub mod taxonomy;
pub mod types;
pub mod variation;
pub mod vendor;

use crate::config::IndexerSettings;
use crate::error::IndexError;
use crate::search::tokenizer::Tokenizer;
use crate::storage::tables::IndexTables;
use crate::storage::types::{DocType, IndexRole, ReadableRecord};

use filters::FilterChain;
use readable::ReadableIndexer;
use searchable::SearchableIndexer;
use source::EntitySource;
use std::sync::Arc;
use taxonomy::TaxonomyIndexer;
use variation::VariationIndexer;
use vendor::VendorIndexer;

/// What every sub-indexer is injected with.
#[derive(Clone)]
pub struct IndexerContext {
    pub tables: Arc<IndexTables>,
    pub source: Arc<dyn EntitySource>,
    pub settings: IndexerSettings,
    /// Indexer-context tokenizer.
    pub tokenizer: Tokenizer,
}

impl IndexerContext {
    /// `lang` alone, or every configured language.
    pub fn languages(&self, lang: Option<&str>) -> Vec<String> {
        match lang {
            Some(lang) => vec![lang.to_string()],
            None => self.settings.active_languages(),
        }
    }
}

pub struct Indexers {
    pub searchable: SearchableIndexer,
    pub readable: ReadableIndexer,
    pub taxonomy: TaxonomyIndexer,
    pub vendor: VendorIndexer,
    pub variation: VariationIndexer,
    settings: IndexerSettings,
}

impl Indexers {
    pub fn new(ctx: IndexerContext, readable_filters: FilterChain<ReadableRecord>) -> Arc<Self> {
        Arc::new(Self {
            searchable: SearchableIndexer::new(ctx.clone()),
            readable: ReadableIndexer::new(ctx.clone(), readable_filters),
            taxonomy: TaxonomyIndexer::new(ctx.clone()),
            vendor: VendorIndexer::new(ctx.clone()),
            variation: VariationIndexer::new(ctx.clone()),
            settings: ctx.settings,
        })
    }

    /// Re-indexes one document everywhere it appears in `role`.
    pub async fn update_document(&self, role: IndexRole, doc_type: DocType, id: u64) -> Result<(), IndexError> {
        self.readable.update(role, doc_type, id).await?;
        self.searchable.update(role, doc_type, id).await?;
        if doc_type == DocType::Product && self.settings.index_variations {
            self.variation.update(role, id).await?;
        }
        Ok(())
    }

    pub fn delete_document(&self, role: IndexRole, doc_type: DocType, id: u64) -> Result<(), IndexError> {
        self.searchable.delete(role, doc_type, id)?;
        self.readable.delete(role, doc_type, id)?;
        if doc_type == DocType::Product {
            self.variation.delete(role, id)?;
        }
        Ok(())
    }
}
