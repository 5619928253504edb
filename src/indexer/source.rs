//! Entity Source
//!
//! The host system the index is built from. `EntitySource` is the only way the
//! indexer reads products, posts, taxonomy terms, vendors and variations; the
//! query engine also uses it for its live (unindexed) fallback search.

use super::types::*;
use crate::error::IndexError;
use crate::storage::types::DocType;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// Accessors return `Ok(None)` when the entity has no version in `lang`.
#[async_trait]
pub trait EntitySource: Send + Sync {
    async fn document_ids(&self, doc_type: DocType) -> Result<Vec<u64>, IndexError>;

    async fn document(
        &self,
        doc_type: DocType,
        id: u64,
        lang: &str,
    ) -> Result<Option<EntitySnapshot>, IndexError>;

    async fn term_ids(&self, taxonomy: &str) -> Result<Vec<u64>, IndexError>;

    async fn term(&self, taxonomy: &str, id: u64, lang: &str) -> Result<Option<TaxonomyTerm>, IndexError>;

    async fn vendor_ids(&self) -> Result<Vec<u64>, IndexError>;

    async fn vendor(&self, id: u64, lang: &str) -> Result<Option<Vendor>, IndexError>;

    async fn variation_ids(&self, product_id: u64) -> Result<Vec<u64>, IndexError>;

    async fn variation(&self, id: u64, lang: &str) -> Result<Option<Variation>, IndexError>;

    /// The host's own search, used while the index is not ready.
    async fn search(
        &self,
        phrase: &str,
        lang: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EntitySnapshot>, IndexError>;
}

/// Looks up `lang`, falling back to a copy of the `default_lang` version relabeled as `lang`.
pub async fn document_or_default(
    source: &dyn EntitySource,
    doc_type: DocType,
    id: u64,
    lang: &str,
    default_lang: &str,
) -> Result<Option<EntitySnapshot>, IndexError> {
    if let Some(snapshot) = source.document(doc_type, id, lang).await? {
        return Ok(Some(snapshot));
    }
    if lang == default_lang {
        return Ok(None);
    }
    Ok(source
        .document(doc_type, id, default_lang)
        .await?
        .map(|mut snapshot| {
            tracing::trace!(scope = "indexer", "No {} translation of {} {}, copying {}", lang, doc_type, id, default_lang);
            snapshot.lang = lang.to_string();
            snapshot
        }))
}

/// Serialized form of a `MemoryCatalog`, e.g. the `--catalog` file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogData {
    pub documents: Vec<EntitySnapshot>,
    pub terms: Vec<TaxonomyTerm>,
    pub vendors: Vec<Vendor>,
    pub variations: Vec<Variation>,
}

#[derive(Default)]
struct CatalogTables {
    documents: BTreeMap<(DocType, u64), BTreeMap<String, EntitySnapshot>>,
    terms: BTreeMap<(String, u64), BTreeMap<String, TaxonomyTerm>>,
    vendors: BTreeMap<u64, BTreeMap<String, Vendor>>,
    variations: BTreeMap<u64, BTreeMap<String, Variation>>,
}

/// In-process entity source backed by maps, loadable from JSON.
#[derive(Default)]
pub struct MemoryCatalog {
    tables: RwLock<CatalogTables>,
}

impl MemoryCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn from_data(data: CatalogData) -> Arc<Self> {
        let catalog = Self::default();
        for document in data.documents {
            catalog.upsert_document(document);
        }
        for term in data.terms {
            catalog.upsert_term(term);
        }
        for vendor in data.vendors {
            catalog.upsert_vendor(vendor);
        }
        for variation in data.variations {
            catalog.upsert_variation(variation);
        }
        Arc::new(catalog)
    }

    pub fn load(path: &Path) -> anyhow::Result<Arc<Self>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading catalog {}", path.display()))?;
        let data: CatalogData = serde_json::from_str(&content)
            .with_context(|| format!("parsing catalog {}", path.display()))?;
        tracing::info!(
            scope = "indexer",
            "Loaded catalog: {} documents, {} terms, {} vendors, {} variations",
            data.documents.len(),
            data.terms.len(),
            data.vendors.len(),
            data.variations.len()
        );
        Ok(Self::from_data(data))
    }

    pub fn upsert_document(&self, document: EntitySnapshot) {
        self.tables
            .write()
            .documents
            .entry((document.doc_type, document.id))
            .or_default()
            .insert(document.lang.clone(), document);
    }

    pub fn remove_document(&self, doc_type: DocType, id: u64) -> bool {
        self.tables.write().documents.remove(&(doc_type, id)).is_some()
    }

    pub fn upsert_term(&self, term: TaxonomyTerm) {
        self.tables
            .write()
            .terms
            .entry((term.taxonomy.clone(), term.term_id))
            .or_default()
            .insert(term.lang.clone(), term);
    }

    pub fn upsert_vendor(&self, vendor: Vendor) {
        self.tables
            .write()
            .vendors
            .entry(vendor.vendor_id)
            .or_default()
            .insert(vendor.lang.clone(), vendor);
    }

    pub fn upsert_variation(&self, variation: Variation) {
        self.tables
            .write()
            .variations
            .entry(variation.variation_id)
            .or_default()
            .insert(variation.lang.clone(), variation);
    }
}

fn in_lang<V: Clone>(by_lang: Option<&BTreeMap<String, V>>, lang: &str) -> Option<V> {
    by_lang.and_then(|versions| versions.get(lang).cloned())
}

#[async_trait]
impl EntitySource for MemoryCatalog {
    async fn document_ids(&self, doc_type: DocType) -> Result<Vec<u64>, IndexError> {
        Ok(self
            .tables
            .read()
            .documents
            .keys()
            .filter(|(kind, _)| *kind == doc_type)
            .map(|(_, id)| *id)
            .collect())
    }

    async fn document(
        &self,
        doc_type: DocType,
        id: u64,
        lang: &str,
    ) -> Result<Option<EntitySnapshot>, IndexError> {
        Ok(in_lang(self.tables.read().documents.get(&(doc_type, id)), lang))
    }

    async fn term_ids(&self, taxonomy: &str) -> Result<Vec<u64>, IndexError> {
        Ok(self
            .tables
            .read()
            .terms
            .keys()
            .filter(|(name, _)| name == taxonomy)
            .map(|(_, id)| *id)
            .collect())
    }

    async fn term(&self, taxonomy: &str, id: u64, lang: &str) -> Result<Option<TaxonomyTerm>, IndexError> {
        Ok(in_lang(
            self.tables.read().terms.get(&(taxonomy.to_string(), id)),
            lang,
        ))
    }

    async fn vendor_ids(&self) -> Result<Vec<u64>, IndexError> {
        Ok(self.tables.read().vendors.keys().copied().collect())
    }

    async fn vendor(&self, id: u64, lang: &str) -> Result<Option<Vendor>, IndexError> {
        Ok(in_lang(self.tables.read().vendors.get(&id), lang))
    }

    async fn variation_ids(&self, product_id: u64) -> Result<Vec<u64>, IndexError> {
        Ok(self
            .tables
            .read()
            .variations
            .iter()
            .filter(|(_, by_lang)| by_lang.values().any(|v| v.product_id == product_id))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn variation(&self, id: u64, lang: &str) -> Result<Option<Variation>, IndexError> {
        Ok(in_lang(self.tables.read().variations.get(&id), lang))
    }

    async fn search(
        &self,
        phrase: &str,
        lang: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EntitySnapshot>, IndexError> {
        let needle = phrase.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let tables = self.tables.read();
        let mut seen: HashSet<(DocType, u64)> = HashSet::new();
        let mut hits = Vec::new();
        for ((doc_type, id), by_lang) in tables.documents.iter() {
            for snapshot in by_lang.values() {
                if lang.is_some_and(|lang| lang != snapshot.lang) {
                    continue;
                }
                let matches = snapshot.title.to_lowercase().contains(&needle)
                    || snapshot
                        .sku
                        .as_deref()
                        .is_some_and(|sku| sku.to_lowercase().contains(&needle));
                if matches && seen.insert((*doc_type, *id)) {
                    hits.push(snapshot.clone());
                }
            }
            if hits.len() >= limit {
                break;
            }
        }
        hits.truncate(limit);
        Ok(hits)
    }
}
