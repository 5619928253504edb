use crate::indexer::types::EntitySnapshot;
use crate::storage::types::{DocType, ReadableRecord, TaxonomyRecord, VariationRecord, VendorRecord};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Taxonomy,
    Vendor,
    Product,
    Post,
    Page,
}

impl From<DocType> for SuggestionKind {
    fn from(doc_type: DocType) -> Self {
        match doc_type {
            DocType::Product => SuggestionKind::Product,
            DocType::Post => SuggestionKind::Post,
            DocType::Page => SuggestionKind::Page,
        }
    }
}

/// Where the suggestions of a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Index,
    /// The index was not ready and the entity source's own search answered.
    Fallback,
    /// The index was not ready and no fallback ran.
    NotReady,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub id: u64,
    pub lang: String,
    pub title: String,
    pub link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub breadcrumbs: Vec<String>,
    /// Taxonomy name for taxonomy suggestions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taxonomy: Option<String>,
    /// Set when a product suggestion points at one of its variations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation_id: Option<u64>,
    pub score: f64,
}

impl Suggestion {
    pub fn from_readable(record: ReadableRecord, score: f64) -> Self {
        Self {
            kind: record.doc_type.into(),
            id: record.id,
            lang: record.lang,
            title: record.title,
            link: record.link,
            thumbnail_url: record.thumbnail_url,
            price: record.price,
            sku: record.sku,
            excerpt: record.excerpt,
            breadcrumbs: record.breadcrumbs,
            taxonomy: None,
            variation_id: None,
            score,
        }
    }

    pub fn from_variation(record: VariationRecord, score: f64) -> Self {
        Self {
            kind: SuggestionKind::Product,
            id: record.product_id,
            lang: record.lang,
            title: record.title,
            link: record.link,
            thumbnail_url: record.thumbnail_url,
            price: record.price,
            sku: record.sku,
            excerpt: None,
            breadcrumbs: Vec::new(),
            taxonomy: None,
            variation_id: Some(record.variation_id),
            score,
        }
    }

    pub fn from_taxonomy(record: TaxonomyRecord, score: f64) -> Self {
        Self {
            kind: SuggestionKind::Taxonomy,
            id: record.term_id,
            lang: record.lang,
            title: record.name,
            link: record.link,
            thumbnail_url: record.image_url,
            price: None,
            sku: None,
            excerpt: None,
            breadcrumbs: record.breadcrumbs,
            taxonomy: Some(record.taxonomy),
            variation_id: None,
            score,
        }
    }

    pub fn from_vendor(record: VendorRecord, score: f64) -> Self {
        Self {
            kind: SuggestionKind::Vendor,
            id: record.vendor_id,
            lang: record.lang,
            title: record.name,
            link: record.link,
            thumbnail_url: record.logo_url,
            price: None,
            sku: None,
            excerpt: record.description,
            breadcrumbs: Vec::new(),
            taxonomy: None,
            variation_id: None,
            score,
        }
    }

    /// Fallback suggestion straight from the entity source.
    pub fn from_snapshot(snapshot: EntitySnapshot) -> Self {
        Self {
            kind: snapshot.doc_type.into(),
            id: snapshot.id,
            lang: snapshot.lang,
            title: snapshot.title,
            link: snapshot.link,
            thumbnail_url: snapshot.thumbnail_url,
            price: snapshot.price,
            sku: snapshot.sku,
            excerpt: snapshot.excerpt,
            breadcrumbs: snapshot.breadcrumbs,
            taxonomy: None,
            variation_id: None,
            score: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub phrase: String,
    pub lang: Option<String>,
    pub suggestions: Vec<Suggestion>,
    pub total: usize,
    /// Whole request, tokenization to serialization.
    pub query_time_ms: f64,
    /// Time spent reading the index tables.
    pub index_time_ms: f64,
    pub source: ResultSource,
}

impl SearchResponse {
    pub fn is_ready(&self) -> bool {
        self.source != ResultSource::NotReady
    }
}
