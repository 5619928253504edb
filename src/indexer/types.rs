use crate::storage::types::DocType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalized document as handed over by the entity source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: u64,
    pub doc_type: DocType,
    pub lang: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub excerpt: Option<String>,
    pub link: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub sku: Option<String>,
    /// Taxonomy name -> term names the document belongs to.
    #[serde(default)]
    pub terms: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub breadcrumbs: Vec<String>,
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
    #[serde(default)]
    pub vendor_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyTerm {
    pub term_id: u64,
    pub taxonomy: String,
    pub lang: String,
    pub name: String,
    pub link: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub count: u64,
    /// Ancestor names, root first.
    #[serde(default)]
    pub parents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vendor {
    pub vendor_id: u64,
    pub lang: String,
    pub name: String,
    pub link: String,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    pub variation_id: u64,
    pub product_id: u64,
    pub lang: String,
    #[serde(default)]
    pub sku: Option<String>,
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

/// Field weights of the searchable index. A term's `field_weight` is the highest
/// weight among the fields it was found in.
pub mod weights {
    pub const TITLE: u32 = 100;
    pub const SKU: u32 = 80;
    pub const TERMS: u32 = 50;
    pub const EXCERPT: u32 = 30;
    pub const CONTENT: u32 = 20;
    pub const CUSTOM: u32 = 10;
}
