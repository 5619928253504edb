use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Which physical copy of the index a read or write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexRole {
    /// The copy queries are served from.
    Live,
    /// A copy being rebuilt in the background. Never queried.
    Staging,
}

impl fmt::Display for IndexRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexRole::Live => write!(f, "live"),
            IndexRole::Staging => write!(f, "staging"),
        }
    }
}

impl FromStr for IndexRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(IndexRole::Live),
            "staging" => Ok(IndexRole::Staging),
            other => Err(anyhow::anyhow!("Unknown index role: {}", other)),
        }
    }
}

/// Kind of searchable document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Product,
    Post,
    Page,
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocType::Product => write!(f, "product"),
            DocType::Post => write!(f, "post"),
            DocType::Page => write!(f, "page"),
        }
    }
}

impl FromStr for DocType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product" => Ok(DocType::Product),
            "post" => Ok(DocType::Post),
            "page" => Ok(DocType::Page),
            other => Err(anyhow::anyhow!("Unknown document type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Wordlist,
    Readable,
    Taxonomy,
    Vendor,
    Variation,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Wordlist,
        Table::Readable,
        Table::Taxonomy,
        Table::Vendor,
        Table::Variation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Wordlist => "wordlist",
            Table::Readable => "readable",
            Table::Taxonomy => "taxonomy",
            Table::Vendor => "vendor",
            Table::Variation => "variation",
        }
    }
}

/// One (term, document) row of the searchable index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordlistEntry {
    pub term: String,
    pub lang: String,
    pub doc_type: DocType,
    pub doc_id: u64,
    /// Highest weight among the fields the term was found in.
    pub field_weight: u32,
    /// Number of indexed fields containing the term.
    pub hit_count: u32,
}

/// Denormalized snapshot used to render a result without touching the entity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadableRecord {
    pub id: u64,
    pub doc_type: DocType,
    pub lang: String,
    pub title: String,
    pub link: String,
    pub thumbnail_url: Option<String>,
    pub price: Option<f64>,
    pub sku: Option<String>,
    pub excerpt: Option<String>,
    pub breadcrumbs: Vec<String>,
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyRecord {
    pub term_id: u64,
    pub taxonomy: String,
    pub lang: String,
    pub name: String,
    pub link: String,
    pub image_url: Option<String>,
    pub count: u64,
    pub breadcrumbs: Vec<String>,
    /// Tokenized name, matched against query tokens.
    pub terms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorRecord {
    pub vendor_id: u64,
    pub lang: String,
    pub name: String,
    pub link: String,
    pub logo_url: Option<String>,
    pub description: Option<String>,
    pub terms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationRecord {
    pub variation_id: u64,
    pub product_id: u64,
    pub lang: String,
    pub sku: Option<String>,
    pub title: String,
    pub link: String,
    pub price: Option<f64>,
    pub thumbnail_url: Option<String>,
    pub terms: Vec<String>,
}
