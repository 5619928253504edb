//! Index Tables
//!
//! The relational side of the index: searchable wordlist, readable snapshots, taxonomy,
//! vendor and variation rows. Every copy of the tables belongs to an [`IndexRole`];
//! rows are keyed by entity id × language inside a role.
//!
//! Swapping roles is a pointer flip: the staging copy replaces the live copy under a
//! single write lock, so in-flight readers keep the `Arc` they already hold.

use parking_lot::RwLock;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::types::*;
use crate::error::IndexError;

type DocKey = (DocType, u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Posting {
    field_weight: u32,
    hit_count: u32,
}

#[derive(Default)]
struct RoleTables {
    present: HashSet<Table>,
    /// (term, lang) -> postings. Ordered so prefix scans are range scans.
    wordlist: RwLock<BTreeMap<(String, String), BTreeMap<DocKey, Posting>>>,
    /// Reverse index used to delete a document's postings.
    doc_terms: DashMap<DocKey, BTreeMap<String, Vec<String>>>,
    readable: DashMap<DocKey, BTreeMap<String, ReadableRecord>>,
    taxonomy: DashMap<(String, u64), BTreeMap<String, TaxonomyRecord>>,
    vendor: DashMap<u64, BTreeMap<String, VendorRecord>>,
    variation: DashMap<u64, BTreeMap<String, VariationRecord>>,
}

pub struct IndexTables {
    roles: RwLock<HashMap<IndexRole, Arc<RoleTables>>>,
}

impl IndexTables {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            roles: RwLock::new(HashMap::new()),
        })
    }

    /// Creates an empty copy of `tables` for `role`, discarding any existing copy.
    pub fn create_tables(&self, role: IndexRole, tables: &[Table]) {
        let role_tables = RoleTables {
            present: tables.iter().copied().collect(),
            ..Default::default()
        };
        self.roles.write().insert(role, Arc::new(role_tables));
        tracing::info!(scope = "storage", "Created {} tables for role {}", tables.len(), role);
    }

    pub fn drop_tables(&self, role: IndexRole) {
        if self.roles.write().remove(&role).is_some() {
            tracing::info!(scope = "storage", "Dropped tables for role {}", role);
        }
    }

    pub fn has_role(&self, role: IndexRole) -> bool {
        self.roles.read().contains_key(&role)
    }

    pub fn has_table(&self, role: IndexRole, table: Table) -> bool {
        self.roles
            .read()
            .get(&role)
            .map(|tables| tables.present.contains(&table))
            .unwrap_or(false)
    }

    /// Staging replaces live. The previous live copy is dropped once its last reader is done.
    pub fn swap_roles(&self) -> Result<(), IndexError> {
        let mut roles = self.roles.write();
        let staging = roles
            .remove(&IndexRole::Staging)
            .ok_or_else(|| missing(IndexRole::Staging, Table::Readable))?;
        roles.insert(IndexRole::Live, staging);
        Ok(())
    }

    fn tables(&self, role: IndexRole, table: Table) -> Result<Arc<RoleTables>, IndexError> {
        match self.roles.read().get(&role) {
            Some(tables) if tables.present.contains(&table) => Ok(tables.clone()),
            _ => Err(missing(role, table)),
        }
    }

    // --- Wordlist ---

    pub fn insert_terms(&self, role: IndexRole, entries: Vec<WordlistEntry>) -> Result<(), IndexError> {
        let tables = self.tables(role, Table::Wordlist)?;
        let mut wordlist = tables.wordlist.write();
        for entry in entries {
            let doc = (entry.doc_type, entry.doc_id);
            wordlist
                .entry((entry.term.clone(), entry.lang.clone()))
                .or_default()
                .insert(
                    doc,
                    Posting {
                        field_weight: entry.field_weight,
                        hit_count: entry.hit_count,
                    },
                );
            let mut doc_terms = tables.doc_terms.entry(doc).or_default();
            let terms = doc_terms.entry(entry.lang).or_default();
            if !terms.contains(&entry.term) {
                terms.push(entry.term);
            }
        }
        Ok(())
    }

    /// Removes a document's postings, for one language or all of them.
    pub fn delete_terms(
        &self,
        role: IndexRole,
        doc_type: DocType,
        doc_id: u64,
        lang: Option<&str>,
    ) -> Result<usize, IndexError> {
        let tables = self.tables(role, Table::Wordlist)?;
        let doc = (doc_type, doc_id);

        let mut removed_terms: Vec<(String, String)> = Vec::new();
        if let Some(mut by_lang) = tables.doc_terms.get_mut(&doc) {
            let langs: Vec<String> = match lang {
                Some(lang) => vec![lang.to_string()],
                None => by_lang.keys().cloned().collect(),
            };
            for lang in langs {
                if let Some(terms) = by_lang.remove(&lang) {
                    removed_terms.extend(terms.into_iter().map(|term| (term, lang.clone())));
                }
            }
        }
        tables.doc_terms.remove_if(&doc, |_, by_lang| by_lang.is_empty());

        let mut wordlist = tables.wordlist.write();
        for key in removed_terms.iter() {
            if let Some(postings) = wordlist.get_mut(key) {
                postings.remove(&doc);
                if postings.is_empty() {
                    wordlist.remove(key);
                }
            }
        }
        Ok(removed_terms.len())
    }

    /// Exact term lookup. `lang = None` searches every language.
    pub fn find_term(
        &self,
        role: IndexRole,
        lang: Option<&str>,
        term: &str,
    ) -> Result<Vec<WordlistEntry>, IndexError> {
        let tables = self.tables(role, Table::Wordlist)?;
        let wordlist = tables.wordlist.read();
        let start = (term.to_string(), String::new());

        let mut entries = Vec::new();
        for ((row_term, row_lang), postings) in wordlist.range(start..) {
            if row_term != term {
                break;
            }
            if lang.is_some_and(|lang| lang != row_lang) {
                continue;
            }
            for ((doc_type, doc_id), posting) in postings {
                entries.push(WordlistEntry {
                    term: row_term.clone(),
                    lang: row_lang.clone(),
                    doc_type: *doc_type,
                    doc_id: *doc_id,
                    field_weight: posting.field_weight,
                    hit_count: posting.hit_count,
                });
            }
        }
        Ok(entries)
    }

    /// Terms starting with `prefix`, most popular first.
    pub fn find_prefix(
        &self,
        role: IndexRole,
        lang: Option<&str>,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<String>, IndexError> {
        let tables = self.tables(role, Table::Wordlist)?;
        let wordlist = tables.wordlist.read();
        let start = (prefix.to_string(), String::new());

        let mut candidates: Vec<&str> = Vec::new();
        for ((term, row_lang), _) in wordlist.range(start..) {
            if !term.starts_with(prefix) {
                break;
            }
            if lang.is_some_and(|lang| lang != row_lang) || candidates.last() == Some(&term.as_str()) {
                continue;
            }
            candidates.push(term.as_str());
        }

        let mut terms: Vec<(&str, u64)> = candidates
            .into_iter()
            .map(|term| (term, popularity(&wordlist, lang, term)))
            .collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        Ok(terms
            .into_iter()
            .take(limit)
            .map(|(term, _)| term.to_string())
            .collect())
    }

    /// Sum of `hit_count` over every document containing `term`. Orders prefix expansions.
    pub fn term_popularity(&self, role: IndexRole, lang: Option<&str>, term: &str) -> u64 {
        match self.tables(role, Table::Wordlist) {
            Ok(tables) => popularity(&tables.wordlist.read(), lang, term),
            Err(_) => 0,
        }
    }

    /// Documents with wordlist rows but no readable snapshot in the same language.
    pub fn orphaned_terms(&self, role: IndexRole) -> Result<Vec<(DocType, u64, String)>, IndexError> {
        let tables = self.tables(role, Table::Wordlist)?;
        let mut orphans = Vec::new();
        for entry in tables.doc_terms.iter() {
            let (doc_type, doc_id) = *entry.key();
            for lang in entry.value().keys() {
                let has_readable = tables
                    .readable
                    .get(&(doc_type, doc_id))
                    .map(|by_lang| by_lang.contains_key(lang))
                    .unwrap_or(false);
                if !has_readable {
                    orphans.push((doc_type, doc_id, lang.clone()));
                }
            }
        }
        orphans.sort();
        Ok(orphans)
    }

    // --- Readable ---

    pub fn upsert_readable(&self, role: IndexRole, record: ReadableRecord) -> Result<(), IndexError> {
        let tables = self.tables(role, Table::Readable)?;
        tables
            .readable
            .entry((record.doc_type, record.id))
            .or_default()
            .insert(record.lang.clone(), record);
        Ok(())
    }

    pub fn delete_readable(&self, role: IndexRole, doc_type: DocType, id: u64) -> Result<usize, IndexError> {
        let tables = self.tables(role, Table::Readable)?;
        Ok(tables
            .readable
            .remove(&(doc_type, id))
            .map(|(_, by_lang)| by_lang.len())
            .unwrap_or(0))
    }

    pub fn get_readable(
        &self,
        role: IndexRole,
        doc_type: DocType,
        id: u64,
        lang: &str,
    ) -> Option<ReadableRecord> {
        let tables = self.tables(role, Table::Readable).ok()?;
        let by_lang = tables.readable.get(&(doc_type, id))?;
        by_lang.get(lang).cloned()
    }

    /// Any language version, preferring `preferred`.
    pub fn get_readable_any(
        &self,
        role: IndexRole,
        doc_type: DocType,
        id: u64,
        preferred: &str,
    ) -> Option<ReadableRecord> {
        let tables = self.tables(role, Table::Readable).ok()?;
        let by_lang = tables.readable.get(&(doc_type, id))?;
        by_lang
            .get(preferred)
            .or_else(|| by_lang.values().next())
            .cloned()
    }

    // --- Taxonomy ---

    pub fn upsert_taxonomy(&self, role: IndexRole, record: TaxonomyRecord) -> Result<(), IndexError> {
        let tables = self.tables(role, Table::Taxonomy)?;
        tables
            .taxonomy
            .entry((record.taxonomy.clone(), record.term_id))
            .or_default()
            .insert(record.lang.clone(), record);
        Ok(())
    }

    pub fn delete_taxonomy(&self, role: IndexRole, taxonomy: &str, term_id: u64) -> Result<usize, IndexError> {
        let tables = self.tables(role, Table::Taxonomy)?;
        Ok(tables
            .taxonomy
            .remove(&(taxonomy.to_string(), term_id))
            .map(|(_, by_lang)| by_lang.len())
            .unwrap_or(0))
    }

    pub fn taxonomy_records(&self, role: IndexRole, lang: Option<&str>) -> Result<Vec<TaxonomyRecord>, IndexError> {
        let tables = self.tables(role, Table::Taxonomy)?;
        Ok(collect_by_lang(tables.taxonomy.iter().map(|e| e.value().clone()), lang))
    }

    // --- Vendor ---

    pub fn upsert_vendor(&self, role: IndexRole, record: VendorRecord) -> Result<(), IndexError> {
        let tables = self.tables(role, Table::Vendor)?;
        tables
            .vendor
            .entry(record.vendor_id)
            .or_default()
            .insert(record.lang.clone(), record);
        Ok(())
    }

    pub fn delete_vendor(&self, role: IndexRole, vendor_id: u64) -> Result<usize, IndexError> {
        let tables = self.tables(role, Table::Vendor)?;
        Ok(tables
            .vendor
            .remove(&vendor_id)
            .map(|(_, by_lang)| by_lang.len())
            .unwrap_or(0))
    }

    pub fn vendor_records(&self, role: IndexRole, lang: Option<&str>) -> Result<Vec<VendorRecord>, IndexError> {
        let tables = self.tables(role, Table::Vendor)?;
        Ok(collect_by_lang(tables.vendor.iter().map(|e| e.value().clone()), lang))
    }

    // --- Variation ---

    pub fn upsert_variation(&self, role: IndexRole, record: VariationRecord) -> Result<(), IndexError> {
        let tables = self.tables(role, Table::Variation)?;
        tables
            .variation
            .entry(record.variation_id)
            .or_default()
            .insert(record.lang.clone(), record);
        Ok(())
    }

    pub fn delete_variations_of(&self, role: IndexRole, product_id: u64) -> Result<usize, IndexError> {
        let tables = self.tables(role, Table::Variation)?;
        let before = tables.variation.len();
        tables.variation.retain(|_, by_lang| {
            by_lang
                .values()
                .next()
                .map(|record| record.product_id != product_id)
                .unwrap_or(false)
        });
        Ok(before - tables.variation.len())
    }

    pub fn variation_records(&self, role: IndexRole, lang: Option<&str>) -> Result<Vec<VariationRecord>, IndexError> {
        let tables = self.tables(role, Table::Variation)?;
        Ok(collect_by_lang(tables.variation.iter().map(|e| e.value().clone()), lang))
    }

    /// Row count of one table (wordlist counts postings).
    pub fn count(&self, role: IndexRole, table: Table) -> usize {
        let Ok(tables) = self.tables(role, table) else {
            return 0;
        };
        match table {
            Table::Wordlist => tables.wordlist.read().values().map(|p| p.len()).sum(),
            Table::Readable => tables.readable.iter().map(|e| e.value().len()).sum(),
            Table::Taxonomy => tables.taxonomy.iter().map(|e| e.value().len()).sum(),
            Table::Vendor => tables.vendor.iter().map(|e| e.value().len()).sum(),
            Table::Variation => tables.variation.iter().map(|e| e.value().len()).sum(),
        }
    }
}

fn missing(role: IndexRole, table: Table) -> IndexError {
    IndexError::MissingTable {
        table: table.as_str().to_string(),
        role: role.to_string(),
    }
}

fn sum_hits(postings: &BTreeMap<DocKey, Posting>) -> u64 {
    postings.values().map(|p| p.hit_count as u64).sum()
}

fn popularity(
    wordlist: &BTreeMap<(String, String), BTreeMap<DocKey, Posting>>,
    lang: Option<&str>,
    term: &str,
) -> u64 {
    wordlist
        .range((term.to_string(), String::new())..)
        .take_while(|((row_term, _), _)| row_term == term)
        .filter(|((_, row_lang), _)| lang.is_none_or(|lang| lang == row_lang))
        .map(|(_, postings)| sum_hits(postings))
        .sum()
}

fn collect_by_lang<R, I>(rows: I, lang: Option<&str>) -> Vec<R>
where
    I: Iterator<Item = BTreeMap<String, R>>,
{
    let mut records = Vec::new();
    for mut by_lang in rows {
        match lang {
            Some(lang) => {
                if let Some(record) = by_lang.remove(lang) {
                    records.push(record);
                }
            }
            None => records.extend(by_lang.into_values()),
        }
    }
    records
}
