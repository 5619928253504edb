//! Query Engine
//!
//! Answers search-as-you-type queries from the live index.
//!
//! ## Pipeline
//! 1. **Tokenize** the phrase in search context. The trailing token is treated as a
//!    prefix and expanded to the most popular indexed terms starting with it.
//! 2. **Score** every document found in the wordlist:
//!    `coverage × Σ(field_weight × hit_count)`, where each query token contributes its
//!    best matching term and `coverage` is the share of query tokens matched.
//! 3. **Hydrate** the ranked ids from readable snapshots, per entity type, up to the
//!    configured limits. Exact SKU hits on variations are listed before products.
//! 4. **Send** taxonomies, vendors, products and posts, in that order, through the
//!    suggestion filter chain.
//!
//! The engine refuses to answer from an index that is not `Completed` or lacks the
//! requested language; callers then use the entity source's own search instead.

use super::tokenizer::Tokenizer;
use super::types::*;
use crate::builder::info::BuildInfoStore;
use crate::builder::types::BuildStatus;
use crate::config::{IndexerSettings, SearchSettings};
use crate::indexer::filters::FilterChain;
use crate::indexer::source::EntitySource;
use crate::indexer::types::weights;
use crate::storage::options::OptionStore;
use crate::storage::tables::IndexTables;
use crate::storage::types::{DocType, IndexRole, Table};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

const LIVE: IndexRole = IndexRole::Live;

pub struct SearchContext {
    pub tables: Arc<IndexTables>,
    pub source: Arc<dyn EntitySource>,
    pub store: Arc<OptionStore>,
    pub settings: SearchSettings,
    pub indexer: IndexerSettings,
}

pub struct QueryEngine {
    tables: Arc<IndexTables>,
    source: Arc<dyn EntitySource>,
    builds: BuildInfoStore,
    settings: SearchSettings,
    default_language: String,
    tokenizer: Tokenizer,
    filters: FilterChain<Vec<Suggestion>>,
}

impl QueryEngine {
    pub fn new(ctx: SearchContext, filters: FilterChain<Vec<Suggestion>>) -> Result<Arc<Self>, regex::Error> {
        let tokenizer = Tokenizer::search(
            &ctx.indexer.stopwords,
            ctx.settings.max_tokens,
            ctx.indexer.max_term_length,
        )?;
        Ok(Arc::new(Self {
            tables: ctx.tables,
            source: ctx.source,
            builds: BuildInfoStore::new(ctx.store),
            settings: ctx.settings,
            default_language: ctx.indexer.default_language,
            tokenizer,
            filters,
        }))
    }

    pub fn session(&self) -> QuerySession<'_> {
        QuerySession::new(self)
    }

    /// Live index is completed, its tables exist and `lang` (if any) was indexed.
    pub fn is_ready(&self, lang: Option<&str>) -> bool {
        let Some(info) = self.builds.get(LIVE) else {
            return false;
        };
        info.status == BuildStatus::Completed
            && self.tables.has_table(LIVE, Table::Wordlist)
            && self.tables.has_table(LIVE, Table::Readable)
            && lang.is_none_or(|lang| info.languages.iter().any(|l| l == lang))
    }

    /// Every entity type, index only.
    pub fn search(&self, phrase: &str, lang: Option<&str>) -> SearchResponse {
        let mut session = self.session();
        session.set_phrase(phrase);
        session.set_lang(lang);
        session.search_taxonomy();
        session.search_vendors();
        session.search_products();
        session.search_posts();
        session.send_results()
    }

    /// Like `search`, answering from the entity source while the index is not ready.
    pub async fn search_with_fallback(&self, phrase: &str, lang: Option<&str>) -> SearchResponse {
        let response = self.search(phrase, lang);
        if response.is_ready() {
            return response;
        }

        let started = Instant::now();
        let limit = self.settings.limits.products + self.settings.limits.posts;
        match self.source.search(phrase.trim(), lang, limit).await {
            Ok(hits) => {
                let suggestions = self
                    .filters
                    .apply(hits.into_iter().map(Suggestion::from_snapshot).collect());
                tracing::debug!(
                    scope = "search",
                    "Index not ready, fallback answered '{}' with {} suggestions",
                    phrase,
                    suggestions.len()
                );
                SearchResponse {
                    total: suggestions.len(),
                    suggestions,
                    query_time_ms: response.query_time_ms + millis(started.elapsed()),
                    source: ResultSource::Fallback,
                    ..response
                }
            }
            Err(e) => {
                tracing::warn!(scope = "search", "Fallback search failed: {}", e);
                response
            }
        }
    }
}

/// One query, built up step by step and finished with `send_results`.
pub struct QuerySession<'a> {
    engine: &'a QueryEngine,
    started: Instant,
    index_time: Duration,
    phrase: String,
    lang: Option<String>,
    tokens: Vec<String>,
    ready: Option<bool>,
    taxonomies: Vec<Suggestion>,
    vendors: Vec<Suggestion>,
    products: Vec<Suggestion>,
    posts: Vec<Suggestion>,
}

impl<'a> QuerySession<'a> {
    fn new(engine: &'a QueryEngine) -> Self {
        Self {
            engine,
            started: Instant::now(),
            index_time: Duration::ZERO,
            phrase: String::new(),
            lang: None,
            tokens: Vec::new(),
            ready: None,
            taxonomies: Vec::new(),
            vendors: Vec::new(),
            products: Vec::new(),
            posts: Vec::new(),
        }
    }

    pub fn set_phrase(&mut self, phrase: &str) {
        self.phrase = phrase.trim().to_string();
        self.tokens = if self.phrase.chars().count() < self.engine.settings.min_chars {
            Vec::new()
        } else {
            self.engine.tokenizer.tokenize(&self.phrase)
        };
    }

    /// `None` (or empty) searches every indexed language.
    pub fn set_lang(&mut self, lang: Option<&str>) {
        self.lang = lang.filter(|lang| !lang.is_empty()).map(str::to_string);
        self.ready = None;
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    fn check_ready(&mut self) -> bool {
        if self.ready.is_none() {
            self.ready = Some(self.engine.is_ready(self.lang.as_deref()));
        }
        self.ready.unwrap_or(false)
    }

    fn can_search(&mut self) -> bool {
        self.check_ready() && !self.tokens.is_empty()
    }

    fn preferred_lang(&self) -> String {
        self.lang
            .clone()
            .unwrap_or_else(|| self.engine.default_language.clone())
    }

    pub fn search_products(&mut self) -> usize {
        if !self.can_search() {
            return 0;
        }
        let started = Instant::now();
        let limit = self.engine.settings.limits.products;
        let mut products = self.variation_matches();
        let ranked = self.score_documents(&[DocType::Product]);
        products.extend(self.hydrate(ranked, limit));
        products.truncate(limit);
        self.index_time += started.elapsed();
        self.products = products;
        self.products.len()
    }

    pub fn search_posts(&mut self) -> usize {
        if !self.can_search() {
            return 0;
        }
        let started = Instant::now();
        let ranked = self.score_documents(&[DocType::Post, DocType::Page]);
        self.posts = self.hydrate(ranked, self.engine.settings.limits.posts);
        self.index_time += started.elapsed();
        self.posts.len()
    }

    pub fn search_taxonomy(&mut self) -> usize {
        if !self.can_search() {
            return 0;
        }
        let started = Instant::now();
        let records = match self.engine.tables.taxonomy_records(LIVE, self.lang.as_deref()) {
            Ok(records) => records,
            Err(e) => {
                tracing::debug!(scope = "search", "Skipping taxonomies: {}", e);
                Vec::new()
            }
        };
        let preferred = self.preferred_lang();
        let phrase = self.phrase.to_lowercase();

        let mut matched: Vec<_> = records
            .into_iter()
            .filter_map(|record| {
                let coverage = self.term_coverage(&record.terms)?;
                let exact = if record.name.to_lowercase() == phrase { 1.0 } else { 0.0 };
                Some((coverage + exact, record))
            })
            .collect();
        matched.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa)
                .then((a.lang != preferred).cmp(&(b.lang != preferred)))
                .then(b.count.cmp(&a.count))
                .then(a.taxonomy.cmp(&b.taxonomy))
                .then(a.term_id.cmp(&b.term_id))
        });

        let mut seen = HashSet::new();
        self.taxonomies = matched
            .into_iter()
            .filter(|(_, record)| seen.insert((record.taxonomy.clone(), record.term_id)))
            .take(self.engine.settings.limits.taxonomies)
            .map(|(score, record)| Suggestion::from_taxonomy(record, score))
            .collect();
        self.index_time += started.elapsed();
        self.taxonomies.len()
    }

    pub fn search_vendors(&mut self) -> usize {
        if !self.can_search() {
            return 0;
        }
        let started = Instant::now();
        let records = match self.engine.tables.vendor_records(LIVE, self.lang.as_deref()) {
            Ok(records) => records,
            Err(e) => {
                tracing::debug!(scope = "search", "Skipping vendors: {}", e);
                Vec::new()
            }
        };
        let preferred = self.preferred_lang();

        let mut matched: Vec<_> = records
            .into_iter()
            .filter_map(|record| Some((self.term_coverage(&record.terms)?, record)))
            .collect();
        matched.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa)
                .then((a.lang != preferred).cmp(&(b.lang != preferred)))
                .then(a.vendor_id.cmp(&b.vendor_id))
        });

        let mut seen = HashSet::new();
        self.vendors = matched
            .into_iter()
            .filter(|(_, record)| seen.insert(record.vendor_id))
            .take(self.engine.settings.limits.vendors)
            .map(|(score, record)| Suggestion::from_vendor(record, score))
            .collect();
        self.index_time += started.elapsed();
        self.vendors.len()
    }

    pub fn has_results(&self) -> bool {
        !(self.taxonomies.is_empty()
            && self.vendors.is_empty()
            && self.products.is_empty()
            && self.posts.is_empty())
    }

    pub fn send_results(mut self) -> SearchResponse {
        let ready = self.check_ready();
        let mut suggestions = Vec::new();
        if ready {
            suggestions.append(&mut self.taxonomies);
            suggestions.append(&mut self.vendors);
            suggestions.append(&mut self.products);
            suggestions.append(&mut self.posts);
            suggestions = self.engine.filters.apply(suggestions);
        }

        let response = SearchResponse {
            phrase: self.phrase,
            lang: self.lang,
            total: suggestions.len(),
            suggestions,
            query_time_ms: millis(self.started.elapsed()),
            index_time_ms: millis(self.index_time),
            source: if ready {
                ResultSource::Index
            } else {
                ResultSource::NotReady
            },
        };
        tracing::debug!(
            scope = "search",
            "Query '{}' answered with {} suggestions in {:.2} ms",
            response.phrase,
            response.total,
            response.query_time_ms
        );
        response
    }

    // --- Scoring ---

    /// Share of query tokens found in `terms`, the trailing one by prefix.
    /// `None` when the match requirement is not met.
    fn term_coverage(&self, terms: &[String]) -> Option<f64> {
        let last = self.tokens.len().saturating_sub(1);
        let matched = self
            .tokens
            .iter()
            .enumerate()
            .filter(|(i, token)| {
                terms
                    .iter()
                    .any(|term| term == *token || (*i == last && term.starts_with(token.as_str())))
            })
            .count();
        let required = if self.engine.settings.match_all_tokens {
            self.tokens.len()
        } else {
            1
        };
        (matched >= required && matched > 0).then(|| matched as f64 / self.tokens.len() as f64)
    }

    /// Documents of `doc_types` ranked by score, ties by id.
    fn score_documents(&self, doc_types: &[DocType]) -> Vec<(DocType, u64, f64)> {
        let tables = &self.engine.tables;
        let lang = self.lang.as_deref();
        let last = self.tokens.len().saturating_sub(1);
        let mut scores: HashMap<(DocType, u64), (usize, f64)> = HashMap::new();

        for (i, token) in self.tokens.iter().enumerate() {
            let mut candidates = vec![token.clone()];
            if i == last && self.engine.settings.prefix_expansions > 0 {
                match tables.find_prefix(LIVE, lang, token, self.engine.settings.prefix_expansions) {
                    Ok(terms) => candidates.extend(terms.into_iter().filter(|term| term != token)),
                    Err(e) => tracing::debug!(scope = "search", "Prefix lookup failed: {}", e),
                }
            }

            // Best term of this token per document.
            let mut best: HashMap<(DocType, u64), f64> = HashMap::new();
            for term in &candidates {
                let entries = match tables.find_term(LIVE, lang, term) {
                    Ok(entries) => entries,
                    Err(e) => {
                        tracing::debug!(scope = "search", "Term lookup failed: {}", e);
                        continue;
                    }
                };
                for entry in entries.iter().filter(|e| doc_types.contains(&e.doc_type)) {
                    let value = entry.field_weight as f64 * entry.hit_count as f64;
                    let slot = best.entry((entry.doc_type, entry.doc_id)).or_insert(0.0);
                    if value > *slot {
                        *slot = value;
                    }
                }
            }
            for (doc, value) in best {
                let score = scores.entry(doc).or_insert((0, 0.0));
                score.0 += 1;
                score.1 += value;
            }
        }

        let total = self.tokens.len();
        let required = if self.engine.settings.match_all_tokens { total } else { 1 };
        let mut ranked: Vec<(DocType, u64, f64)> = scores
            .into_iter()
            .filter(|(_, (matched, _))| *matched >= required)
            .map(|((doc_type, id), (matched, sum))| (doc_type, id, matched as f64 / total as f64 * sum))
            .collect();
        ranked.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.1.cmp(&b.1)));
        ranked
    }

    fn hydrate(&self, ranked: Vec<(DocType, u64, f64)>, limit: usize) -> Vec<Suggestion> {
        let preferred = self.preferred_lang();
        ranked
            .into_iter()
            .filter_map(|(doc_type, id, score)| {
                let record = self.engine.tables.get_readable_any(LIVE, doc_type, id, &preferred);
                if record.is_none() {
                    tracing::debug!(scope = "search", "No readable snapshot for {} {}", doc_type, id);
                }
                record.map(|record| Suggestion::from_readable(record, score))
            })
            .take(limit)
            .collect()
    }

    /// Variations whose SKU equals (or starts with) the phrase, joiners ignored.
    fn variation_matches(&self) -> Vec<Suggestion> {
        let needle = normalize_sku(&self.phrase);
        if needle.is_empty() {
            return Vec::new();
        }
        let Ok(records) = self.engine.tables.variation_records(LIVE, self.lang.as_deref()) else {
            return Vec::new();
        };
        let preferred = self.preferred_lang();

        let mut matched: Vec<_> = records
            .into_iter()
            .filter_map(|record| {
                let sku = normalize_sku(record.sku.as_deref()?);
                let score = if sku == needle {
                    2.0 * weights::SKU as f64
                } else if sku.starts_with(&needle) {
                    weights::SKU as f64
                } else {
                    return None;
                };
                Some((score, record))
            })
            .collect();
        matched.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa)
                .then((a.lang != preferred).cmp(&(b.lang != preferred)))
                .then(a.variation_id.cmp(&b.variation_id))
        });

        let mut seen = HashSet::new();
        matched
            .into_iter()
            .filter(|(_, record)| seen.insert(record.variation_id))
            .map(|(score, record)| Suggestion::from_variation(record, score))
            .collect()
    }
}

fn normalize_sku(sku: &str) -> String {
    sku.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
