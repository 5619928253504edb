//! Text → term tokenizer shared by the indexer and the query engine.
//!
//! Tokens are runs of Unicode letters/digits, optionally glued together by "joiner"
//! characters (`PROD-1999/2000` is a single token). In indexer context every joined
//! token is also expanded into its segments and its joiner-stripped forms so SKU-like
//! codes match partial queries.

use regex::Regex;
use std::collections::HashSet;

const INDEXER_JOINERS: &[char] = &['-', '_', '.', '/', ','];
const SEARCH_JOINERS: &[char] = &['-', '_', '.', '/'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerContext {
    /// Stopwords dropped everywhere, joined tokens expanded, long terms truncated.
    Indexer,
    /// Stopwords dropped except on the trailing token, token count capped, long terms truncated.
    Search,
}

impl TokenizerContext {
    pub fn joiners(self) -> &'static [char] {
        match self {
            TokenizerContext::Indexer => INDEXER_JOINERS,
            TokenizerContext::Search => SEARCH_JOINERS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tokenizer {
    context: TokenizerContext,
    pattern: Regex,
    stopwords: HashSet<String>,
    /// Maximum characters per term, both contexts.
    max_term_length: usize,
    /// Search context: maximum number of tokens.
    max_tokens: usize,
}

impl Tokenizer {
    pub fn new(context: TokenizerContext, stopwords: &[String]) -> Result<Self, regex::Error> {
        let joiners: String = context
            .joiners()
            .iter()
            .map(|c| regex::escape(&c.to_string()))
            .collect();
        let pattern = Regex::new(&format!(r"[\p{{L}}\p{{N}}]+(?:[{}][\p{{L}}\p{{N}}]+)*", joiners))?;

        Ok(Self {
            context,
            pattern,
            stopwords: stopwords.iter().map(|w| w.to_lowercase()).collect(),
            max_term_length: 50,
            max_tokens: 10,
        })
    }

    pub fn indexer(stopwords: &[String], max_term_length: usize) -> Result<Self, regex::Error> {
        let mut tokenizer = Self::new(TokenizerContext::Indexer, stopwords)?;
        tokenizer.max_term_length = max_term_length.max(1);
        Ok(tokenizer)
    }

    /// `max_term_length` must match the indexer's, or long query words miss their stored terms.
    pub fn search(stopwords: &[String], max_tokens: usize, max_term_length: usize) -> Result<Self, regex::Error> {
        let mut tokenizer = Self::new(TokenizerContext::Search, stopwords)?;
        tokenizer.max_tokens = max_tokens.max(1);
        tokenizer.max_term_length = max_term_length.max(1);
        Ok(tokenizer)
    }

    pub fn context(&self) -> TokenizerContext {
        self.context
    }

    pub fn is_stopword(&self, term: &str) -> bool {
        self.stopwords.contains(term)
    }

    /// Lowercased, de-duplicated terms in first-seen order.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let raw: Vec<&str> = self.pattern.find_iter(&lowered).map(|m| m.as_str()).collect();

        let terms: Vec<String> = match self.context {
            TokenizerContext::Indexer => raw
                .iter()
                .flat_map(|token| expand_variations(token, INDEXER_JOINERS))
                .filter(|term| !self.is_stopword(term))
                .map(|term| truncate_chars(&term, self.max_term_length))
                .collect(),
            TokenizerContext::Search => {
                let last = raw.len().saturating_sub(1);
                raw.iter()
                    .enumerate()
                    .filter(|(i, token)| *i == last || !self.is_stopword(token))
                    .map(|(_, token)| truncate_chars(token, self.max_term_length))
                    .take(self.max_tokens)
                    .collect()
            }
        };

        dedup_in_order(terms)
    }
}

/// The token itself, then for every joiner it contains: each segment (recursively)
/// and the joiner-stripped concatenation (recursively).
fn expand_variations(token: &str, joiners: &[char]) -> Vec<String> {
    let mut out = vec![token.to_string()];
    for joiner in joiners {
        if !token.contains(*joiner) {
            continue;
        }
        let parts: Vec<&str> = token.split(*joiner).filter(|p| !p.is_empty()).collect();
        for part in parts.iter() {
            out.extend(expand_variations(part, joiners));
        }
        let joined = parts.concat();
        if !joined.is_empty() {
            out.extend(expand_variations(&joined, joiners));
        }
    }
    out
}

fn truncate_chars(term: &str, max: usize) -> String {
    match term.char_indices().nth(max) {
        Some((idx, _)) => term[..idx].to_string(),
        None => term.to_string(),
    }
}

fn dedup_in_order(terms: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    terms
        .into_iter()
        .filter(|term| seen.insert(term.clone()))
        .collect()
}
