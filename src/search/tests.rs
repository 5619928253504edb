//! Search Module Tests
//!
//! ## Test Scopes
//! - **Tokenizer**: normalization, joiner variations, search-context stopword rule,
//!   determinism (property based).
//! - **Ranking**: token coverage, prefix expansion, id tie-break.
//! - **Readiness**: unready indexes answer through the fallback.
//! - **Presentation**: entity-type order, limits, variations, suggestion filters.

#[cfg(test)]
mod tests {
    use crate::builder::info::BuildInfoStore;
    use crate::builder::types::{BuildInfo, BuildStatus};
    use crate::config::{IndexerSettings, SearchSettings};
    use crate::indexer::filters::FilterChain;
    use crate::indexer::source::{EntitySource, MemoryCatalog};
    use crate::indexer::types::*;
    use crate::indexer::{IndexerContext, Indexers};
    use crate::search::engine::{QueryEngine, SearchContext};
    use crate::search::tokenizer::{Tokenizer, TokenizerContext};
    use crate::search::types::*;
    use crate::storage::options::{OptionStore, Scope};
    use crate::storage::tables::IndexTables;
    use crate::storage::types::*;

    use proptest::prelude::*;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Arc;

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|w| w.to_string()).collect()
    }

    // ============================================================
    // TOKENIZER TESTS
    // ============================================================

    #[test]
    fn test_tokenize_lowercases_and_dedups() {
        let tokenizer = Tokenizer::indexer(&[], 50).unwrap();

        let tokens = tokenizer.tokenize("Red SHOE, red shoe!");

        assert_eq!(tokens, words(&["red", "shoe"]));
        assert_eq!(tokenizer.context(), TokenizerContext::Indexer);
    }

    #[test]
    fn test_indexer_expands_joined_codes() {
        let tokenizer = Tokenizer::indexer(&[], 50).unwrap();

        let tokens = tokenizer.tokenize("PROD-1999/2000");

        // The whole code first, then its variations
        assert_eq!(tokens[0], "prod-1999/2000");
        for expected in ["prod", "1999/2000", "prod1999/2000", "1999", "2000", "19992000"] {
            assert!(tokens.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[test]
    fn test_indexer_drops_stopwords_and_truncates() {
        let tokenizer = Tokenizer::indexer(&words(&["the"]), 4).unwrap();

        let tokens = tokenizer.tokenize("The waterproof boot");

        assert_eq!(tokens, words(&["wate", "boot"]));
    }

    #[test]
    fn test_search_keeps_trailing_stopword() {
        let tokenizer = Tokenizer::search(&words(&["the", "a"]), 10, 50).unwrap();

        // Leading stopwords go, the final token stays
        assert_eq!(tokenizer.tokenize("the red shoe"), words(&["red", "shoe"]));
        assert_eq!(tokenizer.tokenize("a red shoe the"), words(&["red", "shoe", "the"]));
        assert_eq!(tokenizer.tokenize("red a"), words(&["red", "a"]));
    }

    #[test]
    fn test_search_caps_token_count() {
        let tokenizer = Tokenizer::search(&[], 2, 50).unwrap();

        assert_eq!(tokenizer.tokenize("one two three"), words(&["one", "two"]));
    }

    #[test]
    fn test_search_truncates_like_indexer() {
        let indexer = Tokenizer::indexer(&[], 8).unwrap();
        let search = Tokenizer::search(&[], 10, 8).unwrap();

        let long = "waterproofing membrane";

        assert_eq!(search.tokenize(long), words(&["waterpro", "membrane"]));
        assert_eq!(search.tokenize(long), indexer.tokenize(long));
    }

    proptest! {
        #[test]
        fn prop_tokenize_is_deterministic(text in "\\PC{0,40}") {
            let tokenizer = Tokenizer::indexer(&words(&["the", "a"]), 50).unwrap();

            let first = tokenizer.tokenize(&text);
            let second = tokenizer.tokenize(&text);

            prop_assert_eq!(&first, &second);
            let unique: HashSet<&String> = first.iter().collect();
            prop_assert_eq!(unique.len(), first.len());
        }

        #[test]
        fn prop_search_context_respects_cap(text in "[a-z ]{0,80}", cap in 1usize..6) {
            let tokenizer = Tokenizer::search(&[], cap, 50).unwrap();
            prop_assert!(tokenizer.tokenize(&text).len() <= cap);
        }
    }

    // ============================================================
    // ENGINE FIXTURES
    // ============================================================

    struct Fixture {
        engine: Arc<QueryEngine>,
        catalog: Arc<MemoryCatalog>,
    }

    fn document(id: u64, doc_type: DocType, title: &str, sku: Option<&str>) -> EntitySnapshot {
        EntitySnapshot {
            id,
            doc_type,
            lang: "en".to_string(),
            title: title.to_string(),
            content: String::new(),
            excerpt: None,
            link: format!("/{}/{}", doc_type, id),
            thumbnail_url: None,
            price: None,
            sku: sku.map(str::to_string),
            terms: BTreeMap::new(),
            breadcrumbs: Vec::new(),
            custom: BTreeMap::new(),
            vendor_id: None,
        }
    }

    fn product(id: u64, title: &str) -> EntitySnapshot {
        document(id, DocType::Product, title, None)
    }

    fn variation(variation_id: u64, product_id: u64, sku: &str) -> Variation {
        Variation {
            variation_id,
            product_id,
            lang: "en".to_string(),
            sku: Some(sku.to_string()),
            title: format!("Variation {}", variation_id),
            link: format!("/product/{}?variation={}", product_id, variation_id),
            price: Some(10.0),
            thumbnail_url: None,
        }
    }

    fn category(term_id: u64, name: &str) -> TaxonomyTerm {
        TaxonomyTerm {
            term_id,
            taxonomy: "product_cat".to_string(),
            lang: "en".to_string(),
            name: name.to_string(),
            link: format!("/category/{}", term_id),
            image_url: None,
            count: 1,
            parents: Vec::new(),
        }
    }

    /// Indexes everything into a live index marked `Completed` (when `ready`).
    async fn fixture_with(
        settings: SearchSettings,
        filters: FilterChain<Vec<Suggestion>>,
        documents: Vec<EntitySnapshot>,
        variations: Vec<Variation>,
        terms: Vec<TaxonomyTerm>,
        ready: bool,
    ) -> Fixture {
        let indexer_settings = IndexerSettings {
            stopwords: words(&["the", "a"]),
            ..Default::default()
        };
        let tables = IndexTables::new();
        tables.create_tables(IndexRole::Live, &Table::ALL);
        let catalog = MemoryCatalog::new();
        for v in variations {
            catalog.upsert_variation(v);
        }
        for term in &terms {
            catalog.upsert_term(term.clone());
        }

        let indexers = Indexers::new(
            IndexerContext {
                tables: tables.clone(),
                source: catalog.clone(),
                tokenizer: Tokenizer::indexer(&indexer_settings.stopwords, indexer_settings.max_term_length).unwrap(),
                settings: indexer_settings.clone(),
            },
            FilterChain::new(),
        );
        for doc in &documents {
            catalog.upsert_document(doc.clone());
            indexers.update_document(IndexRole::Live, doc.doc_type, doc.id).await.unwrap();
        }
        for term in &terms {
            indexers
                .taxonomy
                .insert(IndexRole::Live, &term.taxonomy, term.term_id, None)
                .await
                .unwrap();
        }

        let store = OptionStore::new(Scope::Site(1));
        if ready {
            let mut info = BuildInfo::new(IndexRole::Live, words(&["en"]), 0);
            info.status = BuildStatus::Completed;
            BuildInfoStore::new(store.clone()).put(&info).unwrap();
        }

        let engine = QueryEngine::new(
            SearchContext {
                tables,
                source: catalog.clone(),
                store,
                settings,
                indexer: indexer_settings,
            },
            filters,
        )
        .unwrap();
        Fixture { engine, catalog }
    }

    async fn fixture(documents: Vec<EntitySnapshot>) -> Fixture {
        fixture_with(
            SearchSettings::default(),
            FilterChain::new(),
            documents,
            Vec::new(),
            Vec::new(),
            true,
        )
        .await
    }

    fn ids(response: &SearchResponse, kind: SuggestionKind) -> Vec<u64> {
        response
            .suggestions
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.id)
            .collect()
    }

    // ============================================================
    // RANKING TESTS
    // ============================================================

    #[tokio::test]
    async fn test_all_tokens_must_match() {
        let f = fixture(vec![product(1, "Red Shoe"), product(2, "Red Hat"), product(3, "Blue Shoe")]).await;

        let response = f.engine.search("red shoe", None);

        assert_eq!(response.source, ResultSource::Index);
        assert_eq!(ids(&response, SuggestionKind::Product), vec![1]);
        assert_eq!(response.total, 1);
    }

    #[tokio::test]
    async fn test_equal_scores_tie_break_by_id() {
        let f = fixture(vec![product(3, "Blue Shoe"), product(1, "Red Shoe")]).await;

        let response = f.engine.search("shoe", Some("en"));

        assert_eq!(ids(&response, SuggestionKind::Product), vec![1, 3]);
        assert_eq!(response.suggestions[0].score, response.suggestions[1].score);
    }

    #[tokio::test]
    async fn test_trailing_token_is_prefix_expanded() {
        let f = fixture(vec![product(1, "Red Shoe"), product(2, "Red Hat")]).await;

        assert_eq!(ids(&f.engine.search("sho", None), SuggestionKind::Product), vec![1]);
        assert_eq!(ids(&f.engine.search("red sh", None), SuggestionKind::Product), vec![1]);
        // Only the trailing token is a prefix
        assert!(f.engine.search("sh red", None).suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_word_longer_than_term_limit_is_found() {
        // ARRANGE: 60 characters, stored cut to the 50 character term limit
        let long_word = "x".repeat(60);
        let f = fixture(vec![product(1, &format!("Widget {}", long_word)), product(2, "Widget")]).await;

        // ACT
        let response = f.engine.search(&long_word, None);

        // ASSERT
        assert_eq!(response.source, ResultSource::Index);
        assert_eq!(ids(&response, SuggestionKind::Product), vec![1]);
        assert_eq!(ids(&f.engine.search(&format!("widget {}", long_word), None), SuggestionKind::Product), vec![1]);
    }

    #[tokio::test]
    async fn test_partial_matches_when_not_all_tokens_required() {
        let settings = SearchSettings {
            match_all_tokens: false,
            ..Default::default()
        };
        let f = fixture_with(
            settings,
            FilterChain::new(),
            vec![product(1, "Red Shoe"), product(2, "Red Boot")],
            Vec::new(),
            Vec::new(),
            true,
        )
        .await;

        let response = f.engine.search("red boot", None);

        // Full coverage ranks first
        assert_eq!(ids(&response, SuggestionKind::Product), vec![2, 1]);
        assert!(response.suggestions[0].score > response.suggestions[1].score);
    }

    #[tokio::test]
    async fn test_title_outranks_content() {
        let mut described = product(1, "Boot");
        described.content = "<p>Goes well with any shoe</p>".to_string();
        let f = fixture(vec![described, product(2, "Shoe")]).await;

        let response = f.engine.search("shoe", None);

        assert_eq!(ids(&response, SuggestionKind::Product), vec![2, 1]);
    }

    // ============================================================
    // READINESS TESTS
    // ============================================================

    #[tokio::test]
    async fn test_unready_index_uses_fallback() {
        // ARRANGE: Indexed, but the build never completed
        let f = fixture_with(
            SearchSettings::default(),
            FilterChain::new(),
            vec![product(1, "Red Shoe")],
            Vec::new(),
            Vec::new(),
            false,
        )
        .await;

        // ACT
        let direct = f.engine.search("shoe", None);
        let answered = f.engine.search_with_fallback("shoe", None).await;

        // ASSERT
        assert_eq!(direct.source, ResultSource::NotReady);
        assert!(direct.suggestions.is_empty());
        assert_eq!(answered.source, ResultSource::Fallback);
        assert_eq!(ids(&answered, SuggestionKind::Product), vec![1]);
    }

    #[tokio::test]
    async fn test_unindexed_language_is_not_ready() {
        let f = fixture(vec![product(1, "Red Shoe")]).await;

        assert!(f.engine.is_ready(Some("en")));
        assert!(!f.engine.is_ready(Some("fr")));
        assert_eq!(f.engine.search("shoe", Some("fr")).source, ResultSource::NotReady);
    }

    #[tokio::test]
    async fn test_empty_phrase_gives_empty_response() {
        let f = fixture(vec![product(1, "Red Shoe")]).await;

        let response = f.engine.search("   ", None);

        assert_eq!(response.source, ResultSource::Index);
        assert_eq!(response.total, 0);
        assert!(response.suggestions.is_empty());

        // Punctuation only tokenizes to nothing
        let mut session = f.engine.session();
        session.set_phrase("?!");
        assert_eq!(session.search_products(), 0);
        assert!(!session.has_results());
    }

    // ============================================================
    // PRESENTATION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_session_api() {
        let f = fixture(vec![product(1, "Red Shoe"), document(5, DocType::Post, "Shoe care guide", None)]).await;

        let mut session = f.engine.session();
        session.set_phrase("shoe");
        session.set_lang(Some("en"));
        assert_eq!(session.tokens(), &words(&["shoe"])[..]);
        assert_eq!(session.search_products(), 1);
        assert_eq!(session.search_posts(), 1);
        assert!(session.has_results());

        let response = session.send_results();
        let kinds: Vec<SuggestionKind> = response.suggestions.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![SuggestionKind::Product, SuggestionKind::Post]);
        assert!(response.query_time_ms >= response.index_time_ms);
    }

    #[tokio::test]
    async fn test_taxonomies_come_first_and_limits_apply() {
        let products: Vec<EntitySnapshot> = (1..=10).map(|id| product(id, "Running Shoe")).collect();
        let f = fixture_with(
            SearchSettings::default(),
            FilterChain::new(),
            products,
            Vec::new(),
            vec![category(50, "Shoes")],
            true,
        )
        .await;

        let response = f.engine.search("shoe", None);

        assert_eq!(response.suggestions[0].kind, SuggestionKind::Taxonomy);
        assert_eq!(response.suggestions[0].taxonomy.as_deref(), Some("product_cat"));
        assert_eq!(ids(&response, SuggestionKind::Product), vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(response.total, 8);
    }

    #[tokio::test]
    async fn test_exact_variation_sku_is_listed_first() {
        // ARRANGE
        let parent = document(10, DocType::Product, "Trail Runner", Some("PROD-1999"));
        let f = fixture_with(
            SearchSettings::default(),
            FilterChain::new(),
            vec![parent],
            vec![variation(101, 10, "PROD-1999/2000"), variation(102, 10, "PROD-1999/2100")],
            Vec::new(),
            true,
        )
        .await;

        // ACT: Exact variation SKU
        let exact = f.engine.search("PROD-1999/2000", None);

        // ASSERT
        assert_eq!(exact.suggestions.len(), 1);
        assert_eq!(exact.suggestions[0].variation_id, Some(101));
        assert_eq!(exact.suggestions[0].id, 10);

        // ACT: Parent SKU matches both variations by prefix, then the parent itself
        let partial = f.engine.search("prod-1999", None);
        let variation_ids: Vec<Option<u64>> = partial.suggestions.iter().map(|s| s.variation_id).collect();
        assert_eq!(variation_ids, vec![Some(101), Some(102), None]);
        assert_eq!(partial.suggestions[2].id, 10);
    }

    #[tokio::test]
    async fn test_suggestion_filters_run_before_sending() {
        let mut filters: FilterChain<Vec<Suggestion>> = FilterChain::new();
        filters.register("hide_posts", |suggestions: Vec<Suggestion>| -> Vec<Suggestion> {
            suggestions
                .into_iter()
                .filter(|s| s.kind != SuggestionKind::Post)
                .collect()
        });
        let f = fixture_with(
            SearchSettings::default(),
            filters,
            vec![product(1, "Red Shoe"), document(5, DocType::Post, "Shoe care guide", None)],
            Vec::new(),
            Vec::new(),
            true,
        )
        .await;

        let response = f.engine.search("shoe", None);

        assert_eq!(response.total, 1);
        assert_eq!(response.suggestions[0].kind, SuggestionKind::Product);
        assert!(f.catalog.search("shoe", None, 10).await.unwrap().len() >= 2);
    }
}
