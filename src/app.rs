//! Process wiring: builds every service from `Settings` and exposes the HTTP router.

use crate::builder::builder::{BuilderContext, IndexBuilder};
use crate::builder::handlers::*;
use crate::config::{DispatchMode, Settings};
use crate::executor::dispatcher::{LoopbackDispatcher, SpawnDispatcher};
use crate::executor::handlers::{handle_healthcheck, handle_runner_dispatch};
use crate::executor::protocol::{ENDPOINT_HEALTHCHECK, ENDPOINT_RUNNER_DISPATCH};
use crate::executor::registry::RunnerRegistry;
use crate::executor::runner::Dispatcher;
use crate::indexer::filters::FilterChain;
use crate::indexer::source::EntitySource;
use crate::indexer::{IndexerContext, Indexers};
use crate::logs::LogBuffer;
use crate::search::engine::{QueryEngine, SearchContext};
use crate::search::handlers::handle_search;
use crate::search::tokenizer::Tokenizer;
use crate::storage::mutex::NamedMutex;
use crate::storage::options::{OptionStore, Scope};
use crate::storage::tables::IndexTables;

use anyhow::Result;
use axum::{
    Extension, Router,
    routing::{get, post},
};
use std::sync::Arc;

/// Entries kept for `show-logs`.
pub const LOG_CAPACITY: usize = 1000;

pub struct AppContext {
    pub settings: Settings,
    pub store: Arc<OptionStore>,
    pub tables: Arc<IndexTables>,
    pub registry: Arc<RunnerRegistry>,
    pub logs: Arc<LogBuffer>,
    pub builder: Arc<IndexBuilder>,
    pub engine: Arc<QueryEngine>,
}

impl AppContext {
    /// `logs` is shared with the tracing capture layer installed by the caller.
    pub fn new(settings: Settings, source: Arc<dyn EntitySource>, logs: Arc<LogBuffer>) -> Result<Self> {
        settings.validate()?;
        let scope = if settings.store.network_wide {
            Scope::Network
        } else {
            Scope::Site(settings.store.site_id)
        };
        let store = OptionStore::new(scope);
        let mutex = NamedMutex::new(settings.runner.lock_ttl());
        let tables = IndexTables::new();
        let registry = RunnerRegistry::new();

        let dispatcher: Arc<dyn Dispatcher> = match settings.runner.dispatch_mode {
            DispatchMode::Spawn => Arc::new(SpawnDispatcher::new(Arc::downgrade(&registry))),
            DispatchMode::Loopback => Arc::new(LoopbackDispatcher::new(
                &settings.server.loopback_base(),
                settings.runner.dispatch_attempts,
            )),
        };

        let tokenizer = Tokenizer::indexer(&settings.indexer.stopwords, settings.indexer.max_term_length)?;
        let indexers = Indexers::new(
            IndexerContext {
                tables: tables.clone(),
                source: source.clone(),
                settings: settings.indexer.clone(),
                tokenizer,
            },
            FilterChain::new(),
        );

        let builder = IndexBuilder::new(BuilderContext {
            store: store.clone(),
            mutex,
            tables: tables.clone(),
            indexers,
            source: source.clone(),
            registry: registry.clone(),
            dispatcher,
            logs: logs.clone(),
            settings: settings.clone(),
        });

        let engine = QueryEngine::new(
            SearchContext {
                tables: tables.clone(),
                source,
                store: store.clone(),
                settings: settings.search.clone(),
                indexer: settings.indexer.clone(),
            },
            FilterChain::new(),
        )?;

        tracing::info!(
            scope = "app",
            "Services ready: {} runners, {:?} dispatch",
            registry.runner_count(),
            settings.runner.dispatch_mode
        );

        Ok(Self {
            settings,
            store,
            tables,
            registry,
            logs,
            builder,
            engine,
        })
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/build", post(handle_start_build))
            .route("/build/cancel", post(handle_cancel_build))
            .route("/build/status", get(handle_build_status))
            .route("/build/info", get(handle_get_info))
            .route("/index/update", post(handle_update_documents))
            .route("/index/delete", post(handle_delete_documents))
            .route("/search", get(handle_search))
            .route("/logs", get(handle_show_logs))
            .route(ENDPOINT_RUNNER_DISPATCH, post(handle_runner_dispatch))
            .route(ENDPOINT_HEALTHCHECK, post(handle_healthcheck))
            .layer(Extension(self.builder.clone()))
            .layer(Extension(self.engine.clone()))
            .layer(Extension(self.registry.clone()))
            .layer(Extension(self.logs.clone()))
    }
}
