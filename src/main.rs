use anyhow::Context;
use catalog_search::app::{AppContext, LOG_CAPACITY};
use catalog_search::config::Settings;
use catalog_search::executor::healthcheck;
use catalog_search::indexer::source::{EntitySource, MemoryCatalog};
use catalog_search::logs::LogBuffer;
use catalog_search::storage::types::{DocType, IndexRole};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "catalog-search", version, about = "Catalog search index and query server")]
struct Cli {
    /// Base URL of a running server, for the client commands.
    #[arg(long, global = true, env = "CATALOG_SEARCH_NODE", default_value = "http://127.0.0.1:7700")]
    node: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the HTTP server, the runners and the healthcheck loop.
    Serve {
        #[arg(long, env = "CATALOG_SEARCH_CONFIG")]
        config: Option<PathBuf>,
        /// JSON catalog served as the entity source.
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// Overrides `server.bind`.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Starts a full rebuild.
    Build {
        #[arg(long)]
        disable_parallel: bool,
    },
    /// Cancels the running build.
    Cancel,
    /// Prints both build records, progress and runner states.
    Status,
    /// Re-indexes documents in place.
    Update {
        #[arg(required = true)]
        ids: Vec<u64>,
        #[arg(long, default_value = "product")]
        doc_type: DocType,
    },
    /// Removes documents from the index.
    Delete {
        #[arg(required = true)]
        ids: Vec<u64>,
        #[arg(long, default_value = "product")]
        doc_type: DocType,
    },
    /// Reads one build info value, or the whole status without a key.
    GetInfo {
        key: Option<String>,
        #[arg(long)]
        role: Option<IndexRole>,
    },
    /// Prints the captured log of the current build.
    ShowLogs {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    Search {
        phrase: String,
        #[arg(long)]
        lang: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let node = cli.node.trim_end_matches('/').to_string();

    match cli.command {
        Command::Serve {
            config,
            catalog,
            bind,
        } => serve(config, catalog, bind).await,
        Command::Build { disable_parallel } => {
            post(&node, "/build", json!({ "disable_parallel": disable_parallel })).await
        }
        Command::Cancel => post(&node, "/build/cancel", json!({})).await,
        Command::Status => get(&node, "/build/status", &[]).await,
        Command::Update { ids, doc_type } => {
            post(&node, "/index/update", json!({ "doc_type": doc_type, "ids": ids })).await
        }
        Command::Delete { ids, doc_type } => {
            post(&node, "/index/delete", json!({ "doc_type": doc_type, "ids": ids })).await
        }
        Command::GetInfo { key: None, .. } => get(&node, "/build/status", &[]).await,
        Command::GetInfo {
            key: Some(key),
            role,
        } => {
            let mut query = vec![("key", key)];
            if let Some(role) = role {
                query.push(("role", role.to_string()));
            }
            get(&node, "/build/info", &query).await
        }
        Command::ShowLogs { limit } => get(&node, "/logs", &[("limit", limit.to_string())]).await,
        Command::Search { phrase, lang } => {
            let mut query = vec![("q", phrase)];
            if let Some(lang) = lang {
                query.push(("lang", lang));
            }
            get(&node, "/search", &query).await
        }
    }
}

async fn serve(config: Option<PathBuf>, catalog: Option<PathBuf>, bind: Option<String>) -> anyhow::Result<()> {
    let logs = LogBuffer::new(LOG_CAPACITY);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(logs.layer())
        .init();

    let mut settings = Settings::load(config.as_deref())?;
    if let Some(bind) = bind {
        settings.server.bind = bind;
    }

    let source: Arc<dyn EntitySource> = match catalog {
        Some(path) => MemoryCatalog::load(&path)?,
        None => {
            tracing::warn!(scope = "app", "No --catalog given, serving an empty catalog");
            MemoryCatalog::new()
        }
    };

    let app = AppContext::new(settings, source, logs)?;
    healthcheck::spawn_loop(app.registry.clone(), app.settings.runner.healthcheck_interval());

    let bind_addr = app.settings.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;

    tracing::info!(scope = "app", "HTTP server listening on {}", bind_addr);
    tracing::info!(scope = "app", "Press Ctrl+C to shutdown");

    axum::serve(listener, app.router()).await?;

    Ok(())
}

async fn post(node: &str, path: &str, body: Value) -> anyhow::Result<()> {
    let response = reqwest::Client::new()
        .post(format!("{}{}", node, path))
        .json(&body)
        .send()
        .await
        .with_context(|| format!("POST {}{}", node, path))?;
    print_response(response).await
}

async fn get(node: &str, path: &str, query: &[(&str, String)]) -> anyhow::Result<()> {
    let response = reqwest::Client::new()
        .get(format!("{}{}", node, path))
        .query(query)
        .send()
        .await
        .with_context(|| format!("GET {}{}", node, path))?;
    print_response(response).await
}

/// Pretty-prints the JSON body. Non-2xx answers become the process' error.
async fn print_response(response: reqwest::Response) -> anyhow::Result<()> {
    let status = response.status();
    let body: Value = response.json().await.context("decoding response")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        anyhow::bail!("server answered {}", status);
    }
    Ok(())
}
