//! Index Builder
//!
//! Drives a full rebuild of the index through one queue runner per stage.
//!
//! ## Build lifecycle
//! 1. **Start**: pick the target role, recreate its tables, record a fresh `BuildInfo`
//!    and enqueue every item set. Stages without work are finished right away.
//! 2. **Stages**: runners index their item sets in the background. Transient failures
//!    are retried, missing entities are skipped, anything else fails the build.
//! 3. **Cascade**: variations are dispatched once the readable stage finishes.
//! 4. **Swap**: when every stage is done the build takes the `role_swap` lock and
//!    promotes staging to live (or marks the in-place live build completed).
//!
//! Parallel builds write into the staging role while queries keep reading live.

use super::info::BuildInfoStore;
use super::progress;
use super::types::*;
use crate::config::Settings;
use crate::error::{ErrorClass, IndexError};
use crate::executor::registry::RunnerRegistry;
use crate::executor::runner::{Dispatcher, QueueRunner, QueueTask, RunnerContext};
use crate::executor::types::now_ms;
use crate::indexer::Indexers;
use crate::indexer::source::EntitySource;
use crate::logs::LogBuffer;
use crate::storage::mutex::NamedMutex;
use crate::storage::options::OptionStore;
use crate::storage::tables::IndexTables;
use crate::storage::types::{DocType, IndexRole, Table};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

const START_LOCK: &str = "build_start";
const SWAP_LOCK: &str = "role_swap";
const CANCEL_POLL: Duration = Duration::from_millis(25);

/// Shared collaborators of the builder.
#[derive(Clone)]
pub struct BuilderContext {
    pub store: Arc<OptionStore>,
    pub mutex: Arc<NamedMutex>,
    pub tables: Arc<IndexTables>,
    pub indexers: Arc<Indexers>,
    pub source: Arc<dyn EntitySource>,
    pub registry: Arc<RunnerRegistry>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub logs: Arc<LogBuffer>,
    pub settings: Settings,
}

/// Runner task of one stage. Holds the builder weakly since the builder owns the runner.
struct StageTask {
    stage: Stage,
    builder: Weak<IndexBuilder>,
}

#[async_trait]
impl QueueTask for StageTask {
    async fn task(&self, item: Value) -> anyhow::Result<Option<Value>> {
        match self.builder.upgrade() {
            Some(builder) => builder.run_item(self.stage, item).await,
            None => Ok(None),
        }
    }

    async fn complete(&self) {
        if let Some(builder) = self.builder.upgrade() {
            builder.stage_completed(self.stage).await;
        }
    }
}

/// Work of one stage (or one language of a stage) computed at build start.
struct StagePlan {
    stage: Stage,
    lang: Option<String>,
    items: Vec<StageItem>,
    total: u64,
}

impl StagePlan {
    fn new(stage: Stage, lang: Option<String>) -> Self {
        Self {
            stage,
            lang,
            items: Vec::new(),
            total: 0,
        }
    }

    fn add(&mut self, ids: &[u64], set_size: usize, make: impl Fn(&[u64]) -> StageItem) {
        for chunk in ids.chunks(set_size.max(1)) {
            self.items.push(make(chunk));
        }
        self.total += ids.len() as u64;
    }
}

pub struct IndexBuilder {
    ctx: BuilderContext,
    info: BuildInfoStore,
    runners: BTreeMap<Stage, Arc<QueueRunner>>,
}

impl IndexBuilder {
    /// Creates the builder and registers one runner per stage.
    pub fn new(ctx: BuilderContext) -> Arc<Self> {
        Arc::new_cyclic(|builder: &Weak<IndexBuilder>| {
            let runner_ctx = RunnerContext {
                store: ctx.store.clone(),
                mutex: ctx.mutex.clone(),
                dispatcher: ctx.dispatcher.clone(),
                settings: ctx.settings.runner.clone(),
                cookies: ctx.settings.server.loopback_cookies.clone(),
            };
            let runners = Stage::ALL
                .iter()
                .map(|&stage| {
                    let task = Arc::new(StageTask {
                        stage,
                        builder: builder.clone(),
                    });
                    let runner = QueueRunner::new(&stage.runner_id(), task, runner_ctx.clone());
                    ctx.registry.register(runner.clone());
                    (stage, runner)
                })
                .collect();

            Self {
                info: BuildInfoStore::new(ctx.store.clone()),
                runners,
                ctx,
            }
        })
    }

    pub fn runner(&self, stage: Stage) -> Option<Arc<QueueRunner>> {
        self.runners.get(&stage).cloned()
    }

    pub fn info_store(&self) -> &BuildInfoStore {
        &self.info
    }

    // --- Build control ---

    /// Starts a full rebuild. Fails with `BuildInProgress` while another build is active.
    pub async fn start_build(&self, options: BuildOptions) -> Result<BuildInfo, IndexError> {
        let Some(token) = self
            .ctx
            .mutex
            .try_acquire(START_LOCK, self.ctx.settings.runner.lock_ttl())
        else {
            return Err(IndexError::BuildInProgress);
        };
        let prepared = self.prepare_build(&options).await;
        self.ctx.mutex.release_owned(START_LOCK, &token);

        let info = prepared?;
        self.dispatch_stages(&info).await;
        Ok(self.info.get(info.role).unwrap_or(info))
    }

    async fn prepare_build(&self, options: &BuildOptions) -> Result<BuildInfo, IndexError> {
        for role in [IndexRole::Live, IndexRole::Staging] {
            if self.info.status(role).is_some_and(BuildStatus::is_active) {
                return Err(IndexError::BuildInProgress);
            }
        }

        let role = self.target_role(options);
        let languages = self.ctx.settings.indexer.active_languages();
        let mut info = BuildInfo::new(role, languages.clone(), now_ms());

        // Source failures abort here, before any table is touched.
        let plans = self.plan(&info.build_id, &languages).await?;

        self.ctx.logs.clear();
        for runner in self.runners.values() {
            while runner.cancel() {}
        }
        self.ctx.tables.drop_tables(role);
        self.ctx.tables.create_tables(role, &self.enabled_tables());

        let now = now_ms();
        for plan in &plans {
            let mut stage = StageInfo::new(plan.stage, plan.lang.clone(), plan.total, now);
            if plan.total == 0 {
                stage.ended_at = Some(now);
            }
            info.stages.insert(plan.stage.key(plan.lang.as_deref()), stage);
        }
        info.refresh_totals();
        self.info.put(&info)?;

        let batch_size = self.ctx.settings.indexer.batch_size.max(1);
        for plan in &plans {
            let Some(runner) = self.runners.get(&plan.stage) else {
                continue;
            };
            for chunk in plan.items.chunks(batch_size) {
                runner.push(chunk.iter().filter_map(|item| serde_json::to_value(item).ok()));
                runner.save()?;
            }
        }

        tracing::info!(
            scope = "builder",
            "Build {} started on {} role: {} items across {} stages",
            info.build_id,
            role,
            info.total_items,
            info.stages.len()
        );
        Ok(info)
    }

    /// Staging when parallel building is on and a completed live index exists.
    fn target_role(&self, options: &BuildOptions) -> IndexRole {
        let parallel = self.ctx.settings.indexer.parallel_building && !options.disable_parallel;
        let live_ready = self.info.status(IndexRole::Live) == Some(BuildStatus::Completed)
            && self.ctx.tables.has_role(IndexRole::Live);
        if parallel && live_ready {
            IndexRole::Staging
        } else {
            IndexRole::Live
        }
    }

    fn enabled_tables(&self) -> Vec<Table> {
        let settings = &self.ctx.settings.indexer;
        let mut tables = vec![Table::Wordlist, Table::Readable];
        if settings.index_taxonomies {
            tables.push(Table::Taxonomy);
        }
        if settings.index_vendors {
            tables.push(Table::Vendor);
        }
        if settings.index_variations {
            tables.push(Table::Variation);
        }
        tables
    }

    async fn plan(&self, build_id: &str, languages: &[String]) -> Result<Vec<StagePlan>, IndexError> {
        let settings = &self.ctx.settings.indexer;
        let source = &self.ctx.source;
        let set_size = settings.item_set_size;

        let mut documents: Vec<(DocType, Vec<u64>)> = Vec::new();
        for name in &settings.doc_types {
            match name.parse::<DocType>() {
                Ok(doc_type) => documents.push((doc_type, source.document_ids(doc_type).await?)),
                Err(e) => tracing::warn!(scope = "builder", "Ignoring document type: {}", e),
            }
        }

        let item = |ids: &[u64]| StageItem {
            build_id: build_id.to_string(),
            ids: ids.to_vec(),
            doc_type: None,
            lang: None,
            taxonomy: None,
            attempts: 0,
        };

        let mut plans = Vec::new();

        let mut readable = StagePlan::new(Stage::Readable, None);
        for (doc_type, ids) in &documents {
            readable.add(ids, set_size, |chunk| StageItem {
                doc_type: Some(*doc_type),
                ..item(chunk)
            });
        }
        plans.push(readable);

        for lang in languages {
            let mut searchable = StagePlan::new(Stage::Searchable, Some(lang.clone()));
            for (doc_type, ids) in &documents {
                searchable.add(ids, set_size, |chunk| StageItem {
                    doc_type: Some(*doc_type),
                    lang: Some(lang.clone()),
                    ..item(chunk)
                });
            }
            plans.push(searchable);
        }

        if settings.index_taxonomies {
            let mut taxonomy = StagePlan::new(Stage::Taxonomy, None);
            for name in &settings.taxonomies {
                let ids = source.term_ids(name).await?;
                taxonomy.add(&ids, set_size, |chunk| StageItem {
                    taxonomy: Some(name.clone()),
                    ..item(chunk)
                });
            }
            plans.push(taxonomy);
        }

        if settings.index_vendors {
            let mut vendor = StagePlan::new(Stage::Vendor, None);
            vendor.add(&source.vendor_ids().await?, set_size, item);
            plans.push(vendor);
        }

        if settings.index_variations {
            let mut variation = StagePlan::new(Stage::Variation, None);
            for (_, ids) in documents.iter().filter(|(dt, _)| *dt == DocType::Product) {
                variation.add(ids, set_size, item);
            }
            plans.push(variation);
        }

        Ok(plans)
    }

    /// Dispatches every stage with work, except variations which wait for readable.
    async fn dispatch_stages(&self, info: &BuildInfo) {
        if info.all_stages_done() {
            self.finish_build(info.role, &info.build_id).await;
            return;
        }
        for (stage, runner) in &self.runners {
            if *stage == Stage::Variation || runner.is_queue_empty() {
                continue;
            }
            let runner = runner.clone();
            tokio::spawn(async move { runner.dispatch().await });
        }
    }

    /// Stops the running build, drops its queued work and its tables.
    pub async fn cancel_build(&self) -> Result<BuildInfo, IndexError> {
        let Some(info) = self.active_build() else {
            return Err(IndexError::InvalidTransition("no build is running".to_string()));
        };
        let role = info.role;
        self.info.update(role, |info| info.status = BuildStatus::Cancelling)?;
        tracing::info!(scope = "builder", "Cancelling build {} on {} role", info.build_id, role);

        // In-flight items see `Cancelling` and return without indexing.
        let deadline = Instant::now() + self.ctx.settings.runner.lock_ttl();
        while self.runners.values().any(|r| r.is_process_running()) && Instant::now() < deadline {
            tokio::time::sleep(CANCEL_POLL).await;
        }
        for runner in self.runners.values() {
            while runner.cancel() {}
        }
        self.ctx.tables.drop_tables(role);

        let now = now_ms();
        let cancelled = self.info.update(role, |info| {
            info.status = BuildStatus::Idle;
            info.ended_at = Some(now);
        })?;
        tracing::info!(scope = "builder", "Build {} cancelled", info.build_id);
        Ok(cancelled.unwrap_or(info))
    }

    /// The build currently in `Building`, staging first.
    pub fn active_build(&self) -> Option<BuildInfo> {
        [IndexRole::Staging, IndexRole::Live]
            .into_iter()
            .filter_map(|role| self.info.get(role))
            .find(|info| info.status == BuildStatus::Building)
    }

    // --- Stage tasks ---

    async fn run_item(&self, stage: Stage, value: Value) -> anyhow::Result<Option<Value>> {
        let mut item: StageItem = match serde_json::from_value(value) {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!(scope = "builder", "Dropping malformed {} item: {}", stage, e);
                return Ok(None);
            }
        };
        let Some(info) = self.active_build() else {
            tracing::debug!(scope = "builder", "No build running, dropping {} item", stage);
            return Ok(None);
        };
        if info.build_id != item.build_id {
            tracing::debug!(scope = "builder", "Dropping {} item of stale build {}", stage, item.build_id);
            return Ok(None);
        }
        let role = info.role;

        let mut done = 0usize;
        let mut failure = None;
        for &id in &item.ids {
            match self.index_one(role, stage, &item, id).await {
                Ok(()) => done += 1,
                Err(e) if e.class() == ErrorClass::Structural => {
                    tracing::warn!(scope = "builder", "Skipping {} {}: {}", stage, id, e);
                    done += 1;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.record_progress(role, stage, &item, done as u64);

        let Some(err) = failure else {
            return Ok(None);
        };

        if err.is_transient() {
            item.attempts = if done > 0 { 1 } else { item.attempts + 1 };
            if item.attempts < self.ctx.settings.runner.max_item_attempts {
                tracing::warn!(
                    scope = "builder",
                    "Transient failure in {} stage, retrying ({}/{}): {}",
                    stage,
                    item.attempts,
                    self.ctx.settings.runner.max_item_attempts,
                    err
                );
                item.ids.drain(..done);
                return Ok(Some(serde_json::to_value(&item)?));
            }
        }

        self.fail(role, &item.build_id, &err);
        Ok(None)
    }

    async fn index_one(&self, role: IndexRole, stage: Stage, item: &StageItem, id: u64) -> Result<(), IndexError> {
        let indexers = &self.ctx.indexers;
        let doc_type = || {
            item.doc_type.ok_or_else(|| IndexError::EntityNotFound {
                doc_type: "document".to_string(),
                id,
            })
        };
        match stage {
            Stage::Readable => {
                indexers.readable.insert(role, doc_type()?, id, None).await?;
            }
            Stage::Searchable => {
                let doc_type = doc_type()?;
                let lang = item.lang.as_deref();
                // A retried item may have written part of its terms already.
                self.ctx.tables.delete_terms(role, doc_type, id, lang)?;
                indexers.searchable.insert(role, doc_type, id, lang).await?;
            }
            Stage::Taxonomy => {
                let taxonomy = item.taxonomy.as_deref().unwrap_or_default();
                indexers.taxonomy.insert(role, taxonomy, id, None).await?;
            }
            Stage::Vendor => {
                indexers.vendor.insert(role, id, None).await?;
            }
            Stage::Variation => {
                indexers.variation.delete(role, id)?;
                indexers.variation.insert(role, id, None).await?;
            }
        }
        Ok(())
    }

    fn record_progress(&self, role: IndexRole, stage: Stage, item: &StageItem, done: u64) {
        if done == 0 {
            return;
        }
        let key = stage.key(item.lang.as_deref());
        let result = self.info.update(role, |info| {
            if info.build_id != item.build_id {
                return;
            }
            if let Some(entry) = info.stages.get_mut(&key) {
                entry.processed = (entry.processed + done).min(entry.total);
            }
        });
        if let Err(e) = result {
            tracing::warn!(scope = "builder", "Failed to record progress of {}: {}", key, e);
        }
    }

    /// Stops the build with an operator-facing error. Queued items then drain as no-ops.
    fn fail(&self, role: IndexRole, build_id: &str, err: &IndexError) {
        tracing::error!(
            scope = "builder",
            "Build {} failed ({}): {}",
            build_id,
            err.code().as_u32(),
            err
        );
        let now = now_ms();
        let result = self.info.update(role, |info| {
            if info.build_id == build_id
                && matches!(info.status, BuildStatus::Building | BuildStatus::Done)
            {
                info.status = BuildStatus::Error;
                info.ended_at = Some(now);
                info.last_error = Some(BuildError::from(err));
            }
        });
        if let Err(e) = result {
            tracing::warn!(scope = "builder", "Failed to record build error: {}", e);
        }
    }

    async fn stage_completed(&self, stage: Stage) {
        let Some(info) = self.active_build() else {
            return;
        };
        let now = now_ms();
        let updated = match self.info.update(info.role, |info| {
            for entry in info.stages.values_mut() {
                if entry.stage == stage && entry.ended_at.is_none() {
                    entry.ended_at = Some(now);
                }
            }
        }) {
            Ok(Some(updated)) => updated,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(scope = "builder", "Failed to record end of {} stage: {}", stage, e);
                return;
            }
        };
        tracing::info!(scope = "builder", "Stage {} of build {} finished", stage, info.build_id);

        if stage == Stage::Readable {
            if let Some(runner) = self.runners.get(&Stage::Variation) {
                if !runner.is_queue_empty() {
                    let runner = runner.clone();
                    tokio::spawn(async move { runner.dispatch().await });
                }
            }
        }

        if updated.all_stages_done() {
            self.finish_build(info.role, &info.build_id).await;
        }
    }

    async fn finish_build(&self, role: IndexRole, build_id: &str) {
        let timeout = Duration::from_secs(self.ctx.settings.runner.swap_lock_timeout_secs);
        if !self.ctx.mutex.acquire(SWAP_LOCK, timeout).await {
            self.fail(role, build_id, &IndexError::LockWaitTimeout(SWAP_LOCK.to_string()));
            return;
        }
        let result = self.promote(role, build_id);
        self.ctx.mutex.release(SWAP_LOCK);
        if let Err(e) = result {
            self.fail(role, build_id, &e);
        }
    }

    fn promote(&self, role: IndexRole, build_id: &str) -> Result<(), IndexError> {
        // Re-checked under the lock: a concurrent stage may have finished the build.
        let Some(info) = self.info.get(role) else {
            return Ok(());
        };
        if info.build_id != build_id || info.status != BuildStatus::Building {
            return Ok(());
        }
        self.info.update(role, |info| info.status = BuildStatus::Done)?;

        if role == IndexRole::Staging {
            self.ctx.tables.swap_roles()?;
            self.info.move_role(IndexRole::Staging, IndexRole::Live)?;
        }
        let now = now_ms();
        self.info.update(IndexRole::Live, |info| {
            info.status = BuildStatus::Completed;
            info.ended_at = Some(now);
        })?;
        tracing::info!(
            scope = "builder",
            "Build {} completed in {} ms ({} items)",
            build_id,
            now.saturating_sub(info.started_at),
            info.total_items
        );
        Ok(())
    }

    // --- Maintenance ---

    /// Roles incremental updates go to: live, and staging while it is being built.
    fn maintenance_roles(&self) -> Vec<IndexRole> {
        let mut roles = Vec::new();
        if self.ctx.tables.has_role(IndexRole::Live) {
            roles.push(IndexRole::Live);
        }
        if self.info.status(IndexRole::Staging) == Some(BuildStatus::Building)
            && self.ctx.tables.has_role(IndexRole::Staging)
        {
            roles.push(IndexRole::Staging);
        }
        roles
    }

    /// Re-indexes documents after they changed in the source. Returns the updates applied.
    pub async fn update_documents(&self, doc_type: DocType, ids: &[u64]) -> Result<usize, IndexError> {
        let mut applied = 0;
        for role in self.maintenance_roles() {
            for &id in ids {
                match self.ctx.indexers.update_document(role, doc_type, id).await {
                    Ok(()) => applied += 1,
                    Err(e) if e.class() == ErrorClass::Structural => {
                        tracing::warn!(scope = "builder", "Skipping update of {} {} in {}: {}", doc_type, id, role, e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        tracing::debug!(scope = "builder", "Updated {} {} documents", applied, doc_type);
        Ok(applied)
    }

    pub fn delete_documents(&self, doc_type: DocType, ids: &[u64]) -> Result<usize, IndexError> {
        let mut applied = 0;
        for role in self.maintenance_roles() {
            for &id in ids {
                self.ctx.indexers.delete_document(role, doc_type, id)?;
                applied += 1;
            }
        }
        Ok(applied)
    }

    // --- Info ---

    pub fn progress(&self, role: IndexRole) -> f64 {
        self.info.get(role).map(|info| progress::progress(&info)).unwrap_or(0.0)
    }

    pub fn status(&self) -> BuildStatusReport {
        let live = self.info.get(IndexRole::Live);
        let staging = self.info.get(IndexRole::Staging);
        let progress = match self.active_build().or_else(|| live.clone()) {
            Some(info) => progress::progress(&info),
            None => 0.0,
        };
        BuildStatusReport {
            live,
            staging,
            progress,
            runners: self.ctx.registry.statuses(),
        }
    }

    /// A field of the build info of `role` (defaults to the running build, else live).
    ///
    /// `progress` and `orphans` are computed on demand.
    pub fn get_info(&self, key: &str, role: Option<IndexRole>) -> Option<Value> {
        let role = role.unwrap_or_else(|| self.default_info_role());
        match key {
            "progress" => self
                .info
                .get(role)
                .and_then(|info| serde_json::to_value(progress::progress(&info)).ok()),
            "orphans" => {
                let orphans = self.ctx.tables.orphaned_terms(role).ok()?;
                serde_json::to_value(orphans).ok()
            }
            _ => self.info.get_value(role, key),
        }
    }

    /// Records a free-form value on the running build (or live). `false` if there is none.
    pub fn add_info(&self, key: &str, value: Value) -> Result<bool, IndexError> {
        let role = self.default_info_role();
        Ok(self.info.add_value(role, key, value)?)
    }

    fn default_info_role(&self) -> IndexRole {
        self.active_build()
            .map(|info| info.role)
            .unwrap_or(IndexRole::Live)
    }
}
