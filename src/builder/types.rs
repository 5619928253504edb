use crate::error::IndexError;
use crate::executor::types::RunnerStatus;
use crate::storage::types::{DocType, IndexRole};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle of one build of one role.
///
/// `Idle → Building → Done → Completed`, with `Building → Error` on a fatal failure
/// and `Building → Cancelling → Idle` on cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Idle,
    Building,
    Cancelling,
    /// Every stage finished; waiting for the role swap.
    Done,
    Completed,
    Error,
}

impl BuildStatus {
    /// A build in one of these states blocks a new one.
    pub fn is_active(self) -> bool {
        matches!(self, BuildStatus::Building | BuildStatus::Cancelling | BuildStatus::Done)
    }
}

/// One sub-indexer pass, each driven by its own runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Readable,
    Searchable,
    Taxonomy,
    Vendor,
    Variation,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Readable,
        Stage::Searchable,
        Stage::Taxonomy,
        Stage::Vendor,
        Stage::Variation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Readable => "readable",
            Stage::Searchable => "searchable",
            Stage::Taxonomy => "taxonomy",
            Stage::Vendor => "vendor",
            Stage::Variation => "variation",
        }
    }

    pub fn runner_id(self) -> String {
        format!("catalog_search_{}", self.as_str())
    }

    /// Share of the overall progress bar before normalization.
    pub fn weight(self) -> f64 {
        match self {
            Stage::Readable => 30.0,
            Stage::Searchable => 50.0,
            Stage::Taxonomy => 10.0,
            Stage::Vendor => 5.0,
            Stage::Variation => 5.0,
        }
    }

    /// Stage key inside `BuildInfo::stages`: `searchable:en` for per-language passes.
    pub fn key(self, lang: Option<&str>) -> String {
        match lang {
            Some(lang) => format!("{}:{}", self.as_str(), lang),
            None => self.as_str().to_string(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInfo {
    pub stage: Stage,
    pub lang: Option<String>,
    pub total: u64,
    pub processed: u64,
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
}

impl StageInfo {
    pub fn new(stage: Stage, lang: Option<String>, total: u64, now: u64) -> Self {
        Self {
            stage,
            lang,
            total,
            processed: 0,
            started_at: Some(now),
            ended_at: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Completed share of this stage in `[0, 1]`.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return if self.is_done() { 1.0 } else { 0.0 };
        }
        (self.processed.min(self.total) as f64) / (self.total as f64)
    }
}

/// Operator-facing error attached to a failed build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildError {
    pub code: u32,
    pub message: String,
    pub hint: String,
}

impl From<&IndexError> for BuildError {
    fn from(err: &IndexError) -> Self {
        let code = err.code();
        Self {
            code: code.as_u32(),
            message: err.to_string(),
            hint: code.hint().to_string(),
        }
    }
}

/// Persisted metadata of the last build of one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub role: IndexRole,
    pub status: BuildStatus,
    pub build_id: String,
    pub started_at: u64,
    pub ended_at: Option<u64>,
    pub languages: Vec<String>,
    pub stages: BTreeMap<String, StageInfo>,
    pub total_items: u64,
    pub processed_items: u64,
    pub last_error: Option<BuildError>,
    /// Free-form values recorded with `add_info`.
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl BuildInfo {
    pub fn new(role: IndexRole, languages: Vec<String>, now: u64) -> Self {
        Self {
            role,
            status: BuildStatus::Building,
            build_id: uuid::Uuid::new_v4().to_string(),
            started_at: now,
            ended_at: None,
            languages,
            stages: BTreeMap::new(),
            total_items: 0,
            processed_items: 0,
            last_error: None,
            extra: BTreeMap::new(),
        }
    }

    /// Recomputes the aggregate counters from the stages.
    pub fn refresh_totals(&mut self) {
        self.total_items = self.stages.values().map(|s| s.total).sum();
        self.processed_items = self
            .stages
            .values()
            .map(|s| s.processed.min(s.total))
            .sum();
    }

    pub fn all_stages_done(&self) -> bool {
        self.stages.values().all(StageInfo::is_done)
    }
}

/// Queued unit of work of a stage runner: a set of entity ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageItem {
    pub build_id: String,
    pub ids: Vec<u64>,
    #[serde(default)]
    pub doc_type: Option<DocType>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub taxonomy: Option<String>,
    /// Consecutive attempts that failed transiently.
    #[serde(default)]
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Rebuild the live role in place even when parallel building is configured.
    #[serde(default)]
    pub disable_parallel: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildStatusReport {
    pub live: Option<BuildInfo>,
    pub staging: Option<BuildInfo>,
    /// Progress of the running (or last) build, in percent.
    pub progress: f64,
    pub runners: Vec<RunnerStatus>,
}
