//! Weighted build progress.
//!
//! Each stage contributes its `processed / total` ratio scaled by its weight. Only the
//! stages present in the build count, and their weights are normalized to 100. A
//! per-language stage (`searchable:en`, `searchable:de`) splits its stage weight
//! evenly between the languages.

use super::types::*;
use std::collections::BTreeMap;

/// Normalized weight of every stage key of `info`, summing to 100.
pub fn stage_weights(info: &BuildInfo) -> BTreeMap<String, f64> {
    let mut passes: BTreeMap<Stage, usize> = BTreeMap::new();
    for stage in info.stages.values() {
        *passes.entry(stage.stage).or_insert(0) += 1;
    }
    let total_weight: f64 = passes.keys().map(|stage| stage.weight()).sum();
    if total_weight == 0.0 {
        return BTreeMap::new();
    }

    info.stages
        .iter()
        .map(|(key, stage)| {
            let share = stage.stage.weight() / passes[&stage.stage] as f64;
            (key.clone(), share * 100.0 / total_weight)
        })
        .collect()
}

/// Overall progress in percent, `[0, 100]`.
pub fn progress(info: &BuildInfo) -> f64 {
    if info.status == BuildStatus::Completed {
        return 100.0;
    }
    let weights = stage_weights(info);
    let value: f64 = info
        .stages
        .iter()
        .map(|(key, stage)| weights.get(key).copied().unwrap_or(0.0) * stage.ratio())
        .sum();
    value.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::IndexRole;

    fn info_with(stages: &[(Stage, Option<&str>, u64, u64)]) -> BuildInfo {
        let mut info = BuildInfo::new(IndexRole::Live, vec!["en".into()], 0);
        for (stage, lang, total, processed) in stages {
            let mut entry = StageInfo::new(*stage, lang.map(str::to_string), *total, 0);
            entry.processed = *processed;
            info.stages.insert(stage.key(*lang), entry);
        }
        info
    }

    #[test]
    fn test_weights_normalize_over_enabled_stages() {
        let info = info_with(&[
            (Stage::Readable, None, 10, 0),
            (Stage::Searchable, Some("en"), 10, 0),
        ]);
        let weights = stage_weights(&info);
        assert!((weights["readable"] - 37.5).abs() < 1e-9);
        assert!((weights["searchable:en"] - 62.5).abs() < 1e-9);
    }

    #[test]
    fn test_searchable_weight_split_by_language() {
        let info = info_with(&[
            (Stage::Readable, None, 10, 10),
            (Stage::Searchable, Some("en"), 10, 10),
            (Stage::Searchable, Some("de"), 10, 0),
        ]);
        let weights = stage_weights(&info);
        assert!((weights["searchable:en"] - weights["searchable:de"]).abs() < 1e-9);
        assert!((progress(&info) - 68.75).abs() < 1e-9);
    }

    #[test]
    fn test_processed_is_clamped() {
        let info = info_with(&[(Stage::Readable, None, 10, 25)]);
        assert!((progress(&info) - 100.0).abs() < 1e-9);
    }
}
