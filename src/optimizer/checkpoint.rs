//! Durable optimizer progress snapshots: one JSON file per job, replaced
//! atomically with the same tmp-and-rename discipline as the candle store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::worker::ResultMetrics;
use super::OptimizationRequest;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    InProgress,
    Paused,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestSoFar {
    pub params: BTreeMap<String, f64>,
    pub metrics: ResultMetrics,
}

/// Everything needed to resume exactly: position in the plan, the locked
/// best, and the original request (so resume is self-contained).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub job_id: String,
    pub symbol: String,
    pub strategy: String,
    pub round: usize,
    pub stage_index: usize,
    pub tests_completed_in_stage: usize,
    pub total_tests_in_stage: usize,
    pub locked_params: BTreeMap<String, f64>,
    pub best_so_far: Option<BestSoFar>,
    pub status: JobStatus,
    pub request: OptimizationRequest,
}

impl Checkpoint {
    pub fn path(dir: &Path, job_id: &str) -> PathBuf {
        dir.join(format!("{job_id}.json"))
    }

    /// Atomic replace; failures are reported as `CheckpointWrite` so the
    /// caller can log and keep optimizing.
    pub fn save(&self, dir: &Path) -> Result<(), EngineError> {
        let write = || -> Result<()> {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create checkpoint dir: {}", dir.display()))?;
            let target = Self::path(dir, &self.job_id);
            let tmp = target.with_extension(format!(
                "tmp.{}.{}",
                std::process::id(),
                uuid::Uuid::new_v4().simple()
            ));
            let payload = serde_json::to_vec_pretty(self)?;
            std::fs::write(&tmp, payload)
                .with_context(|| format!("Failed to write {}", tmp.display()))?;
            let renamed = std::fs::rename(&tmp, &target);
            if renamed.is_err() && tmp.exists() {
                let _ = std::fs::remove_file(&tmp);
            }
            renamed.with_context(|| format!("Failed to rename {} into place", tmp.display()))?;
            Ok(())
        };
        write().map_err(|e| EngineError::CheckpointWrite(format!("{}: {e}", self.job_id)))
    }

    pub fn load(dir: &Path, job_id: &str) -> Result<Checkpoint> {
        let path = Self::path(dir, job_id);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("No checkpoint at {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Corrupt checkpoint file: {}", path.display()))
    }

    /// Enumerate jobs that can be resumed (in-progress after a crash, or
    /// explicitly paused). Unreadable files are skipped with a warning.
    pub fn list_incomplete(dir: &Path) -> Vec<Checkpoint> {
        let mut out = Vec::new();
        let Ok(entries) = std::fs::read_dir(dir) else {
            return out;
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|raw| serde_json::from_str::<Checkpoint>(&raw).map_err(Into::into))
            {
                Ok(cp) if matches!(cp.status, JobStatus::InProgress | JobStatus::Paused) => {
                    out.push(cp);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("skipping unreadable checkpoint {}: {e}", path.display()),
            }
        }
        out.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::strategy::StrategyTemplate;
    use crate::indicators::{IndicatorKind, IndicatorSpec};
    use crate::optimizer::stages::{OptimizationSchema, ParameterRange};

    fn sample_request() -> OptimizationRequest {
        let mut parameters = BTreeMap::new();
        parameters.insert(
            "fast_length".to_string(),
            ParameterRange {
                min: 3.0,
                max: 15.0,
                step: 1.0,
                default: 5.0,
            },
        );
        OptimizationRequest {
            template: StrategyTemplate {
                name: "sma_cross".into(),
                indicators: vec![IndicatorSpec::new(IndicatorKind::Sma, Some("fast"))
                    .with_param("length", 5.0)],
                entry_logic: "close > fast".into(),
                exit_logic: "close < fast".into(),
                stop_loss: 0.06,
                stop_gain: None,
            },
            schema: OptimizationSchema {
                parameters,
                correlated_groups: vec![],
            },
            symbol: "BTC/USDT".into(),
            timeframe: "1d".into(),
            start_date: Some("2020-01-01".into()),
            end_date: None,
            custom_ranges: None,
            deep_backtest: false,
            job_id: None,
        }
    }

    fn sample_checkpoint(job_id: &str, status: JobStatus) -> Checkpoint {
        Checkpoint {
            job_id: job_id.to_string(),
            symbol: "BTC/USDT".into(),
            strategy: "sma_cross".into(),
            round: 1,
            stage_index: 0,
            tests_completed_in_stage: 400,
            total_tests_in_stage: 1200,
            locked_params: BTreeMap::new(),
            best_so_far: None,
            status,
            request: sample_request(),
        }
    }

    #[test]
    fn save_load_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cp = sample_checkpoint("job-1", JobStatus::Paused);
        cp.save(tmp.path()).unwrap();

        let loaded = Checkpoint::load(tmp.path(), "job-1").unwrap();
        assert_eq!(loaded.status, JobStatus::Paused);
        assert_eq!(loaded.tests_completed_in_stage, 400);
        assert_eq!(loaded.request.symbol, "BTC/USDT");

        // No tmp sidecars survive
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn save_overwrites_previous() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut cp = sample_checkpoint("job-1", JobStatus::InProgress);
        cp.save(tmp.path()).unwrap();
        cp.tests_completed_in_stage = 800;
        cp.status = JobStatus::Completed;
        cp.save(tmp.path()).unwrap();

        let loaded = Checkpoint::load(tmp.path(), "job-1").unwrap();
        assert_eq!(loaded.tests_completed_in_stage, 800);
        assert_eq!(loaded.status, JobStatus::Completed);
    }

    #[test]
    fn list_incomplete_filters_status() {
        let tmp = tempfile::TempDir::new().unwrap();
        sample_checkpoint("a", JobStatus::InProgress)
            .save(tmp.path())
            .unwrap();
        sample_checkpoint("b", JobStatus::Completed)
            .save(tmp.path())
            .unwrap();
        sample_checkpoint("c", JobStatus::Paused)
            .save(tmp.path())
            .unwrap();
        // Garbage file is skipped
        std::fs::write(tmp.path().join("junk.json"), b"{not json").unwrap();

        let incomplete = Checkpoint::list_incomplete(tmp.path());
        let ids: Vec<&str> = incomplete.iter().map(|c| c.job_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn load_missing_is_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(Checkpoint::load(tmp.path(), "nope").is_err());
    }
}
