//! Durable results store: SQLite in WAL mode, one row per evaluated
//! combination keyed by `(job_id, result_index)`. Batched INSERT OR
//! REPLACE means a crash loses at most the in-flight batch.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::Connection;

use super::worker::{ResultMetrics, StageResult};

mod embedded {
    refinery::embed_migrations!("./migrations");
}

pub struct ResultsStore {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone)]
pub struct StoredResult {
    pub result_index: usize,
    pub params: BTreeMap<String, f64>,
    pub metrics: Option<ResultMetrics>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResultsPage {
    pub results: Vec<StoredResult>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
}

impl ResultsStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data dir: {}", parent.display()))?;
        }
        let mut conn = Connection::open(path)
            .with_context(|| format!("Failed to open results db: {}", path.display()))?;
        // WAL keeps readers unblocked while batches commit.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "cache_size", 10_000)?;
        embedded::migrations::runner()
            .run(&mut conn)
            .context("Failed to run results db migrations")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        embedded::migrations::runner().run(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Flush one batch in a single transaction. `start_index` is the global
    /// index of the first result in the batch.
    pub fn save_batch(
        &self,
        job_id: &str,
        start_index: usize,
        results: &[StageResult],
    ) -> Result<()> {
        if results.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().expect("results store lock poisoned");
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO optimization_results
                 (job_id, result_index, params_json, metrics_json, error)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (i, r) in results.iter().enumerate() {
                stmt.execute(rusqlite::params![
                    job_id,
                    (start_index + i) as i64,
                    serde_json::to_string(&r.params)?,
                    serde_json::to_string(&r.metrics)?,
                    r.error,
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!(job_id, start_index, count = results.len(), "saved result batch");
        Ok(())
    }

    pub fn count(&self, job_id: &str) -> Result<usize> {
        let conn = self.conn.lock().expect("results store lock poisoned");
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM optimization_results WHERE job_id = ?1",
            [job_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Paginated read ordered by `result_index` (1-based pages).
    pub fn results(&self, job_id: &str, page: usize, limit: usize) -> Result<ResultsPage> {
        let total = self.count(job_id)?;
        let page = page.max(1);
        let offset = (page - 1) * limit;

        let conn = self.conn.lock().expect("results store lock poisoned");
        let mut stmt = conn.prepare_cached(
            "SELECT result_index, params_json, metrics_json, error
             FROM optimization_results
             WHERE job_id = ?1
             ORDER BY result_index
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![job_id, limit as i64, offset as i64],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        )?;

        let mut results = Vec::new();
        for row in rows {
            let (idx, params_json, metrics_json, error) = row?;
            results.push(StoredResult {
                result_index: idx as usize,
                params: serde_json::from_str(&params_json)?,
                metrics: serde_json::from_str(&metrics_json)?,
                error,
            });
        }
        Ok(ResultsPage {
            results,
            page,
            limit,
            total,
        })
    }

    /// Every stored result for a job, index order.
    pub fn all_results(&self, job_id: &str) -> Result<Vec<StoredResult>> {
        let page = self.results(job_id, 1, usize::MAX / 2)?;
        Ok(page.results)
    }

    /// Results with `result_index >= start`, index order. Used to rebuild
    /// stage scoring state on resume.
    pub fn results_from(&self, job_id: &str, start: usize) -> Result<Vec<StoredResult>> {
        Ok(self
            .all_results(job_id)?
            .into_iter()
            .filter(|r| r.result_index >= start)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(value: f64, error: Option<&str>) -> StageResult {
        let mut params = BTreeMap::new();
        params.insert("length".to_string(), value);
        StageResult {
            params: params.clone(),
            full_params: params,
            metrics: error.is_none().then(|| ResultMetrics {
                total_trades: 10,
                win_rate: 0.5,
                total_return: value / 100.0,
                avg_profit: value / 1000.0,
                sharpe_ratio: value / 50.0,
            }),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn save_and_paginate() {
        let store = ResultsStore::open_in_memory().unwrap();
        let batch: Vec<StageResult> = (0..25).map(|i| result(f64::from(i), None)).collect();
        store.save_batch("job-1", 0, &batch).unwrap();

        assert_eq!(store.count("job-1").unwrap(), 25);
        let page = store.results("job-1", 2, 10).unwrap();
        assert_eq!(page.results.len(), 10);
        assert_eq!(page.results[0].result_index, 10);
        assert_eq!(page.total, 25);

        let page3 = store.results("job-1", 3, 10).unwrap();
        assert_eq!(page3.results.len(), 5);
    }

    #[test]
    fn insert_or_replace_dedupes_index() {
        let store = ResultsStore::open_in_memory().unwrap();
        store.save_batch("job-1", 0, &[result(1.0, None)]).unwrap();
        // Same index written again (crash replay)
        store.save_batch("job-1", 0, &[result(2.0, None)]).unwrap();

        assert_eq!(store.count("job-1").unwrap(), 1);
        let page = store.results("job-1", 1, 10).unwrap();
        assert!((page.results[0].params["length"] - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn error_rows_round_trip() {
        let store = ResultsStore::open_in_memory().unwrap();
        store
            .save_batch("job-1", 0, &[result(1.0, Some("parameter_invalid: bad"))])
            .unwrap();
        let rows = store.all_results("job-1").unwrap();
        assert!(rows[0].metrics.is_none());
        assert_eq!(rows[0].error.as_deref(), Some("parameter_invalid: bad"));
    }

    #[test]
    fn jobs_are_isolated() {
        let store = ResultsStore::open_in_memory().unwrap();
        store.save_batch("job-1", 0, &[result(1.0, None)]).unwrap();
        store.save_batch("job-2", 0, &[result(2.0, None)]).unwrap();
        assert_eq!(store.count("job-1").unwrap(), 1);
        assert_eq!(store.count("job-2").unwrap(), 1);
    }

    #[test]
    fn results_from_filters_by_index() {
        let store = ResultsStore::open_in_memory().unwrap();
        let batch: Vec<StageResult> = (0..10).map(|i| result(f64::from(i), None)).collect();
        store.save_batch("job-1", 0, &batch).unwrap();
        let tail = store.results_from("job-1", 7).unwrap();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].result_index, 7);
    }
}
