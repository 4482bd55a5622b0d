//! Incremental OHLCV store: one parquet file per (exchange, symbol,
//! timeframe), appended by delta downloads and replaced atomically.
//!
//! Read path decisions use only the timestamp column; slice reads push the
//! range predicate into the parquet scan. A corrupt or empty file is
//! deleted and the fetch retried exactly once.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use polars::prelude::*;

use super::parquet::{
    atomic_write, candle_path, candles_to_dataframe, is_intraday, merge_candles, read_all,
    read_slice, read_timestamp_bounds, timeframe_ms, TIMESTAMP_COL,
};
use super::{CandleFetcher, FetchOptions};
use crate::engine::types::{Candle, CandleSeries};
use crate::error::EngineError;

const PAGE_LIMIT: usize = 1000;
/// Intraday head-backfills longer than this are refused unless
/// `allow_large_backfill` is set.
const MAX_INTRADAY_BACKFILL_DAYS: i64 = 900;
/// Empty-slice fallback: a cache ending within this many days of the
/// requested end is still usable for indicator warm-up.
const STALE_CACHE_MAX_DAYS: i64 = 600;
const MIN_USABLE_ROWS: usize = 100;

const INTRADAY_TIMEFRAMES: &[&str] = &["1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h"];

const DAY_MS: i64 = 86_400_000;

/// Cache coverage report for a (symbol, timeframe) intraday file.
#[derive(Debug, Clone)]
pub struct IntradayCoverage {
    pub available: bool,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub reason: Option<String>,
}

pub struct CandleStore {
    root: PathBuf,
    exchange_id: String,
    inception_ms: i64,
    fetcher: Arc<dyn CandleFetcher>,
}

impl CandleStore {
    pub fn new(
        root: PathBuf,
        exchange_id: &str,
        inception: &str,
        fetcher: Arc<dyn CandleFetcher>,
    ) -> Result<Self> {
        let date = NaiveDate::parse_from_str(inception, "%Y-%m-%d")
            .with_context(|| format!("Invalid inception date: {inception}"))?;
        let inception_ms = date
            .and_hms_opt(0, 0, 0)
            .expect("midnight is valid")
            .and_utc()
            .timestamp_millis();
        Ok(Self {
            root,
            exchange_id: exchange_id.to_string(),
            inception_ms,
            fetcher,
        })
    }

    pub fn path_for(&self, symbol: &str, timeframe: &str) -> PathBuf {
        candle_path(&self.root, &self.exchange_id, symbol, timeframe)
    }

    /// Fetch candles for `[since, until]` (inclusive, milliseconds), filling
    /// cache gaps from the exchange capability as needed. `since` defaults
    /// to the configured inception; `until` defaults to now.
    pub fn fetch(
        &self,
        symbol: &str,
        timeframe: &str,
        since_ms: Option<i64>,
        until_ms: Option<i64>,
        options: FetchOptions,
    ) -> Result<DataFrame> {
        let mut since = since_ms.unwrap_or(self.inception_ms);
        let mut until = until_ms.unwrap_or_else(|| Utc::now().timestamp_millis());
        if until < since {
            tracing::warn!(
                symbol,
                timeframe,
                since,
                until,
                "until precedes since; swapping bounds"
            );
            std::mem::swap(&mut since, &mut until);
        }
        self.fetch_inner(symbol, timeframe, since, until, options, 0)
    }

    /// Same as [`fetch`], returning the engine's column-vector form.
    pub fn fetch_series(
        &self,
        symbol: &str,
        timeframe: &str,
        since_ms: Option<i64>,
        until_ms: Option<i64>,
        options: FetchOptions,
    ) -> Result<CandleSeries> {
        let df = self.fetch(symbol, timeframe, since_ms, until_ms, options)?;
        CandleSeries::from_dataframe(&df)
    }

    /// Intraday wrapper for the deep-backtest refiner: validates the
    /// timeframe and never triggers a full-history backfill.
    pub fn fetch_intraday(
        &self,
        symbol: &str,
        timeframe: &str,
        since_ms: Option<i64>,
        until_ms: Option<i64>,
        options: FetchOptions,
    ) -> Result<CandleSeries> {
        if !INTRADAY_TIMEFRAMES.contains(&timeframe) {
            return Err(EngineError::ParameterInvalid(format!(
                "invalid intraday timeframe: {timeframe} (expected one of {INTRADAY_TIMEFRAMES:?})"
            ))
            .into());
        }
        let opts = FetchOptions {
            full_history_if_empty: false,
            ..options
        };
        self.fetch_series(symbol, timeframe, since_ms, until_ms, opts)
    }

    /// Report whether the intraday cache covers a requested start.
    pub fn intraday_coverage(
        &self,
        symbol: &str,
        timeframe: &str,
        since_ms: Option<i64>,
    ) -> IntradayCoverage {
        let path = self.path_for(symbol, timeframe);
        if !path.exists() {
            return IntradayCoverage {
                available: false,
                start_ms: None,
                end_ms: None,
                reason: Some(format!("no cached {timeframe} data for {symbol}")),
            };
        }
        match read_timestamp_bounds(&path) {
            Ok(Some((lo, hi))) => {
                if let Some(since) = since_ms {
                    if lo > since {
                        return IntradayCoverage {
                            available: false,
                            start_ms: Some(lo),
                            end_ms: Some(hi),
                            reason: Some(format!(
                                "cached data starts at {lo} but requested from {since}"
                            )),
                        };
                    }
                }
                IntradayCoverage {
                    available: true,
                    start_ms: Some(lo),
                    end_ms: Some(hi),
                    reason: None,
                }
            }
            Ok(None) => IntradayCoverage {
                available: false,
                start_ms: None,
                end_ms: None,
                reason: Some("cache file exists but is empty".to_string()),
            },
            Err(e) => IntradayCoverage {
                available: false,
                start_ms: None,
                end_ms: None,
                reason: Some(format!("error reading cache: {e}")),
            },
        }
    }

    #[allow(clippy::too_many_lines)]
    fn fetch_inner(
        &self,
        symbol: &str,
        timeframe: &str,
        since: i64,
        until: i64,
        options: FetchOptions,
        depth: u8,
    ) -> Result<DataFrame> {
        let path = self.path_for(symbol, timeframe);

        if options.read_only {
            if !path.exists() {
                tracing::info!(symbol, timeframe, "read-only: no cache file; returning empty");
                return Ok(DataFrame::empty());
            }
            return match read_slice(&path, since, until) {
                Ok(df) => Ok(df),
                Err(e) => {
                    tracing::error!(symbol, timeframe, "read-only slice failed: {e}");
                    Ok(DataFrame::empty())
                }
            };
        }

        // Coverage decision from the timestamp column alone.
        let mut bounds: Option<(i64, i64)> = None;
        if path.exists() {
            match read_timestamp_bounds(&path) {
                Ok(Some(b)) => bounds = Some(b),
                Ok(None) => {
                    // Zero rows: treat as corrupt, delete and retry once.
                    return self.retry_after_corruption(
                        symbol, timeframe, since, until, options, depth, &path,
                        "cache file has zero rows",
                    );
                }
                Err(e) => {
                    return self.retry_after_corruption(
                        symbol,
                        timeframe,
                        since,
                        until,
                        options,
                        depth,
                        &path,
                        &format!("unreadable cache file: {e}"),
                    );
                }
            }
        }

        // Plan head/tail downloads.
        let period = timeframe_ms(timeframe);
        let mut downloads: Vec<(i64, i64)> = Vec::new();
        match bounds {
            None => {
                let start = if options.full_history_if_empty {
                    tracing::info!(
                        symbol,
                        timeframe,
                        "empty cache; downloading full history from inception"
                    );
                    self.inception_ms
                } else {
                    since
                };
                downloads.push((start, until));
            }
            Some((first_ts, last_ts)) => {
                if first_ts > since {
                    let requested_days = (until - since) / DAY_MS;
                    if is_intraday(timeframe)
                        && requested_days > MAX_INTRADAY_BACKFILL_DAYS
                        && !options.allow_large_backfill
                    {
                        tracing::warn!(
                            symbol,
                            timeframe,
                            requested_days,
                            "intraday cache does not cover requested start; skipping large head backfill"
                        );
                    } else {
                        tracing::info!(
                            symbol,
                            timeframe,
                            cache_start = first_ts,
                            requested_since = since,
                            "backfilling missing head"
                        );
                        downloads.push((since, first_ts - 1));
                    }
                }
                if last_ts < until {
                    // Deliberate one-bar overlap so a previously partial
                    // final bar is refreshed; dedup keeps the new version.
                    let tail_since = (last_ts - period + 1).max(0);
                    downloads.push((tail_since, until));
                } else if first_ts <= since {
                    tracing::info!(symbol, timeframe, "local data covers request; no fetch");
                }
            }
        }

        // Fast path: no download needed, slice straight off the file.
        if downloads.is_empty() {
            let slice = read_slice(&path, since, until)?;
            if slice.height() > 0 {
                self.log_returned(&slice, symbol, timeframe);
                return Ok(slice);
            }
            return self.empty_slice_fallback(symbol, timeframe, since, until, &path);
        }

        // Download, merge, atomically replace.
        let mut fetched: Vec<Candle> = Vec::new();
        let mut fetch_error: Option<anyhow::Error> = None;
        for (dl_since, dl_until) in downloads {
            match self.download_loop(symbol, timeframe, dl_since, dl_until) {
                Ok(mut bars) => fetched.append(&mut bars),
                Err(e) => {
                    fetch_error = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = fetch_error {
            if bounds.is_none() && fetched.is_empty() {
                // First-ever backfill with nothing usable: propagate.
                return Err(e);
            }
            // Abort the update; cached data is intact thanks to the
            // atomic-rename discipline.
            tracing::warn!(symbol, timeframe, "fetch failed, serving cached data: {e}");
        }

        if !fetched.is_empty() {
            let fresh = candles_to_dataframe(&fetched)?;
            let existing = if bounds.is_some() {
                Some(read_all(&path)?)
            } else {
                None
            };
            let mut merged = merge_candles(existing, fresh)?;
            tracing::info!(
                symbol,
                timeframe,
                rows = merged.height(),
                "saving updated cache to {}",
                path.display()
            );
            atomic_write(&mut merged, &path)?;
        }

        if !path.exists() {
            tracing::warn!(symbol, timeframe, "no data available and no cache file exists");
            return Ok(DataFrame::empty());
        }

        let slice = read_slice(&path, since, until)?;
        if slice.height() > 0 {
            self.log_returned(&slice, symbol, timeframe);
            return Ok(slice);
        }
        self.empty_slice_fallback(symbol, timeframe, since, until, &path)
    }

    #[allow(clippy::too_many_arguments)]
    fn retry_after_corruption(
        &self,
        symbol: &str,
        timeframe: &str,
        since: i64,
        until: i64,
        options: FetchOptions,
        depth: u8,
        path: &std::path::Path,
        reason: &str,
    ) -> Result<DataFrame> {
        tracing::warn!(symbol, timeframe, "{reason}; deleting cache file");
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("failed to delete corrupt cache file {}: {e}", path.display());
        }
        if depth == 0 {
            // Recursion depth strictly bounded to one retry.
            return self.fetch_inner(symbol, timeframe, since, until, options, 1);
        }
        Err(EngineError::DataCorruption(format!(
            "{symbol} {timeframe}: cache unreadable after retry ({reason})"
        ))
        .into())
    }

    /// The requested slice is empty but the cache may still be usable for
    /// indicator warm-up: return the full cached range when it is large
    /// enough and ends within `STALE_CACHE_MAX_DAYS` of the requested end.
    fn empty_slice_fallback(
        &self,
        symbol: &str,
        timeframe: &str,
        since: i64,
        until: i64,
        path: &std::path::Path,
    ) -> Result<DataFrame> {
        let Some((lo, hi)) = read_timestamp_bounds(path).unwrap_or(None) else {
            return Ok(DataFrame::empty());
        };
        let days_short = (until - hi) / DAY_MS;
        let df = read_all(path)?;
        if days_short < STALE_CACHE_MAX_DAYS && df.height() > MIN_USABLE_ROWS {
            tracing::warn!(
                symbol,
                timeframe,
                cache_start = lo,
                cache_end = hi,
                requested_since = since,
                requested_until = until,
                "requested range not covered; returning available cache data"
            );
            return Ok(df);
        }
        tracing::warn!(
            symbol,
            timeframe,
            "no data in requested range and cache is too old or too small"
        );
        Ok(DataFrame::empty())
    }

    /// Page the exchange capability: advance `since` past the last returned
    /// bar, stop on an empty page, a short page, or passing `until`.
    fn download_loop(
        &self,
        symbol: &str,
        timeframe: &str,
        since: i64,
        until: i64,
    ) -> Result<Vec<Candle>> {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner} {prefix:.bold} {msg}")
                .expect("valid template"),
        );
        pb.set_prefix(format!("{symbol} {timeframe}"));

        let mut all: Vec<Candle> = Vec::new();
        let mut current = since;

        while current <= until {
            pb.set_message(format!("downloading from {current} ({} bars)", all.len()));
            let batch = match self.fetcher.fetch_ohlcv(symbol, timeframe, current, PAGE_LIMIT) {
                Ok(b) => b,
                Err(e) => {
                    pb.abandon_with_message(format!("error after {} bars", all.len()));
                    if all.is_empty() {
                        return Err(e);
                    }
                    tracing::warn!(symbol, timeframe, "partial download kept: {e}");
                    return Ok(all);
                }
            };
            if batch.is_empty() {
                break;
            }
            let page_len = batch.len();
            let last_ts = batch.last().expect("non-empty batch").timestamp;
            for c in batch {
                if c.timestamp <= until {
                    all.push(c);
                }
            }
            let next = last_ts + 1;
            if next <= current {
                break;
            }
            current = next;
            if page_len < PAGE_LIMIT {
                break; // reached the end of exchange history
            }
        }

        pb.finish_with_message(format!("{} bars", all.len()));
        Ok(all)
    }

    fn log_returned(&self, df: &DataFrame, symbol: &str, timeframe: &str) {
        if let Ok(ca) = df.column(TIMESTAMP_COL).and_then(|c| Ok(c.i64()?.clone())) {
            tracing::info!(
                symbol,
                timeframe,
                rows = df.height(),
                start = ca.min().unwrap_or(0),
                end = ca.max().unwrap_or(0),
                "returning candle slice"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const DAY: i64 = DAY_MS;

    /// Serves a deterministic daily grid from `origin` to `available_until`,
    /// recording every requested `since` for assertions.
    struct FakeExchange {
        origin: i64,
        available_until: i64,
        page_limit: usize,
        calls: Mutex<Vec<i64>>,
        fail: Mutex<bool>,
    }

    impl FakeExchange {
        fn new(origin: i64, available_until: i64) -> Self {
            Self {
                origin,
                available_until,
                page_limit: PAGE_LIMIT,
                calls: Mutex::new(Vec::new()),
                fail: Mutex::new(false),
            }
        }

        fn calls(&self) -> Vec<i64> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CandleFetcher for FakeExchange {
        fn fetch_ohlcv(
            &self,
            _symbol: &str,
            _timeframe: &str,
            since_ms: i64,
            limit: usize,
        ) -> Result<Vec<Candle>> {
            self.calls.lock().unwrap().push(since_ms);
            if *self.fail.lock().unwrap() {
                anyhow::bail!("exchange down");
            }
            let limit = limit.min(self.page_limit);
            let first = if since_ms <= self.origin {
                self.origin
            } else {
                // round up to the next grid point
                let diff = since_ms - self.origin;
                self.origin + ((diff + DAY - 1) / DAY) * DAY
            };
            let mut out = Vec::new();
            let mut ts = first;
            while ts <= self.available_until && out.len() < limit {
                let day_index = ((ts - self.origin) / DAY) as f64;
                out.push(Candle {
                    timestamp: ts,
                    open: 100.0 + day_index,
                    high: 101.0 + day_index,
                    low: 99.0 + day_index,
                    close: 100.5 + day_index,
                    volume: 10.0 + day_index,
                });
                ts += DAY;
            }
            Ok(out)
        }
    }

    fn make_store(tmp: &tempfile::TempDir, fake: Arc<FakeExchange>) -> CandleStore {
        CandleStore::new(tmp.path().to_path_buf(), "binance", "2017-01-01", fake).unwrap()
    }

    // 2017-01-01T00:00:00Z in ms
    const T0: i64 = 1_483_228_800_000;

    #[test]
    fn read_only_without_cache_returns_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fake = Arc::new(FakeExchange::new(T0, T0 + 100 * DAY));
        let store = make_store(&tmp, fake.clone());

        let df = store
            .fetch("BTC/USDT", "1d", Some(T0), Some(T0 + 10 * DAY), FetchOptions::read_only())
            .unwrap();
        assert_eq!(df.height(), 0);
        assert!(fake.calls().is_empty(), "read-only must not hit the network");
    }

    #[test]
    fn first_fetch_backfills_and_slices() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fake = Arc::new(FakeExchange::new(T0, T0 + 100 * DAY));
        let store = make_store(&tmp, fake);

        let df = store
            .fetch(
                "BTC/USDT",
                "1d",
                Some(T0 + 10 * DAY),
                Some(T0 + 19 * DAY),
                FetchOptions::default(),
            )
            .unwrap();
        assert_eq!(df.height(), 10);
        assert!(store.path_for("BTC/USDT", "1d").exists());
    }

    #[test]
    fn full_history_if_empty_starts_at_inception() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fake = Arc::new(FakeExchange::new(T0, T0 + 50 * DAY));
        let store = make_store(&tmp, fake.clone());

        let df = store
            .fetch(
                "BTC/USDT",
                "1d",
                Some(T0 + 30 * DAY),
                Some(T0 + 40 * DAY),
                FetchOptions::full_history(),
            )
            .unwrap();
        // Slice honors the request...
        assert_eq!(df.height(), 11);
        // ...but the cache holds everything from inception.
        let (lo, hi) = read_timestamp_bounds(&store.path_for("BTC/USDT", "1d"))
            .unwrap()
            .unwrap();
        assert_eq!(lo, T0);
        assert_eq!(hi, T0 + 50 * DAY);
        assert_eq!(fake.calls()[0], T0);
    }

    #[test]
    fn gapless_tail_refresh_with_one_bar_overlap() {
        let tmp = tempfile::TempDir::new().unwrap();
        // Phase 1: exchange has 10 days of data
        let fake = Arc::new(FakeExchange::new(T0, T0 + 9 * DAY));
        let store = make_store(&tmp, fake);
        store
            .fetch("BTC/USDT", "1d", Some(T0), Some(T0 + 9 * DAY), FetchOptions::default())
            .unwrap();

        // Phase 2: exchange extended to 15 days; request the wider range
        let fake2 = Arc::new(FakeExchange::new(T0, T0 + 14 * DAY));
        let store2 = make_store(&tmp, fake2.clone());
        let df = store2
            .fetch("BTC/USDT", "1d", Some(T0), Some(T0 + 14 * DAY), FetchOptions::default())
            .unwrap();

        // Returned slice: 15 bars, gap-free, no duplicates
        assert_eq!(df.height(), 15);
        let ts: Vec<i64> = df
            .column(TIMESTAMP_COL)
            .unwrap()
            .i64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        for (i, &t) in ts.iter().enumerate() {
            assert_eq!(t, T0 + i as i64 * DAY);
        }

        // Delta download started one bar before the cached max (overlap)
        let calls = fake2.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], T0 + 8 * DAY + 1);

        // Resulting file equals a fresh download of the full range
        let fresh_dir = tempfile::TempDir::new().unwrap();
        let fake3 = Arc::new(FakeExchange::new(T0, T0 + 14 * DAY));
        let fresh_store = make_store(&fresh_dir, fake3);
        let fresh = fresh_store
            .fetch("BTC/USDT", "1d", Some(T0), Some(T0 + 14 * DAY), FetchOptions::default())
            .unwrap();
        let fresh_ts: Vec<i64> = fresh
            .column(TIMESTAMP_COL)
            .unwrap()
            .i64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(ts, fresh_ts);
    }

    #[test]
    fn head_gap_is_backfilled() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fake = Arc::new(FakeExchange::new(T0, T0 + 60 * DAY));
        let store = make_store(&tmp, fake);
        // Seed cache covering days 30..40 only
        store
            .fetch(
                "BTC/USDT",
                "1d",
                Some(T0 + 30 * DAY),
                Some(T0 + 40 * DAY),
                FetchOptions::default(),
            )
            .unwrap();

        // Request starting earlier: head must be filled
        let df = store
            .fetch(
                "BTC/USDT",
                "1d",
                Some(T0 + 20 * DAY),
                Some(T0 + 40 * DAY),
                FetchOptions::default(),
            )
            .unwrap();
        assert_eq!(df.height(), 21);
    }

    #[test]
    fn large_intraday_backfill_is_refused() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fake = Arc::new(FakeExchange::new(T0, T0 + 2000 * DAY));
        let store = make_store(&tmp, fake.clone());

        // Seed a 15m cache late in the history (pretend grid is 15m-spaced;
        // the fake serves daily spacing, which is fine for coverage logic).
        store
            .fetch(
                "BTC/USDT",
                "15m",
                Some(T0 + 1500 * DAY),
                Some(T0 + 1510 * DAY),
                FetchOptions::default(),
            )
            .unwrap();
        let calls_before = fake.calls().len();

        // Request from inception: >900 days intraday head backfill -> refused
        let df = store
            .fetch(
                "BTC/USDT",
                "15m",
                Some(T0),
                Some(T0 + 1510 * DAY),
                FetchOptions::default(),
            )
            .unwrap();
        // Only what exists is returned; no new head download happened
        assert!(df.height() > 0);
        assert_eq!(fake.calls().len(), calls_before);

        // With allow_large_backfill the head download is permitted
        let df = store
            .fetch(
                "BTC/USDT",
                "15m",
                Some(T0 + 1400 * DAY),
                Some(T0 + 1510 * DAY),
                FetchOptions {
                    allow_large_backfill: true,
                    ..FetchOptions::default()
                },
            )
            .unwrap();
        assert!(fake.calls().len() > calls_before);
        assert!(df.height() >= 111);
    }

    #[test]
    fn corrupt_file_is_deleted_and_refetched_once() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fake = Arc::new(FakeExchange::new(T0, T0 + 20 * DAY));
        let store = make_store(&tmp, fake);

        let path = store.path_for("BTC/USDT", "1d");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not a parquet file").unwrap();

        let df = store
            .fetch("BTC/USDT", "1d", Some(T0), Some(T0 + 9 * DAY), FetchOptions::default())
            .unwrap();
        assert_eq!(df.height(), 10);
    }

    #[test]
    fn first_backfill_failure_propagates() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fake = Arc::new(FakeExchange::new(T0, T0 + 20 * DAY));
        *fake.fail.lock().unwrap() = true;
        let store = make_store(&tmp, fake);

        let result = store.fetch(
            "BTC/USDT",
            "1d",
            Some(T0),
            Some(T0 + 9 * DAY),
            FetchOptions::default(),
        );
        assert!(result.is_err());
        assert!(!store.path_for("BTC/USDT", "1d").exists());
    }

    #[test]
    fn tail_fetch_failure_serves_cached_data() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fake = Arc::new(FakeExchange::new(T0, T0 + 9 * DAY));
        let store = make_store(&tmp, fake.clone());
        store
            .fetch("BTC/USDT", "1d", Some(T0), Some(T0 + 9 * DAY), FetchOptions::default())
            .unwrap();

        // Network goes down; a wider request still returns cached bars.
        *fake.fail.lock().unwrap() = true;
        let df = store
            .fetch("BTC/USDT", "1d", Some(T0), Some(T0 + 14 * DAY), FetchOptions::default())
            .unwrap();
        assert_eq!(df.height(), 10);
    }

    #[test]
    fn paging_advances_past_last_timestamp() {
        let tmp = tempfile::TempDir::new().unwrap();
        // 2500 bars of history: two full pages plus a short final page.
        let fake = Arc::new(FakeExchange::new(T0, T0 + 2499 * DAY));
        let store = make_store(&tmp, fake.clone());

        let df = store
            .fetch(
                "BTC/USDT",
                "1d",
                Some(T0),
                Some(T0 + 2499 * DAY),
                FetchOptions::default(),
            )
            .unwrap();
        assert_eq!(df.height(), 2500);

        let calls = fake.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], T0);
        // Each page advances to one past the last returned bar
        assert_eq!(calls[1], T0 + 999 * DAY + 1);
        assert_eq!(calls[2], T0 + 1999 * DAY + 1);

        // No duplicates or gaps across page boundaries
        let ts: Vec<i64> = df
            .column(TIMESTAMP_COL)
            .unwrap()
            .i64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        for (i, &t) in ts.iter().enumerate() {
            assert_eq!(t, T0 + i as i64 * DAY);
        }
    }

    #[test]
    fn intraday_timeframe_validation() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fake = Arc::new(FakeExchange::new(T0, T0 + 10 * DAY));
        let store = make_store(&tmp, fake);
        assert!(store
            .fetch_intraday("BTC/USDT", "1d", Some(T0), Some(T0 + DAY), FetchOptions::default())
            .is_err());
    }

    #[test]
    fn intraday_coverage_reports_missing_head() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fake = Arc::new(FakeExchange::new(T0, T0 + 20 * DAY));
        let store = make_store(&tmp, fake);

        let cov = store.intraday_coverage("BTC/USDT", "15m", Some(T0));
        assert!(!cov.available);

        store
            .fetch(
                "BTC/USDT",
                "15m",
                Some(T0 + 5 * DAY),
                Some(T0 + 10 * DAY),
                FetchOptions::default(),
            )
            .unwrap();
        let cov = store.intraday_coverage("BTC/USDT", "15m", Some(T0));
        assert!(!cov.available);
        assert!(cov.reason.unwrap().contains("starts at"));

        let cov = store.intraday_coverage("BTC/USDT", "15m", Some(T0 + 6 * DAY));
        assert!(cov.available);
    }
}
