use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use polars::prelude::*;

use crate::engine::types::Candle;

/// Integer millisecond timestamp column — the primary key of every candle file.
pub const TIMESTAMP_COL: &str = "timestamp";
/// Derived UTC datetime column, kept for diagnostics.
pub const TIMESTAMP_UTC_COL: &str = "timestamp_utc";

/// Candle file path: `<root>/<exchange>/<SAFE_SYMBOL>_<timeframe>.parquet`,
/// where `SAFE_SYMBOL` replaces `/` with `_`.
pub fn candle_path(root: &Path, exchange: &str, symbol: &str, timeframe: &str) -> PathBuf {
    let safe_symbol = symbol.replace('/', "_");
    root.join(exchange)
        .join(format!("{safe_symbol}_{timeframe}.parquet"))
}

/// Timeframe duration in milliseconds (`15m`, `1h`, `1d`, ...).
/// Unknown units fall back to one day, mirroring the tail-overlap rule.
pub fn timeframe_ms(timeframe: &str) -> i64 {
    const DAY: i64 = 86_400_000;
    let tf = timeframe.trim().to_lowercase();
    let (digits, unit) = tf.split_at(tf.len().saturating_sub(1));
    let n: i64 = digits.parse().unwrap_or(1);
    match unit {
        "m" => n * 60_000,
        "h" => n * 3_600_000,
        "d" => n * DAY,
        "w" => n * 7 * DAY,
        _ => DAY,
    }
}

/// Intraday = minute or hour resolution.
pub fn is_intraday(timeframe: &str) -> bool {
    let tf = timeframe.trim().to_lowercase();
    tf.ends_with('m') || tf.ends_with('h')
}

/// Build the canonical candle `DataFrame` from raw bars, deriving the UTC
/// datetime column from the integer timestamp.
pub fn candles_to_dataframe(candles: &[Candle]) -> Result<DataFrame> {
    let ts: Vec<i64> = candles.iter().map(|c| c.timestamp).collect();
    let open: Vec<f64> = candles.iter().map(|c| c.open).collect();
    let high: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let low: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volume: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    let df = df! {
        TIMESTAMP_COL => &ts,
        "open" => &open,
        "high" => &high,
        "low" => &low,
        "close" => &close,
        "volume" => &volume,
    }?;
    with_utc_column(df)
}

/// Ensure the derived `timestamp_utc` Datetime column exists.
pub fn with_utc_column(df: DataFrame) -> Result<DataFrame> {
    if df.schema().contains(TIMESTAMP_UTC_COL) {
        return Ok(df);
    }
    let out = df
        .lazy()
        .with_column(
            col(TIMESTAMP_COL)
                .cast(DataType::Datetime(TimeUnit::Milliseconds, None))
                .alias(TIMESTAMP_UTC_COL),
        )
        .collect()?;
    Ok(out)
}

/// Read only the timestamp column and return `(min, max)` in milliseconds.
/// `Ok(None)` means the file has zero rows. Errors mean the file is
/// unreadable or lacks the timestamp column (treated as corrupt upstream).
pub fn read_timestamp_bounds(path: &Path) -> Result<Option<(i64, i64)>> {
    let path_str = path.to_string_lossy().to_string();
    let df = LazyFrame::scan_parquet(path_str.as_str().into(), ScanArgsParquet::default())?
        .select([col(TIMESTAMP_COL)])
        .collect()
        .context("Failed to read timestamp column")?;

    if df.height() == 0 {
        return Ok(None);
    }
    let ca = df.column(TIMESTAMP_COL)?.i64()?;
    match (ca.min(), ca.max()) {
        (Some(lo), Some(hi)) => Ok(Some((lo, hi))),
        _ => Ok(None),
    }
}

/// Read the `[since_ms, until_ms]` slice, pushing the timestamp predicate
/// into the parquet scan so large intraday files are never fully loaded.
pub fn read_slice(path: &Path, since_ms: i64, until_ms: i64) -> Result<DataFrame> {
    let path_str = path.to_string_lossy().to_string();
    let df = LazyFrame::scan_parquet(path_str.as_str().into(), ScanArgsParquet::default())?
        .filter(
            col(TIMESTAMP_COL)
                .gt_eq(lit(since_ms))
                .and(col(TIMESTAMP_COL).lt_eq(lit(until_ms))),
        )
        .sort([TIMESTAMP_COL], SortMultipleOptions::default())
        .collect()
        .with_context(|| format!("Failed to read parquet slice: {}", path.display()))?;
    with_utc_column(df)
}

/// Read the full file, sorted by timestamp.
pub fn read_all(path: &Path) -> Result<DataFrame> {
    let path_str = path.to_string_lossy().to_string();
    let df = LazyFrame::scan_parquet(path_str.as_str().into(), ScanArgsParquet::default())?
        .sort([TIMESTAMP_COL], SortMultipleOptions::default())
        .collect()
        .with_context(|| format!("Failed to read parquet file: {}", path.display()))?;
    with_utc_column(df)
}

/// Atomic replace: write to `path.tmp.<pid>.<uuid>` in the same directory,
/// then rename over the target. The temp file is removed on any failure so
/// a crash at any point never leaves a partial target file.
pub fn atomic_write(df: &mut DataFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create cache dir: {}", parent.display()))?;
    }
    let tmp_path = path.with_extension(format!(
        "tmp.{}.{}",
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    ));

    let result = (|| -> Result<()> {
        let file = std::fs::File::create(&tmp_path)
            .with_context(|| format!("Failed to create temp file: {}", tmp_path.display()))?;
        ParquetWriter::new(file)
            .finish(df)
            .context("Failed to write parquet")?;
        std::fs::rename(&tmp_path, path).with_context(|| {
            format!("Failed to rename {} -> {}", tmp_path.display(), path.display())
        })?;
        Ok(())
    })();

    if result.is_err() && tmp_path.exists() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}

/// Merge new bars into an existing frame: concat, dedupe by timestamp
/// keeping the latest version (so the tail-overlap bar gets its final
/// close), sort ascending.
pub fn merge_candles(existing: Option<DataFrame>, fresh: DataFrame) -> Result<DataFrame> {
    let merged = match existing {
        Some(old) => concat(
            [old.lazy(), fresh.lazy()],
            UnionArgs {
                rechunk: true,
                to_supertypes: true,
                diagonal: true,
                ..Default::default()
            },
        )?
        .collect()?,
        None => fresh,
    };

    let deduped = merged.unique::<String, String>(
        Some(&[TIMESTAMP_COL.to_string()]),
        UniqueKeepStrategy::Last,
        None,
    )?;
    let sorted = deduped
        .lazy()
        .sort([TIMESTAMP_COL], SortMultipleOptions::default())
        .collect()?;
    Ok(sorted)
}
