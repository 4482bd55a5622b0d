pub mod binance;
pub mod parquet;
pub mod store;

use anyhow::Result;

use crate::engine::types::Candle;

/// The exchange capability the candle store consumes. One paged request:
/// up to `limit` bars ascending from `since_ms`. The exchange may return
/// fewer rows than `limit`; rate limiting is the implementation's concern.
pub trait CandleFetcher: Send + Sync {
    fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>>;
}

/// Options controlling a candle-store fetch (see `CandleStore::fetch`).
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Never touch the network; return the cached intersection or empty.
    pub read_only: bool,
    /// On an empty cache, backfill from the configured inception date
    /// instead of the requested `since`.
    pub full_history_if_empty: bool,
    /// Permit intraday head-backfills longer than ~900 days.
    pub allow_large_backfill: bool,
}

impl FetchOptions {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    pub fn full_history() -> Self {
        Self {
            full_history_if_empty: true,
            ..Self::default()
        }
    }
}
