//! Binance spot klines client implementing the exchange capability.
//!
//! Paged `/api/v3/klines` requests with bounded retry: exponential backoff
//! on 429 and 5xx responses and on transport errors, a minimum interval
//! between requests, and hard failure after `MAX_RETRIES` attempts.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde_json::Value;

use super::CandleFetcher;
use crate::engine::types::Candle;
use crate::error::EngineError;

const BASE_URL: &str = "https://api.binance.com";
const TIMEOUT_SECS: u64 = 30;
const MAX_RETRIES: u32 = 5;
const MIN_REQUEST_INTERVAL_MS: u64 = 100;

pub struct BinanceClient {
    client: reqwest::blocking::Client,
    base_url: String,
    last_request_time: Mutex<Instant>,
}

impl BinanceClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            last_request_time: Mutex::new(Instant::now() - Duration::from_secs(1)),
        })
    }

    /// `BTC/USDT` -> `BTCUSDT`.
    fn api_symbol(symbol: &str) -> String {
        symbol.replace('/', "").to_uppercase()
    }

    fn throttle(&self) {
        let mut last = self.last_request_time.lock().expect("throttle lock poisoned");
        let min_interval = Duration::from_millis(MIN_REQUEST_INTERVAL_MS);
        if let Some(remaining) = min_interval.checked_sub(last.elapsed()) {
            std::thread::sleep(remaining);
        }
        *last = Instant::now();
    }

    fn get_with_retry(&self, url: &str, params: &[(&str, String)]) -> Result<Value> {
        for attempt in 0..=MAX_RETRIES {
            self.throttle();

            let resp = match self.client.get(url).query(params).send() {
                Ok(r) => r,
                Err(e) => {
                    if attempt == MAX_RETRIES {
                        return Err(
                            EngineError::ExchangeUnavailable(format!("request failed: {e}")).into()
                        );
                    }
                    let wait = 2u64.pow(attempt);
                    tracing::warn!(
                        "klines request error, retrying in {wait}s (attempt {}/{}): {e}",
                        attempt + 1,
                        MAX_RETRIES
                    );
                    std::thread::sleep(Duration::from_secs(wait));
                    continue;
                }
            };

            let status = resp.status().as_u16();
            if status == 429 || status >= 500 {
                if attempt == MAX_RETRIES {
                    return Err(EngineError::ExchangeUnavailable(format!(
                        "exchange returned status {status} after {MAX_RETRIES} retries"
                    ))
                    .into());
                }
                let wait = 2u64.pow(attempt + 1);
                tracing::warn!(
                    "klines status {status}, backing off {wait}s (attempt {}/{})",
                    attempt + 1,
                    MAX_RETRIES
                );
                std::thread::sleep(Duration::from_secs(wait));
                continue;
            }
            if !resp.status().is_success() {
                return Err(EngineError::ExchangeUnavailable(format!(
                    "unexpected exchange status: {status}"
                ))
                .into());
            }

            return resp.json().context("Failed to parse klines JSON");
        }
        bail!("Max retries exceeded")
    }
}

impl CandleFetcher for BinanceClient {
    fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let params = [
            ("symbol", Self::api_symbol(symbol)),
            ("interval", timeframe.to_string()),
            ("startTime", since_ms.to_string()),
            ("limit", limit.to_string()),
        ];

        let body = self.get_with_retry(&url, &params)?;
        parse_klines(&body)
    }
}

/// Kline rows are arrays: `[open_time, open, high, low, close, volume, ...]`
/// with the OHLCV fields as strings. Malformed rows are skipped.
fn parse_klines(body: &Value) -> Result<Vec<Candle>> {
    let Some(rows) = body.as_array() else {
        bail!("Expected a JSON array of klines, got: {body}");
    };

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(fields) = row.as_array() else {
            continue;
        };
        if fields.len() < 6 {
            continue;
        }
        let Some(ts) = fields[0].as_i64() else {
            continue;
        };
        let parse_f64 = |v: &Value| -> Option<f64> {
            v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_f64())
        };
        let (Some(open), Some(high), Some(low), Some(close), Some(volume)) = (
            parse_f64(&fields[1]),
            parse_f64(&fields[2]),
            parse_f64(&fields[3]),
            parse_f64(&fields[4]),
            parse_f64(&fields[5]),
        ) else {
            continue;
        };
        out.push(Candle {
            timestamp: ts,
            open,
            high,
            low,
            close,
            volume,
        });
    }
    Ok(out)
}
