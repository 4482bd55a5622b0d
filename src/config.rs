use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Engine configuration.
///
/// Resolution order: built-in defaults, then an optional TOML file
/// (`CRYPTOLAB_CONFIG`), then individual environment variable overrides.
///
/// | Env Var | Default | Purpose |
/// |---------|---------|---------|
/// | `CRYPTOLAB_DATA_ROOT` | `~/.cryptolab/storage` | Candle cache + results DB |
/// | `CRYPTOLAB_CHECKPOINT_DIR` | `<data_root>/checkpoints` | Optimizer checkpoints |
/// | `CRYPTOLAB_EXCHANGE` | `binance` | Exchange subdirectory / client |
/// | `CRYPTOLAB_CONFIG` | (none) | Path to a TOML overrides file |
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub data_root: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub exchange_id: String,
    /// Inception date for `full_history_if_empty` backfills (ISO date).
    pub inception: String,
    /// Combinations per dispatched batch.
    pub batch_size: usize,
    /// Checkpoint written every N completed batches.
    pub checkpoint_every_batches: usize,
    /// Advisory cap on a single stage's grid size.
    pub max_grid_size: usize,
    /// Composite score weights (normalized Sharpe / normalized return).
    pub score_sharpe_weight: f64,
    pub score_return_weight: f64,
    pub fee: f64,
    pub slippage: f64,
    pub initial_capital: f64,
    /// Heavy metrics computed for the top K ranked results only.
    pub top_k: usize,
    /// Secondary timeframe used by the deep-backtest refiner.
    pub deep_timeframe: String,
    /// Worker pool size. `None` = CPU count minus one.
    pub workers: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            checkpoint_dir: default_data_root().join("checkpoints"),
            exchange_id: "binance".to_string(),
            inception: "2017-01-01".to_string(),
            batch_size: 200,
            checkpoint_every_batches: 1,
            max_grid_size: 1000,
            score_sharpe_weight: 0.7,
            score_return_weight: 0.3,
            fee: 0.000_75,
            slippage: 0.000_5,
            initial_capital: 10_000.0,
            top_k: 10,
            deep_timeframe: "15m".to_string(),
            workers: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment (and optional TOML file).
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var("CRYPTOLAB_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };

        if let Ok(root) = std::env::var("CRYPTOLAB_DATA_ROOT") {
            cfg.data_root = PathBuf::from(root);
            cfg.checkpoint_dir = cfg.data_root.join("checkpoints");
        }
        if let Ok(dir) = std::env::var("CRYPTOLAB_CHECKPOINT_DIR") {
            cfg.checkpoint_dir = PathBuf::from(dir);
        }
        if let Ok(exchange) = std::env::var("CRYPTOLAB_EXCHANGE") {
            cfg.exchange_id = exchange;
        }

        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// SQLite results database path.
    pub fn results_db_path(&self) -> PathBuf {
        self.data_root.join("results.db")
    }

    /// Effective worker pool size.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            let cpus = std::thread::available_parallelism().map_or(2, |n| n.get());
            cpus.saturating_sub(1).max(1)
        })
    }
}

fn default_data_root() -> PathBuf {
    let home = std::env::var("HOME").map_or_else(|_| PathBuf::from("/tmp"), PathBuf::from);
    home.join(".cryptolab").join("storage")
}
