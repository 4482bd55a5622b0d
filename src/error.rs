use thiserror::Error;

/// Behavioral failure categories. Per-backtest failures are recorded on the
/// result row via [`EngineError::code`] and never abort an optimization run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The candle store cannot satisfy the requested range.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// A cache file was unreadable even after the delete-and-retry pass.
    #[error("cache corrupt: {0}")]
    DataCorruption(String),

    /// Entry/exit expression references unknown columns or helpers.
    #[error("expression bind error: {0}")]
    ExpressionBind(String),

    /// A parameter combination yields a degenerate indicator.
    #[error("invalid parameters: {0}")]
    ParameterInvalid(String),

    /// A batch worker failed; every combination in the batch is marked.
    #[error("worker failed: {0}")]
    WorkerError(String),

    /// Checkpoint could not be written. Logged, never fatal.
    #[error("checkpoint write failed: {0}")]
    CheckpointWrite(String),

    /// The exchange capability failed permanently.
    #[error("exchange unavailable: {0}")]
    ExchangeUnavailable(String),
}

impl EngineError {
    /// Stable machine-readable code stored in result rows and responses.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::DataUnavailable(_) => "data_unavailable",
            EngineError::DataCorruption(_) => "data_corruption",
            EngineError::ExpressionBind(_) => "expression_bind",
            EngineError::ParameterInvalid(_) => "parameter_invalid",
            EngineError::WorkerError(_) => "worker_error",
            EngineError::CheckpointWrite(_) => "checkpoint_write",
            EngineError::ExchangeUnavailable(_) => "exchange_unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            EngineError::DataUnavailable("x".into()).code(),
            "data_unavailable"
        );
        assert_eq!(
            EngineError::ParameterInvalid("x".into()).code(),
            "parameter_invalid"
        );
        assert_eq!(EngineError::WorkerError("x".into()).code(), "worker_error");
    }

    #[test]
    fn display_includes_detail() {
        let err = EngineError::ExpressionBind("unknown column RSI_99".into());
        assert!(err.to_string().contains("RSI_99"));
    }
}
