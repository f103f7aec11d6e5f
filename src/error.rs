use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::market::MarketError;

#[derive(Debug, Error)]
pub enum FarmError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Payment/session bootstrap failed: {0}")]
    PaymentBootstrap(#[source] MarketError),

    #[error("Marketplace error: {0}")]
    Market(#[from] MarketError),

    #[error("Worker process error: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl FarmError {
    /// Exit code the worker process reports for this error, so the host can
    /// tell a job that never started from one that crashed.
    pub fn exit_code(&self) -> i32 {
        match self {
            FarmError::Configuration(_) | FarmError::Toml(_) => 2,
            FarmError::Artifact(_) => 3,
            FarmError::PaymentBootstrap(_) => 4,
            _ => 1,
        }
    }

    /// Inverse of [`exit_code`](Self::exit_code), used by the host.
    pub fn describe_exit_code(code: i32) -> &'static str {
        match code {
            0 => "finished",
            2 => "invalid job configuration",
            3 => "project packaging failed",
            4 => "payment/session bootstrap failed",
            _ => "worker failed",
        }
    }
}
