//! Saga timings and token parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed parameters of the settlement transfer.
///
/// None of these come from the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Token program that owns the mint.
    pub program: String,
    pub mint: String,
    /// Service-controlled token account the transfer draws from.
    pub source: String,
    /// Transfer amount in base units.
    pub amount: u64,
    pub decimals: u8,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            program: "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA".to_string(),
            mint: "9JUomKyopNpak1kZvBA6taUfV9rJxctLeFB8ac2iFDaH".to_string(),
            source: "AHDHUrKFvYmrAm2cLScAD4xp9UFjw5JcEdAo19ofvUjZ".to_string(),
            amount: 1_000_000_000,
            decimals: 9,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Overall bound on waiting for an oracle answer.
    pub locate_deadline: Duration,
    /// How long a located record waits for phase 2 before the sweep drops it.
    pub approval_ttl: Duration,
    pub token: TokenConfig,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            locate_deadline: Duration::from_secs(30),
            approval_ttl: Duration::from_secs(300),
            token: TokenConfig::default(),
        }
    }
}
