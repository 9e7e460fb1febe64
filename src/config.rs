// src/config.rs
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UserOpError};

/// Static gas budgets and fee policy applied to every built operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    pub pre_verification_gas: u64,
    /// Coarse placeholder, inflated by the gas stage before signing.
    pub call_gas_limit: u64,
    pub verification_gas_limit: u64,
    pub gas_inflation_factor: u64,
    /// Headroom added to the suggested tip, in basis points.
    pub fee_headroom_bps: u32,
    pub wait_timeout_ms: u64,
    pub wait_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pre_verification_gas: 50_000,
            call_gas_limit: 35_000,
            verification_gas_limit: 100_000,
            gas_inflation_factor: 15,
            fee_headroom_bps: 1_300,
            wait_timeout_ms: 30_000,
            wait_interval_ms: 5_000,
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.gas_inflation_factor == 0 {
            return Err(UserOpError::InvalidPipeline(
                "gas inflation factor must be non-zero".to_string(),
            ));
        }
        if self.wait_interval_ms == 0 {
            return Err(UserOpError::InvalidPipeline(
                "wait interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_interval_ms)
    }
}
