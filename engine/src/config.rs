//! Engine tuning knobs.
//!
//! Deserialized from the `[engine]` table of the service configuration.

use serde::{Deserialize, Serialize};

use crate::errors::{LedgerError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How many times an operation re-reads and re-validates after losing an
    /// optimistic lock before the conflict surfaces
    #[serde(default = "default_max_commit_attempts")]
    pub max_commit_attempts: u32,

    /// Slack used when comparing percentages (floating point noise)
    #[serde(default = "default_percentage_tolerance")]
    pub percentage_tolerance: f64,
}

fn default_max_commit_attempts() -> u32 {
    3
}

fn default_percentage_tolerance() -> f64 {
    1e-9
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: default_max_commit_attempts(),
            percentage_tolerance: default_percentage_tolerance(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_commit_attempts == 0 {
            return Err(LedgerError::validation(
                "engine.max_commit_attempts must be at least 1",
            ));
        }
        if !(0.0..=0.01).contains(&self.percentage_tolerance) {
            return Err(LedgerError::validation(format!(
                "engine.percentage_tolerance {} is outside 0..=0.01",
                self.percentage_tolerance
            )));
        }
        Ok(())
    }
}
