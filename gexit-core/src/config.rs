use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExitError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on transfers dispatched per node per pass.
    pub batch_size: usize,
    pub workers: usize,
    /// A piece is abandoned once its failure count exceeds this.
    pub max_failures: u32,
    /// Highest share of abandoned pieces an exit may have and still succeed.
    pub max_failed_ratio: f64,
    pub transfer_timeout_secs: u64,
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            workers: 4,
            max_failures: 5,
            max_failed_ratio: 0.10,
            transfer_timeout_secs: 60,
            interval_secs: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let cfg: SchedulerConfig = serde_json::from_slice(&raw)
            .map_err(|e| ExitError::Config(format!("{}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ExitError::Config("batch_size must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(ExitError::Config("workers must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.max_failed_ratio) {
            return Err(ExitError::Config(format!(
                "max_failed_ratio must be within [0, 1], got {}",
                self.max_failed_ratio
            )));
        }
        Ok(())
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
