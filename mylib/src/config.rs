//! Async computation configuration
//!
//! The runner only needs to know how many progress steps to report and how
//! long each step takes. Everything else about a computation is fixed.

use crate::types::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use mylib_abi::PROGRESS_COMPLETE;

/// Configuration for a single asynchronous computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputationConfig {
    /// Number of steps after the initial 0% report (default: 10)
    #[serde(default = "default_steps")]
    pub steps: u32,

    /// Pause between two progress reports in milliseconds (default: 1000ms)
    #[serde(default = "default_step_interval")]
    pub step_interval_ms: u64,
}

fn default_steps() -> u32 {
    10
}

fn default_step_interval() -> u64 {
    1000
}

impl Default for ComputationConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            step_interval_ms: default_step_interval(),
        }
    }
}

impl ComputationConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the number of steps
    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    /// Builder method: set the pause between steps
    pub fn with_step_interval(mut self, interval: Duration) -> Self {
        self.step_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn step_interval(&self) -> Duration {
        Duration::from_millis(self.step_interval_ms)
    }

    /// Check that progress values will be strictly increasing and end at 100
    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 || self.steps as i64 > PROGRESS_COMPLETE {
            return Err(BridgeError::InvalidArgument(format!(
                "steps must be between 1 and {}, got {}",
                PROGRESS_COMPLETE, self.steps
            )));
        }
        Ok(())
    }

    /// Progress value reported at `step` (0..=steps)
    pub fn progress_at(&self, step: u32) -> i64 {
        step as i64 * PROGRESS_COMPLETE / self.steps as i64
    }
}
