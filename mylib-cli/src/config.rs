//! Configuration loading and parsing
//!
//! Every section is optional. Missing values fall back to the classic demo
//! inputs: greet "Alice", vectors [1, 3, 3, 7] and [1, 9, 8, 4].

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Path to the shared library (default: next to the executable)
    pub library: Option<PathBuf>,
    #[serde(default)]
    pub greeting: GreetingConfig,
    #[serde(default)]
    pub vectors: VectorsConfig,
    #[serde(default)]
    pub counter: CounterConfig,
    #[serde(default)]
    pub async_computation: AsyncConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GreetingConfig {
    #[serde(default = "default_name")]
    pub name: String,
}

impl Default for GreetingConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
        }
    }
}

fn default_name() -> String {
    "Alice".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorsConfig {
    #[serde(default = "default_vector_a")]
    pub a: Vec<i64>,
    #[serde(default = "default_vector_b")]
    pub b: Vec<i64>,
}

impl Default for VectorsConfig {
    fn default() -> Self {
        Self {
            a: default_vector_a(),
            b: default_vector_b(),
        }
    }
}

fn default_vector_a() -> Vec<i64> {
    vec![1, 3, 3, 7]
}

fn default_vector_b() -> Vec<i64> {
    vec![1, 9, 8, 4]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CounterConfig {
    #[serde(default = "default_increments")]
    pub increments: u32,
    /// Increment from this many rayon workers at once (1 = sequential)
    #[serde(default = "default_workers")]
    pub parallel_workers: usize,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            increments: default_increments(),
            parallel_workers: default_workers(),
        }
    }
}

fn default_increments() -> u32 {
    2
}

fn default_workers() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AsyncConfig {
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_step_interval")]
    pub step_interval_ms: u64,
    /// How long to wait for the worker before giving up
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_ms: u64,
}

impl Default for AsyncConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            step_interval_ms: default_step_interval(),
            wait_timeout_ms: default_wait_timeout(),
        }
    }
}

fn default_steps() -> u32 {
    10
}

fn default_step_interval() -> u64 {
    1000
}

fn default_wait_timeout() -> u64 {
    30_000
}

impl AppConfig {
    /// Reject values the demos cannot run with
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.counter.parallel_workers > 0,
            "counter.parallel_workers must be at least 1"
        );
        ensure!(
            (1..=100).contains(&self.async_computation.steps),
            "async_computation.steps must be between 1 and 100"
        );
        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .validate()
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}
