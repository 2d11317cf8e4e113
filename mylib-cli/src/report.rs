//! Run report
//!
//! Collects the outcome of every demo. Printed as a text summary, or as
//! JSON with `--json`.

use crate::demos::Demo;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What a successful demo observed
#[derive(Debug, Clone, Default, Serialize)]
pub struct DemoOutcome {
    pub summary: String,
    /// Values delivered through callbacks, in arrival order
    pub values: Vec<i64>,
    /// Threads the callbacks ran on
    pub threads: Vec<String>,
    /// Rejections observed while exercising misuse
    pub notes: Vec<String>,
}

impl DemoOutcome {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DemoResult {
    pub demo: Demo,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(flatten)]
    pub outcome: DemoOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DemoResult {
    pub fn new(
        demo: Demo,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        outcome: Result<DemoOutcome>,
    ) -> Self {
        let duration_ms = elapsed.as_millis() as u64;
        match outcome {
            Ok(outcome) => Self {
                demo,
                started_at,
                duration_ms,
                success: true,
                outcome,
                error: None,
            },
            Err(e) => Self {
                demo,
                started_at,
                duration_ms,
                success: false,
                outcome: DemoOutcome::default(),
                error: Some(format!("{:#}", e)),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub cli_version: String,
    pub library: PathBuf,
    pub library_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub demos: Vec<DemoResult>,
}

impl RunReport {
    pub fn new(library: &Path, library_version: impl Into<String>) -> Self {
        Self {
            cli_version: env!("CARGO_PKG_VERSION").to_string(),
            library: library.to_path_buf(),
            library_version: library_version.into(),
            started_at: Utc::now(),
            finished_at: None,
            demos: Vec::new(),
        }
    }

    pub fn push(&mut self, result: DemoResult) {
        self.demos.push(result);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn failures(&self) -> usize {
        self.demos.iter().filter(|d| !d.success).count()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Print summary to stdout
    pub fn print_summary(&self) {
        println!("\n═══════════════════════════════════════════════");
        println!("  Summary");
        println!("═══════════════════════════════════════════════");
        println!("  Library:  {:?} (v{})", self.library, self.library_version);
        for result in &self.demos {
            let mark = if result.success { "✓" } else { "✗" };
            let detail = match &result.error {
                Some(error) => error.as_str(),
                None => result.outcome.summary.as_str(),
            };
            println!(
                "  {} {:<12} {:>6} ms  {}",
                mark,
                result.demo.title(),
                result.duration_ms,
                detail
            );
            for note in &result.outcome.notes {
                println!("      • {}", note);
            }
        }
        println!(
            "\n  {} passed, {} failed",
            self.demos.len() - self.failures(),
            self.failures()
        );
    }
}
