//! Callback state
//!
//! A [`Recorder`] is the context object the CLI hands to the library as
//! `user_data`. It remembers every value the library delivered, on which
//! thread and when, and echoes each one as a line of demo output.

use chrono::{DateTime, Utc};
use mylib_abi::MylibStatus;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::thread;

/// What a recorder is listening to; decides how values are echoed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    DotProduct,
    Count,
    Progress,
}

impl CallbackKind {
    fn describe(self, value: i64, thread: &str) -> String {
        match self {
            CallbackKind::DotProduct => format!("dot product = {}", value),
            CallbackKind::Count => format!("count = {}", value),
            CallbackKind::Progress => {
                format!("asyncCallback: thread = {}, progress = {}%", thread, value)
            }
        }
    }
}

/// One delivered value
#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    pub value: i64,
    pub thread: String,
    pub at: DateTime<Utc>,
}

/// Error reported by the library from a worker thread
#[derive(Debug, Clone, Serialize)]
pub struct ReportedError {
    pub computation: u64,
    pub status: String,
    pub message: String,
}

/// Callback context shared with the library
#[derive(Debug)]
pub struct Recorder {
    kind: CallbackKind,
    echo: bool,
    observations: Mutex<Vec<Observation>>,
    errors: Mutex<Vec<ReportedError>>,
}

/// Label for the current thread: its name if it has one, else its id
pub fn thread_label() -> String {
    let current = thread::current();
    match current.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", current.id()),
    }
}

// Callbacks run inside `extern "C"` functions where a panic would abort, so
// poisoned locks are recovered instead of unwrapped.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Recorder {
    pub fn new(kind: CallbackKind, echo: bool) -> Self {
        Self {
            kind,
            echo,
            observations: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, value: i64) {
        let observation = Observation {
            value,
            thread: thread_label(),
            at: Utc::now(),
        };
        if self.echo {
            println!("{}", self.kind.describe(value, &observation.thread));
        }
        log::trace!("{:?} callback received {}", self.kind, value);
        lock(&self.observations).push(observation);
    }

    pub fn record_error(&self, computation: u64, status: MylibStatus, message: String) {
        log::error!("Computation {} failed ({:?}): {}", computation, status, message);
        lock(&self.errors).push(ReportedError {
            computation,
            status: format!("{:?}", status),
            message,
        });
    }

    pub fn kind(&self) -> CallbackKind {
        self.kind
    }

    pub fn values(&self) -> Vec<i64> {
        lock(&self.observations).iter().map(|o| o.value).collect()
    }

    pub fn observations(&self) -> Vec<Observation> {
        lock(&self.observations).clone()
    }

    pub fn errors(&self) -> Vec<ReportedError> {
        lock(&self.errors).clone()
    }
}
