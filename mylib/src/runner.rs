//! Asynchronous computation runner
//!
//! Each call to [`AsyncRunner::spawn`] starts exactly one dedicated worker
//! thread and returns as soon as that thread is running. The worker reports
//! progress through the supplied callback, strictly increasing from 0 up to
//! [`PROGRESS_COMPLETE`], then exits and drops the callback.
//!
//! Progress callbacks run on the worker thread. Any caller state they touch
//! must be synchronised by the caller.
//!
//! A failing callback stops its worker. The failure cannot be returned to
//! the original caller any more, so it is logged and handed to the optional
//! [`ErrorSink`]. Running workers cannot be cancelled.

use crate::callback::{deliver, CallbackRef};
use crate::config::{ComputationConfig, PROGRESS_COMPLETE};
use crate::types::{BridgeError, CallbackError, Result};
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// Receives errors raised inside a worker after `spawn` has returned
pub trait ErrorSink: Send + Sync {
    fn report(&self, computation: u64, error: &BridgeError);
}

impl<F> ErrorSink for F
where
    F: Fn(u64, &BridgeError) + Send + Sync,
{
    fn report(&self, computation: u64, error: &BridgeError) {
        self(computation, error)
    }
}

pub type ErrorSinkRef = Arc<dyn ErrorSink>;

/// Outcome of a computation that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputationReport {
    pub id: u64,
    /// Every progress value delivered, in delivery order
    pub delivered: Vec<i64>,
    pub worker: ThreadId,
}

/// Handle to a spawned computation
///
/// Dropping it detaches the worker, which keeps running to completion.
#[derive(Debug)]
pub struct Computation {
    id: u64,
    worker: ThreadId,
    handle: JoinHandle<Result<ComputationReport>>,
}

impl Computation {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Thread the progress callbacks run on
    pub fn worker_thread(&self) -> ThreadId {
        self.worker
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the worker exits
    pub fn join(self) -> Result<ComputationReport> {
        self.handle
            .join()
            .unwrap_or_else(|_| Err(BridgeError::CallbackFailure(CallbackError::Panicked)))
    }
}

thread_local! {
    /// Tracker of the runner that spawned the current thread, if any
    static WORKER_OF: Cell<usize> = const { Cell::new(0) };
}

/// Count of workers still running
#[derive(Default)]
struct Tracker {
    active: Mutex<usize>,
    idle: Condvar,
}

impl Tracker {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn id(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }

    fn enter(self: &Arc<Self>) -> ActiveGuard {
        *self.lock() += 1;
        ActiveGuard(Arc::clone(self))
    }
}

/// Marks one worker as running until dropped
struct ActiveGuard(Arc<Tracker>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = self.0.lock();
        *active -= 1;
        if *active == 0 {
            self.0.idle.notify_all();
        }
    }
}

/// Spawns and tracks asynchronous computations
#[derive(Default)]
pub struct AsyncRunner {
    tracker: Arc<Tracker>,
    next_id: AtomicU64,
}

impl AsyncRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a computation on a new worker thread
    ///
    /// Returns once the worker has started. Only configuration and thread
    /// creation errors are returned here; later failures go to `on_error`.
    pub fn spawn(
        &self,
        callback: CallbackRef,
        on_error: Option<ErrorSinkRef>,
        config: &ComputationConfig,
    ) -> Result<Computation> {
        config.validate()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let config = config.clone();
        let tracker = self.tracker.id();
        let guard = self.tracker.enter();

        // Block the caller until the worker is actually running
        let (started_tx, started_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name(format!("mylib-async-{}", id))
            .spawn(move || {
                let _guard = guard;
                WORKER_OF.with(|owner| owner.set(tracker));
                let _ = started_tx.send(thread::current().id());
                run_computation(id, callback, on_error, &config)
            })?;

        let worker = started_rx
            .recv()
            .unwrap_or_else(|_| handle.thread().id());

        log::info!(
            "Started computation {} on {:?} (caller {:?})",
            id,
            worker,
            thread::current().id()
        );

        Ok(Computation { id, worker, handle })
    }

    /// Number of workers that have not exited yet
    pub fn active(&self) -> usize {
        *self.tracker.lock()
    }

    /// Wait until no worker is running
    ///
    /// With `None` this waits indefinitely. Calling it from one of this
    /// runner's workers fails with [`BridgeError::InvalidArgument`]: the
    /// worker would wait for itself.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> Result<()> {
        if WORKER_OF.with(Cell::get) == self.tracker.id() {
            return Err(BridgeError::InvalidArgument(
                "cannot wait for computations from one of their own workers".to_string(),
            ));
        }
        let active = self.tracker.lock();
        match timeout {
            None => {
                let _idle = self
                    .tracker
                    .idle
                    .wait_while(active, |n| *n > 0)
                    .unwrap_or_else(|e| e.into_inner());
                Ok(())
            }
            Some(limit) => {
                let (active, _) = self
                    .tracker
                    .idle
                    .wait_timeout_while(active, limit, |n| *n > 0)
                    .unwrap_or_else(|e| e.into_inner());
                if *active > 0 {
                    log::warn!("{} computation(s) still running after {:?}", *active, limit);
                    return Err(BridgeError::Timeout(limit));
                }
                Ok(())
            }
        }
    }
}

fn run_computation(
    id: u64,
    callback: CallbackRef,
    on_error: Option<ErrorSinkRef>,
    config: &ComputationConfig,
) -> Result<ComputationReport> {
    let mut delivered = Vec::with_capacity(config.steps as usize + 1);

    for step in 0..=config.steps {
        let progress = config.progress_at(step);

        if let Err(e) = deliver(callback.as_ref(), progress) {
            let error = BridgeError::CallbackFailure(e);
            log::error!("Computation {} stopped at {}%: {}", id, progress, error);
            if let Some(sink) = &on_error {
                sink.report(id, &error);
            }
            return Err(error);
        }
        delivered.push(progress);

        if step < config.steps {
            thread::sleep(config.step_interval());
        }
    }

    debug_assert_eq!(delivered.last(), Some(&PROGRESS_COMPLETE));
    log::info!("Computation {} completed", id);

    Ok(ComputationReport {
        id,
        delivered,
        worker: thread::current().id(),
    })
}

/// Process-wide runner used by the C ABI
pub fn global() -> &'static AsyncRunner {
    static RUNNER: OnceLock<AsyncRunner> = OnceLock::new();
    RUNNER.get_or_init(AsyncRunner::new)
}

/// Fire-and-forget computation with the default configuration
pub fn async_computation(callback: CallbackRef) -> Result<()> {
    let computation = global().spawn(callback, None, &ComputationConfig::default())?;
    log::debug!("Detached computation {}", computation.id());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::callback_ref;

    fn fast_config(steps: u32) -> ComputationConfig {
        ComputationConfig::new()
            .with_steps(steps)
            .with_step_interval(Duration::from_millis(1))
    }

    fn recording_callback() -> (CallbackRef, Arc<Mutex<Vec<(i64, ThreadId)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback = callback_ref(move |v| {
            sink.lock().unwrap().push((v, thread::current().id()));
            Ok(())
        });
        (callback, seen)
    }

    #[test]
    fn test_progress_on_worker_thread() {
        let runner = AsyncRunner::new();
        let (callback, seen) = recording_callback();

        let computation = runner.spawn(callback, None, &fast_config(5)).unwrap();
        let worker = computation.worker_thread();
        assert_ne!(worker, thread::current().id());

        let report = computation.join().unwrap();
        assert_eq!(report.delivered, vec![0, 20, 40, 60, 80, 100]);
        assert_eq!(report.worker, worker);

        let seen = seen.lock().unwrap();
        let values: Vec<i64> = seen.iter().map(|(v, _)| *v).collect();
        assert_eq!(values, report.delivered);
        assert!(seen.iter().all(|(_, t)| *t == worker));
    }

    #[test]
    fn test_default_progress_sequence() {
        let runner = AsyncRunner::new();
        let (callback, seen) = recording_callback();
        let config = ComputationConfig::new().with_step_interval(Duration::ZERO);

        runner.spawn(callback, None, &config).unwrap().join().unwrap();

        let values: Vec<i64> = seen.lock().unwrap().iter().map(|(v, _)| *v).collect();
        assert_eq!(values, (0..=10).map(|i| i * 10).collect::<Vec<i64>>());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let runner = AsyncRunner::new();
        let (callback, seen) = recording_callback();

        let result = runner.spawn(callback, None, &fast_config(0));
        assert!(matches!(result, Err(BridgeError::InvalidArgument(_))));
        assert_eq!(runner.active(), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_worker_error_reported_to_sink() {
        let runner = AsyncRunner::new();
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink_reports = Arc::clone(&reports);
        let sink: ErrorSinkRef = Arc::new(move |id: u64, error: &BridgeError| {
            sink_reports.lock().unwrap().push((id, error.to_string()));
        });

        let callback = callback_ref(|v| {
            if v >= 50 {
                Err(CallbackError::Status(9))
            } else {
                Ok(())
            }
        });

        let computation = runner.spawn(callback, Some(sink), &fast_config(4)).unwrap();
        let id = computation.id();
        let result = computation.join();

        assert!(matches!(
            result,
            Err(BridgeError::CallbackFailure(CallbackError::Status(9)))
        ));
        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, id);
        assert!(reports[0].1.contains("status 9"));
    }

    #[test]
    fn test_panicking_callback_stops_worker() {
        let runner = AsyncRunner::new();
        let callback = callback_ref(|v| {
            if v > 0 {
                panic!("progress handler crashed");
            }
            Ok(())
        });

        let result = runner.spawn(callback, None, &fast_config(3)).unwrap().join();
        assert!(matches!(
            result,
            Err(BridgeError::CallbackFailure(CallbackError::Panicked))
        ));
        runner.wait_idle(Some(Duration::from_secs(5))).unwrap();
    }

    #[test]
    fn test_wait_idle_timeout_then_completion() {
        let runner = AsyncRunner::new();
        let (callback, seen) = recording_callback();
        let config = ComputationConfig::new()
            .with_steps(2)
            .with_step_interval(Duration::from_millis(200));

        drop(runner.spawn(callback, None, &config).unwrap());
        assert_eq!(runner.active(), 1);

        assert!(matches!(
            runner.wait_idle(Some(Duration::from_millis(1))),
            Err(BridgeError::Timeout(_))
        ));

        runner.wait_idle(None).unwrap();
        assert_eq!(runner.active(), 0);
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_detached_worker_releases_callback() {
        let runner = AsyncRunner::new();
        let (callback, seen) = recording_callback();

        drop(runner.spawn(callback, None, &fast_config(2)).unwrap());
        runner.wait_idle(Some(Duration::from_secs(5))).unwrap();

        // Only the test's own reference remains
        assert_eq!(Arc::strong_count(&seen), 1);
    }

    #[test]
    fn test_wait_idle_from_own_worker_rejected() {
        let runner = Arc::new(AsyncRunner::new());
        let outcomes = Arc::new(Mutex::new(Vec::new()));

        let callback = {
            let runner = Arc::clone(&runner);
            let outcomes = Arc::clone(&outcomes);
            callback_ref(move |_| {
                let result = runner.wait_idle(None);
                outcomes
                    .lock()
                    .unwrap()
                    .push(matches!(result, Err(BridgeError::InvalidArgument(_))));
                Ok(())
            })
        };

        runner.spawn(callback, None, &fast_config(1)).unwrap().join().unwrap();
        assert_eq!(*outcomes.lock().unwrap(), vec![true, true]);

        // Other runners can still be waited on from a worker
        let other = AsyncRunner::new();
        let nested = Arc::new(Mutex::new(None));
        let callback = {
            let nested = Arc::clone(&nested);
            callback_ref(move |_| {
                *nested.lock().unwrap() = Some(AsyncRunner::new().wait_idle(None).is_ok());
                Ok(())
            })
        };
        other.spawn(callback, None, &fast_config(1)).unwrap().join().unwrap();
        assert_eq!(*nested.lock().unwrap(), Some(true));
    }

    #[test]
    fn test_ids_are_unique() {
        let runner = AsyncRunner::new();
        let a = runner.spawn(recording_callback().0, None, &fast_config(1)).unwrap();
        let b = runner.spawn(recording_callback().0, None, &fast_config(1)).unwrap();
        assert_ne!(a.id(), b.id());
        a.join().unwrap();
        b.join().unwrap();
    }
}
