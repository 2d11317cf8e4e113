//! Demonstration scenarios
//!
//! Each demo drives one part of the library through the loaded C ABI and
//! checks what came back before reporting it.

use crate::bindings::{CallError, MylibApi};
use crate::config::AppConfig;
use crate::report::{DemoOutcome, DemoResult};
use crate::state::{thread_label, CallbackKind, Recorder};
use anyhow::{bail, ensure, Context, Result};
use chrono::Utc;
use mylib_abi::{MylibStatus, PROGRESS_COMPLETE};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Handle value no counter is ever created with
const MADE_UP_HANDLE: u64 = 1337;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Demo {
    Hello,
    DotProduct,
    Consume,
    Counter,
    Async,
}

impl Demo {
    pub const ALL: [Demo; 5] = [
        Demo::Hello,
        Demo::DotProduct,
        Demo::Consume,
        Demo::Counter,
        Demo::Async,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Demo::Hello => "hello",
            Demo::DotProduct => "dot-product",
            Demo::Consume => "consume",
            Demo::Counter => "counter",
            Demo::Async => "async",
        }
    }
}

/// Expect a call to be refused with `expected`; describe the refusal
fn expect_rejection<T: std::fmt::Debug>(
    label: &str,
    result: std::result::Result<T, CallError>,
    expected: MylibStatus,
) -> Result<String> {
    match result {
        Err(e) if e.status == expected => Ok(format!("{} rejected: {}", label, e.message)),
        Err(e) => bail!("{} failed with unexpected status: {}", label, e),
        Ok(value) => bail!("{} unexpectedly succeeded ({:?})", label, value),
    }
}

/// Distinct thread labels in order of first appearance
fn distinct_threads(recorder: &Recorder) -> Vec<String> {
    let mut threads: Vec<String> = Vec::new();
    for observation in recorder.observations() {
        if !threads.contains(&observation.thread) {
            threads.push(observation.thread);
        }
    }
    threads
}

pub struct DemoRunner<'a> {
    api: &'a MylibApi,
    config: &'a AppConfig,
    echo: bool,
    hazard: bool,
}

impl<'a> DemoRunner<'a> {
    /// `echo` prints callback values as they arrive; `hazard` also exercises misuse
    pub fn new(api: &'a MylibApi, config: &'a AppConfig, echo: bool, hazard: bool) -> Self {
        Self {
            api,
            config,
            echo,
            hazard,
        }
    }

    pub fn run(&self, demo: Demo) -> DemoResult {
        log::debug!("Running demo: {}", demo.title());
        let started_at = Utc::now();
        let started = Instant::now();

        let outcome = match demo {
            Demo::Hello => self.hello(),
            Demo::DotProduct => self.dot_product(),
            Demo::Consume => self.consume(),
            Demo::Counter => self.counter(),
            Demo::Async => self.async_computation(),
        }
        .with_context(|| format!("{} demo", demo.title()));

        if let Err(e) = &outcome {
            log::error!("{:#}", e);
        }
        DemoResult::new(demo, started_at, started.elapsed(), outcome)
    }

    fn hello(&self) -> Result<DemoOutcome> {
        let greeting = self.api.hello(&self.config.greeting.name)?;
        if self.echo {
            println!("{}", greeting);
        }
        Ok(DemoOutcome::new(greeting))
    }

    fn dot_product(&self) -> Result<DemoOutcome> {
        let (a, b) = (&self.config.vectors.a, &self.config.vectors.b);

        let array = self.api.dot_product(a, b)?;
        let critical = self.api.dot_product_critical(a, b)?;
        let list = self.api.dot_product_list(a, b)?;
        if self.echo {
            println!("dot product (array)    = {}", array);
            println!("dot product (critical) = {}", critical);
            println!("dot product (list)     = {}", list);
        }
        ensure!(
            array == critical && critical == list,
            "variants disagree: array = {}, critical = {}, list = {}",
            array,
            critical,
            list
        );

        let mut outcome = DemoOutcome::new(format!("dot product = {}", array));
        outcome.values = vec![array, critical, list];
        if self.hazard && !a.is_empty() {
            outcome.notes.push(expect_rejection(
                "dot_product with unequal lengths",
                self.api.dot_product(a, &a[1..]),
                MylibStatus::LengthMismatch,
            )?);
        }
        Ok(outcome)
    }

    fn consume(&self) -> Result<DemoOutcome> {
        let (a, b) = (&self.config.vectors.a, &self.config.vectors.b);
        let recorder = Recorder::new(CallbackKind::DotProduct, self.echo);

        self.api.dot_product_consume(a, b, &recorder)?;

        let values = recorder.values();
        ensure!(
            values.len() == 1,
            "expected exactly one callback, got {}",
            values.len()
        );
        let caller = thread_label();
        let threads = distinct_threads(&recorder);
        ensure!(
            threads == [caller.clone()],
            "callback ran on {:?}, expected the calling thread {}",
            threads,
            caller
        );

        let mut outcome = DemoOutcome::new(format!("dot product = {}", values[0]));
        outcome.values = values;
        outcome.threads = threads;
        Ok(outcome)
    }

    fn counter(&self) -> Result<DemoOutcome> {
        let settings = &self.config.counter;
        let recorder = Arc::new(Recorder::new(CallbackKind::Count, self.echo));

        let handle = self.api.counter_new(Arc::clone(&recorder))?;
        log::debug!("Counter handle: 0x{:016X}", handle);

        if settings.parallel_workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(settings.parallel_workers)
                .thread_name(|i| format!("counter-worker-{}", i))
                .build()
                .context("Failed to build worker pool")?;
            pool.install(|| {
                (0..settings.increments)
                    .into_par_iter()
                    .try_for_each(|_| self.api.counter_inc(handle))
            })?;
        } else {
            for _ in 0..settings.increments {
                self.api.counter_inc(handle)?;
            }
        }

        let count = self.api.counter_get(handle)?;
        let values = recorder.values();
        let mut sorted = values.clone();
        sorted.sort_unstable();
        let expected: Vec<i64> = (1..=i64::from(settings.increments)).collect();
        ensure!(
            count == i64::from(settings.increments),
            "count is {} after {} increments",
            count,
            settings.increments
        );
        ensure!(
            sorted == expected,
            "callbacks delivered {:?}, expected each of 1..={} once",
            values,
            settings.increments
        );

        let mut outcome = DemoOutcome::new(format!(
            "count = {} after {} increments on {} worker(s)",
            count, settings.increments, settings.parallel_workers
        ));

        if self.hazard {
            outcome.notes.push(expect_rejection(
                "counter_inc(1337)",
                self.api.counter_inc(MADE_UP_HANDLE),
                MylibStatus::InvalidHandle,
            )?);
        }

        self.api.counter_des(handle)?;

        if self.hazard {
            outcome.notes.push(expect_rejection(
                "counter_inc after destroy",
                self.api.counter_inc(handle),
                MylibStatus::InvalidHandle,
            )?);
            outcome.notes.push(expect_rejection(
                "counter_get after destroy",
                self.api.counter_get(handle),
                MylibStatus::InvalidHandle,
            )?);
            outcome.notes.push(expect_rejection(
                "second counter_des",
                self.api.counter_des(handle),
                MylibStatus::InvalidHandle,
            )?);
        }

        // The library dropped its reference on destroy
        ensure!(
            Arc::strong_count(&recorder) == 1,
            "callback context still retained after destroy"
        );

        outcome.values = values;
        outcome.threads = distinct_threads(&recorder);
        Ok(outcome)
    }

    fn async_computation(&self) -> Result<DemoOutcome> {
        let settings = &self.config.async_computation;
        let recorder = Arc::new(Recorder::new(CallbackKind::Progress, self.echo));
        let caller = thread_label();

        if self.echo {
            println!("Invoking async computation (thread = {})", caller);
        }
        let id = self.api.async_computation(
            Arc::clone(&recorder),
            settings.steps,
            Duration::from_millis(settings.step_interval_ms),
        )?;
        log::info!(
            "Computation {} started, {} pending",
            id,
            self.api.async_pending()
        );

        self.api
            .async_wait(Duration::from_millis(settings.wait_timeout_ms))?;

        let errors = recorder.errors();
        if let Some(error) = errors.first() {
            bail!(
                "computation {} reported {}: {}",
                error.computation,
                error.status,
                error.message
            );
        }

        let values = recorder.values();
        // 0% first, then one report per step
        ensure!(
            values.len() == settings.steps as usize + 1 && values.first() == Some(&0),
            "expected {} progress reports starting at 0%, got {:?}",
            settings.steps + 1,
            values
        );
        ensure!(
            values.windows(2).all(|w| w[0] < w[1]),
            "progress went backwards: {:?}",
            values
        );
        ensure!(
            values.last() == Some(&i64::from(PROGRESS_COMPLETE)),
            "computation ended at {:?}, expected {}%",
            values.last(),
            PROGRESS_COMPLETE
        );

        let threads = distinct_threads(&recorder);
        ensure!(
            threads.len() == 1 && threads[0] != caller,
            "progress should come from a single worker thread, saw {:?}",
            threads
        );

        let mut outcome = DemoOutcome::new(format!(
            "computation {} reached {}% on {}",
            id, PROGRESS_COMPLETE, threads[0]
        ));
        outcome.values = values;
        outcome.threads = threads;
        Ok(outcome)
    }
}
