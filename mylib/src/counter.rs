//! Opaque counter objects
//!
//! Counters live in an arena owned by a [`CounterRegistry`]. Callers only
//! ever see a [`CounterHandle`]: a tagged, generation-checked slot index.
//! Every operation validates the handle first, so a destroyed, foreign or
//! fabricated handle is rejected with [`BridgeError::InvalidHandle`] instead
//! of being dereferenced.
//!
//! Lifecycle of a counter:
//!
//! ```text
//! create ──> Live ──increment──> Live ──destroy──> Destroyed (terminal)
//! ```
//!
//! The registry lock is never held while a callback runs, so a callback may
//! call back into the registry. Destroying a counter waits for callbacks
//! still running on other threads; once `destroy` returns, the callback is
//! never invoked again.

use crate::callback::{deliver, CallbackRef};
use crate::types::{BridgeError, CounterHandle, Result};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::thread::{self, ThreadId};

/// Threads currently delivering a value for one counter
#[derive(Default)]
struct Deliveries {
    running: Mutex<Vec<ThreadId>>,
    finished: Condvar,
}

impl Deliveries {
    fn lock(&self) -> MutexGuard<'_, Vec<ThreadId>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(self: &Arc<Self>) -> Delivery {
        let thread = thread::current().id();
        self.lock().push(thread);
        Delivery {
            deliveries: Arc::clone(self),
            thread,
        }
    }

    /// Block until no other thread is delivering
    ///
    /// Deliveries on the calling thread are skipped: that is a callback
    /// destroying its own counter, which would otherwise wait on itself.
    fn wait_for_others(&self) {
        let current = thread::current().id();
        let running = self.lock();
        let _idle = self
            .finished
            .wait_while(running, |running| running.iter().any(|t| *t != current))
            .unwrap_or_else(|e| e.into_inner());
    }
}

/// One delivery in progress; unregisters itself when dropped
struct Delivery {
    deliveries: Arc<Deliveries>,
    thread: ThreadId,
}

impl Drop for Delivery {
    fn drop(&mut self) {
        let mut running = self.deliveries.lock();
        if let Some(pos) = running.iter().position(|t| *t == self.thread) {
            running.swap_remove(pos);
        }
        self.deliveries.finished.notify_all();
    }
}

/// A live counter: its value and the callback notified on every increment
struct Counter {
    count: i64,
    callback: CallbackRef,
    deliveries: Arc<Deliveries>,
}

/// One arena slot
struct Slot {
    generation: u16,
    counter: Option<Counter>,
}

#[derive(Default)]
struct Slots {
    entries: Vec<Slot>,
    /// Indices of vacant slots that may be reused
    free: Vec<u32>,
    live: usize,
}

impl Slots {
    fn lookup_mut(&mut self, handle: CounterHandle) -> Result<&mut Counter> {
        if !handle.has_magic() {
            return Err(BridgeError::InvalidHandle(handle));
        }
        self.entries
            .get_mut(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.counter.as_mut())
            .ok_or(BridgeError::InvalidHandle(handle))
    }
}

/// Arena of counters addressed by [`CounterHandle`]
#[derive(Default)]
pub struct CounterRegistry {
    slots: Mutex<Slots>,
}

impl CounterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // Callbacks never run under this lock, so a poisoned guard still
        // protects consistent data.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate a counter starting at 0 and retain `callback`
    ///
    /// The callback is not invoked here.
    pub fn create(&self, callback: CallbackRef) -> Result<CounterHandle> {
        let mut slots = self.lock();
        let counter = Counter {
            count: 0,
            callback,
            deliveries: Arc::default(),
        };

        let handle = match slots.free.pop() {
            Some(index) => {
                let slot = &mut slots.entries[index as usize];
                slot.counter = Some(counter);
                CounterHandle::new(index, slot.generation)
            }
            None => {
                let index = u32::try_from(slots.entries.len()).map_err(|_| {
                    BridgeError::InvalidArgument("counter registry is full".to_string())
                })?;
                slots.entries.push(Slot {
                    generation: 0,
                    counter: Some(counter),
                });
                CounterHandle::new(index, 0)
            }
        };
        slots.live += 1;

        log::debug!("Created counter {}", handle);
        Ok(handle)
    }

    /// Increment the counter by one and notify its callback with the new value
    ///
    /// If the callback fails the increment is kept and the failure is
    /// returned as [`BridgeError::CallbackFailure`].
    pub fn increment(&self, handle: CounterHandle) -> Result<i64> {
        // Registered under the registry lock so a concurrent destroy either
        // rejects this call or waits for the delivery.
        let (count, callback, delivery) = {
            let mut slots = self.lock();
            let counter = slots.lookup_mut(handle).inspect_err(|_| {
                log::warn!("Rejected increment on invalid counter handle {}", handle);
            })?;
            counter.count = counter
                .count
                .checked_add(1)
                .ok_or(BridgeError::Overflow(handle))?;
            (
                counter.count,
                CallbackRef::clone(&counter.callback),
                counter.deliveries.enter(),
            )
        };

        log::trace!("Counter {} incremented to {}", handle, count);
        let delivered = deliver(callback.as_ref(), count);

        // Our reference goes before the waiting destroy is woken
        drop(callback);
        drop(delivery);

        delivered?;
        Ok(count)
    }

    /// Current value of the counter
    pub fn get(&self, handle: CounterHandle) -> Result<i64> {
        let mut slots = self.lock();
        slots.lookup_mut(handle).map(|counter| counter.count)
    }

    /// Destroy the counter and release its callback
    ///
    /// The handle is invalid afterwards; destroying it again fails. Waits
    /// for callbacks of this counter running on other threads to return.
    pub fn destroy(&self, handle: CounterHandle) -> Result<()> {
        let released = {
            let mut guard = self.lock();
            let slots = &mut *guard;
            slots.lookup_mut(handle).inspect_err(|_| {
                log::warn!("Rejected destroy of invalid counter handle {}", handle);
            })?;

            let index = handle.index();
            let slot = &mut slots.entries[index as usize];
            let released = slot.counter.take();

            match slot.generation.checked_add(1) {
                Some(next) => {
                    slot.generation = next;
                    slots.free.push(index);
                }
                // Generation space exhausted: never hand this slot out again
                None => log::debug!("Retiring counter slot {}", index),
            }
            slots.live -= 1;
            released
        };

        // Outside the lock: running callbacks and a foreign release hook may
        // call back into the library.
        if let Some(counter) = &released {
            counter.deliveries.wait_for_others();
        }
        drop(released);
        log::debug!("Destroyed counter {}", handle);
        Ok(())
    }

    /// Number of live counters
    pub fn live(&self) -> usize {
        self.lock().live
    }
}

/// Process-wide registry used by the C ABI
pub fn global() -> &'static CounterRegistry {
    static REGISTRY: OnceLock<CounterRegistry> = OnceLock::new();
    REGISTRY.get_or_init(CounterRegistry::new)
}

/// Create a counter in the process-wide registry
pub fn counter_new(callback: CallbackRef) -> Result<CounterHandle> {
    global().create(callback)
}

/// Increment a counter in the process-wide registry
pub fn counter_inc(handle: CounterHandle) -> Result<i64> {
    global().increment(handle)
}

/// Read a counter in the process-wide registry
pub fn counter_get(handle: CounterHandle) -> Result<i64> {
    global().get(handle)
}

/// Destroy a counter in the process-wide registry
pub fn counter_des(handle: CounterHandle) -> Result<()> {
    global().destroy(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::callback_ref;
    use crate::types::CallbackError;
    use rayon::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn recording_callback() -> (CallbackRef, Arc<Mutex<Vec<i64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback = callback_ref(move |v| {
            sink.lock().unwrap().push(v);
            Ok(())
        });
        (callback, seen)
    }

    #[test]
    fn test_increments_notify_in_order() {
        let registry = CounterRegistry::new();
        let (callback, seen) = recording_callback();

        let handle = registry.create(callback).unwrap();
        assert!(seen.lock().unwrap().is_empty(), "create must not notify");

        for _ in 0..5 {
            registry.increment(handle).unwrap();
        }

        assert_eq!(registry.get(handle).unwrap(), 5);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_use_after_destroy_rejected() {
        let registry = CounterRegistry::new();
        let (callback, seen) = recording_callback();

        let handle = registry.create(callback).unwrap();
        registry.increment(handle).unwrap();
        registry.destroy(handle).unwrap();

        assert!(matches!(
            registry.increment(handle),
            Err(BridgeError::InvalidHandle(h)) if h == handle
        ));
        assert!(matches!(
            registry.destroy(handle),
            Err(BridgeError::InvalidHandle(_))
        ));
        assert!(registry.get(handle).is_err());
        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(registry.live(), 0);
    }

    #[test]
    fn test_foreign_handles_rejected() {
        let registry = CounterRegistry::new();
        let (callback, _) = recording_callback();
        let handle = registry.create(callback).unwrap();

        for raw in [0u64, 1337, handle.raw() & 0x0000_FFFF_FFFF_FFFF, handle.raw() + 1] {
            let result = registry.increment(CounterHandle::from_raw(raw));
            assert!(matches!(result, Err(BridgeError::InvalidHandle(_))), "raw {raw:#x}");
        }
        assert_eq!(registry.get(handle).unwrap(), 0);
    }

    #[test]
    fn test_slot_reuse_bumps_generation() {
        let registry = CounterRegistry::new();
        let (first_cb, _) = recording_callback();
        let (second_cb, second_seen) = recording_callback();

        let first = registry.create(first_cb).unwrap();
        registry.destroy(first).unwrap();
        let second = registry.create(second_cb).unwrap();

        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert!(registry.increment(first).is_err());
        assert_eq!(registry.increment(second).unwrap(), 1);
        assert_eq!(*second_seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_exhausted_slot_is_retired() {
        let registry = CounterRegistry::new();
        {
            let mut slots = registry.lock();
            slots.entries.push(Slot {
                generation: u16::MAX,
                counter: None,
            });
            slots.free.push(0);
        }

        let (callback, _) = recording_callback();
        let old = registry.create(callback).unwrap();
        assert_eq!(old.generation(), u16::MAX);
        registry.destroy(old).unwrap();

        let (callback, _) = recording_callback();
        let fresh = registry.create(callback).unwrap();
        assert_eq!(fresh.index(), 1);
    }

    #[test]
    fn test_destroy_releases_callback() {
        struct Flag(Arc<AtomicBool>);
        impl Drop for Flag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let released = Arc::new(AtomicBool::new(false));
        let flag = Flag(Arc::clone(&released));
        let callback = callback_ref(move |_| {
            let _keep = &flag;
            Ok(())
        });

        let registry = CounterRegistry::new();
        let handle = registry.create(callback).unwrap();
        assert!(!released.load(Ordering::SeqCst));

        registry.destroy(handle).unwrap();
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_callback_failure_keeps_increment() {
        let registry = CounterRegistry::new();
        let handle = registry
            .create(callback_ref(|v| {
                if v == 2 {
                    Err(CallbackError::message("two is not allowed"))
                } else {
                    Ok(())
                }
            }))
            .unwrap();

        assert_eq!(registry.increment(handle).unwrap(), 1);
        assert!(matches!(
            registry.increment(handle),
            Err(BridgeError::CallbackFailure(_))
        ));
        assert_eq!(registry.get(handle).unwrap(), 2);
        assert_eq!(registry.increment(handle).unwrap(), 3);
    }

    #[test]
    fn test_overflow_rejected() {
        let registry = CounterRegistry::new();
        let (callback, _) = recording_callback();
        let handle = registry.create(callback).unwrap();
        registry.lock().lookup_mut(handle).unwrap().count = i64::MAX;

        assert!(matches!(
            registry.increment(handle),
            Err(BridgeError::Overflow(_))
        ));
        assert_eq!(registry.get(handle).unwrap(), i64::MAX);
    }

    #[test]
    fn test_callback_may_reenter_registry() {
        let registry = Arc::new(CounterRegistry::new());
        let (inner_cb, inner_seen) = recording_callback();
        let inner = registry.create(inner_cb).unwrap();

        let reentrant = Arc::clone(&registry);
        let outer = registry
            .create(callback_ref(move |_| {
                reentrant
                    .increment(inner)
                    .map(|_| ())
                    .map_err(|e| CallbackError::message(e.to_string()))
            }))
            .unwrap();

        registry.increment(outer).unwrap();
        registry.increment(outer).unwrap();
        assert_eq!(*inner_seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_destroy_waits_for_running_callback() {
        use std::sync::mpsc;
        use std::time::Duration;

        let registry = Arc::new(CounterRegistry::new());
        let (entered_tx, entered_rx) = mpsc::channel();
        let entered_tx = Mutex::new(entered_tx);
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let handle = registry
            .create(callback_ref(move |_| {
                let _ = entered_tx.lock().unwrap().send(());
                thread::sleep(Duration::from_millis(200));
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();

        let worker = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.increment(handle))
        };
        entered_rx.recv().unwrap();

        registry.destroy(handle).unwrap();
        assert!(
            finished.load(Ordering::SeqCst),
            "destroy returned while the callback was still running"
        );
        assert_eq!(worker.join().unwrap().unwrap(), 1);
        assert!(registry.increment(handle).is_err());
    }

    #[test]
    fn test_callback_may_destroy_own_counter() {
        let registry = Arc::new(CounterRegistry::new());
        let own = Arc::new(OnceLock::new());
        let destroyed = Arc::new(AtomicBool::new(false));

        let callback = {
            let inner = Arc::clone(&registry);
            let own = Arc::clone(&own);
            let destroyed = Arc::clone(&destroyed);
            callback_ref(move |_| {
                if let Some(handle) = own.get() {
                    inner
                        .destroy(*handle)
                        .map_err(|e| CallbackError::message(e.to_string()))?;
                    destroyed.store(true, Ordering::SeqCst);
                }
                Ok(())
            })
        };
        let handle = registry.create(callback).unwrap();
        own.set(handle).unwrap();

        assert_eq!(registry.increment(handle).unwrap(), 1);
        assert!(destroyed.load(Ordering::SeqCst));
        assert_eq!(registry.live(), 0);
        assert!(registry.get(handle).is_err());
    }

    #[test]
    fn test_concurrent_increments() {
        let registry = CounterRegistry::new();
        let (callback, seen) = recording_callback();
        let handle = registry.create(callback).unwrap();

        (0..1000)
            .into_par_iter()
            .try_for_each(|_| registry.increment(handle).map(|_| ()))
            .unwrap();

        assert_eq!(registry.get(handle).unwrap(), 1000);
        let mut values = seen.lock().unwrap().clone();
        values.sort_unstable();
        assert_eq!(values, (1..=1000).collect::<Vec<i64>>());
    }

    #[test]
    fn test_global_registry_functions() {
        let (callback, seen) = recording_callback();
        let handle = counter_new(callback).unwrap();
        counter_inc(handle).unwrap();
        counter_inc(handle).unwrap();
        assert_eq!(counter_get(handle).unwrap(), 2);
        counter_des(handle).unwrap();
        assert!(counter_des(handle).is_err());
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }
}
