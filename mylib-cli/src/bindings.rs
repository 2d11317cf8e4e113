//! Dynamically loaded library bindings
//!
//! The shared library is opened once with `libloading` and every exported
//! symbol is resolved up front, so a missing export fails at startup rather
//! than in the middle of a demo. The safe wrappers turn status codes into
//! [`CallError`]s carrying the library's own error message.

use crate::callbacks;
use crate::state::Recorder;
use anyhow::{Context, Result};
use libloading::{Library, Symbol};
use mylib_abi::{
    MylibAsyncOptions, MylibCallback, MylibErrorCallback, MylibLongList, MylibRelease, MylibStatus,
};
use std::ffi::{c_char, c_void, CStr, CString};
use std::mem::ManuallyDrop;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

type VersionFn = unsafe extern "C" fn() -> *const c_char;
type InitLoggingFn = unsafe extern "C" fn(i32) -> MylibStatus;
type LastErrorFn = unsafe extern "C" fn() -> *const c_char;
type HelloFn = unsafe extern "C" fn(*const c_char, *mut *mut c_char) -> MylibStatus;
type StringFreeFn = unsafe extern "C" fn(*mut c_char);
type DotProductFn =
    unsafe extern "C" fn(*const i64, usize, *const i64, usize, *mut i64) -> MylibStatus;
type DotProductListFn = unsafe extern "C" fn(MylibLongList, MylibLongList, *mut i64) -> MylibStatus;
type DotProductConsumeFn = unsafe extern "C" fn(
    *const i64,
    usize,
    *const i64,
    usize,
    MylibCallback,
    *mut c_void,
) -> MylibStatus;
type CounterNewFn =
    unsafe extern "C" fn(MylibCallback, *mut c_void, MylibRelease, *mut u64) -> MylibStatus;
type CounterOpFn = unsafe extern "C" fn(u64) -> MylibStatus;
type CounterGetFn = unsafe extern "C" fn(u64, *mut i64) -> MylibStatus;
type AsyncComputationFn = unsafe extern "C" fn(
    MylibCallback,
    *mut c_void,
    MylibRelease,
    MylibErrorCallback,
    *const MylibAsyncOptions,
    *mut u64,
) -> MylibStatus;
type AsyncPendingFn = unsafe extern "C" fn() -> usize;
type AsyncWaitFn = unsafe extern "C" fn(i64) -> MylibStatus;

/// A library call that returned a non-Ok status
#[derive(Debug, thiserror::Error)]
#[error("{call} failed with {status:?}: {message}")]
pub struct CallError {
    pub call: &'static str,
    pub status: MylibStatus,
    pub message: String,
}

/// Default library location: next to the running executable
pub fn default_library_path() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Failed to locate the running executable")?;
    let dir = exe
        .parent()
        .context("Executable path has no parent directory")?;
    Ok(dir.join(libloading::library_filename("mylib")))
}

/// Resolved symbol table of the loaded library
pub struct MylibApi {
    path: PathBuf,
    version: VersionFn,
    init_logging: InitLoggingFn,
    last_error: LastErrorFn,
    hello: HelloFn,
    string_free: StringFreeFn,
    dot_product: DotProductFn,
    dot_product_critical: DotProductFn,
    dot_product_list: DotProductListFn,
    dot_product_consume: DotProductConsumeFn,
    counter_new: CounterNewFn,
    counter_inc: CounterOpFn,
    counter_get: CounterGetFn,
    counter_des: CounterOpFn,
    async_computation: AsyncComputationFn,
    async_pending: AsyncPendingFn,
    async_wait: AsyncWaitFn,
    // Keeps the function pointers above valid; see the `Drop` impl
    library: ManuallyDrop<Library>,
}

unsafe fn symbol<T: Copy>(library: &Library, name: &str) -> Result<T> {
    let symbol: Symbol<T> = library
        .get(name.as_bytes())
        .with_context(|| format!("Missing symbol: {}", name))?;
    Ok(*symbol)
}

/// Unload `library` unless computations may still be running its code
///
/// Returns whether the library was unloaded.
fn release_library(library: Library, pending: usize) -> bool {
    if pending > 0 {
        log::warn!(
            "{} computation(s) still running; keeping the native library loaded",
            pending
        );
        std::mem::forget(library);
        return false;
    }
    drop(library);
    true
}

impl MylibApi {
    /// Load the shared library and resolve every export
    pub fn load(path: &Path) -> Result<Self> {
        log::info!("Loading native library: {:?}", path);

        let library = unsafe { Library::new(path) }
            .with_context(|| format!("Failed to load library: {:?}", path))?;

        let api = unsafe {
            Self {
                path: path.to_path_buf(),
                version: symbol(&library, "mylib_version")?,
                init_logging: symbol(&library, "mylib_init_logging")?,
                last_error: symbol(&library, "mylib_last_error_message")?,
                hello: symbol(&library, "mylib_hello")?,
                string_free: symbol(&library, "mylib_string_free")?,
                dot_product: symbol(&library, "mylib_dot_product")?,
                dot_product_critical: symbol(&library, "mylib_dot_product_critical")?,
                dot_product_list: symbol(&library, "mylib_dot_product_list")?,
                dot_product_consume: symbol(&library, "mylib_dot_product_consume")?,
                counter_new: symbol(&library, "mylib_counter_new")?,
                counter_inc: symbol(&library, "mylib_counter_inc")?,
                counter_get: symbol(&library, "mylib_counter_get")?,
                counter_des: symbol(&library, "mylib_counter_des")?,
                async_computation: symbol(&library, "mylib_async_computation_with")?,
                async_pending: symbol(&library, "mylib_async_pending")?,
                async_wait: symbol(&library, "mylib_async_wait")?,
                library: ManuallyDrop::new(library),
            }
        };

        log::info!("Native library v{} loaded", api.version());
        Ok(api)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> String {
        unsafe { CStr::from_ptr((self.version)()) }
            .to_string_lossy()
            .into_owned()
    }

    fn check(&self, call: &'static str, status: MylibStatus) -> std::result::Result<(), CallError> {
        if status.is_ok() {
            return Ok(());
        }
        let message = unsafe {
            let ptr = (self.last_error)();
            if ptr.is_null() {
                String::from("Unknown error")
            } else {
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        };
        Err(CallError {
            call,
            status,
            message,
        })
    }

    /// Forward our verbosity to the library's own logger
    pub fn init_logging(&self, level: log::LevelFilter) -> std::result::Result<(), CallError> {
        let level = match level {
            log::LevelFilter::Off => 0,
            log::LevelFilter::Error => 1,
            log::LevelFilter::Warn => 2,
            log::LevelFilter::Info => 3,
            log::LevelFilter::Debug => 4,
            log::LevelFilter::Trace => 5,
        };
        self.check("mylib_init_logging", unsafe { (self.init_logging)(level) })
    }

    pub fn hello(&self, name: &str) -> Result<String> {
        let input = CString::new(name).context("Name contains a NUL byte")?;
        let mut out: *mut c_char = std::ptr::null_mut();

        self.check("mylib_hello", unsafe { (self.hello)(input.as_ptr(), &mut out) })?;

        let greeting = unsafe { CStr::from_ptr(out) }.to_string_lossy().into_owned();
        unsafe { (self.string_free)(out) };
        Ok(greeting)
    }

    pub fn dot_product(&self, a: &[i64], b: &[i64]) -> std::result::Result<i64, CallError> {
        let mut out = 0i64;
        let status =
            unsafe { (self.dot_product)(a.as_ptr(), a.len(), b.as_ptr(), b.len(), &mut out) };
        self.check("mylib_dot_product", status).map(|_| out)
    }

    pub fn dot_product_critical(&self, a: &[i64], b: &[i64]) -> std::result::Result<i64, CallError> {
        let mut out = 0i64;
        let status = unsafe {
            (self.dot_product_critical)(a.as_ptr(), a.len(), b.as_ptr(), b.len(), &mut out)
        };
        self.check("mylib_dot_product_critical", status).map(|_| out)
    }

    /// Pass both vectors as lists of boxed elements
    pub fn dot_product_list(&self, a: &[i64], b: &[i64]) -> std::result::Result<i64, CallError> {
        let boxed_a: Vec<*const i64> = a.iter().map(|v| v as *const i64).collect();
        let boxed_b: Vec<*const i64> = b.iter().map(|v| v as *const i64).collect();
        let list = |items: &Vec<*const i64>| MylibLongList {
            items: items.as_ptr(),
            len: items.len(),
        };

        let mut out = 0i64;
        let status = unsafe { (self.dot_product_list)(list(&boxed_a), list(&boxed_b), &mut out) };
        self.check("mylib_dot_product_list", status).map(|_| out)
    }

    pub fn dot_product_consume(
        &self,
        a: &[i64],
        b: &[i64],
        recorder: &Recorder,
    ) -> std::result::Result<(), CallError> {
        let status = unsafe {
            (self.dot_product_consume)(
                a.as_ptr(),
                a.len(),
                b.as_ptr(),
                b.len(),
                Some(callbacks::record_value),
                callbacks::borrow_user_data(recorder),
            )
        };
        self.check("mylib_dot_product_consume", status)
    }

    /// Create a counter; the library keeps a reference to `recorder`
    pub fn counter_new(&self, recorder: Arc<Recorder>) -> std::result::Result<u64, CallError> {
        let mut handle = 0u64;
        let status = unsafe {
            (self.counter_new)(
                Some(callbacks::record_value),
                callbacks::into_user_data(recorder),
                Some(callbacks::release_recorder),
                &mut handle,
            )
        };
        self.check("mylib_counter_new", status).map(|_| handle)
    }

    pub fn counter_inc(&self, handle: u64) -> std::result::Result<(), CallError> {
        self.check("mylib_counter_inc", unsafe { (self.counter_inc)(handle) })
    }

    pub fn counter_get(&self, handle: u64) -> std::result::Result<i64, CallError> {
        let mut count = 0i64;
        let status = unsafe { (self.counter_get)(handle, &mut count) };
        self.check("mylib_counter_get", status).map(|_| count)
    }

    pub fn counter_des(&self, handle: u64) -> std::result::Result<(), CallError> {
        self.check("mylib_counter_des", unsafe { (self.counter_des)(handle) })
    }

    /// Start a background computation; returns its id
    pub fn async_computation(
        &self,
        recorder: Arc<Recorder>,
        steps: u32,
        step_interval: Duration,
    ) -> std::result::Result<u64, CallError> {
        let options = MylibAsyncOptions {
            steps,
            step_interval_ms: step_interval.as_millis() as u64,
        };
        let mut id = 0u64;
        let status = unsafe {
            (self.async_computation)(
                Some(callbacks::record_value),
                callbacks::into_user_data(recorder),
                Some(callbacks::release_recorder),
                Some(callbacks::record_error),
                &options,
                &mut id,
            )
        };
        self.check("mylib_async_computation_with", status).map(|_| id)
    }

    pub fn async_pending(&self) -> usize {
        unsafe { (self.async_pending)() }
    }

    pub fn async_wait(&self, timeout: Duration) -> std::result::Result<(), CallError> {
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        self.check("mylib_async_wait", unsafe { (self.async_wait)(timeout_ms) })
    }
}

impl Drop for MylibApi {
    fn drop(&mut self) {
        let pending = self.async_pending();
        // Not touched again: this is the last use of the field
        let library = unsafe { ManuallyDrop::take(&mut self.library) };
        release_library(library, pending);
    }
}
