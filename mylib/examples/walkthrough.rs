//! Walkthrough of the Rust API
//!
//! Runs the same five scenarios as the CLI demo, without going through the
//! C ABI.
//!
//! Usage:
//!   cargo run --example walkthrough
//!
//! Set RUST_LOG=debug to see the library's own logging.

use mylib::{
    callback_ref, dot_product, dot_product_consume, dot_product_critical, hello, AsyncRunner,
    CallbackError, ComputationConfig, CounterHandle, CounterRegistry,
};
use std::thread;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Example 1: Hello World
    println!("{}", hello("Alice"));

    // Example 2: Pass two vectors and get a result
    let vector_a = [1, 3, 3, 7];
    let vector_b = [1, 9, 8, 4];
    println!("dot product = {}", dot_product(&vector_a, &vector_b)?);
    println!("dot product = {}", dot_product_critical(&vector_a, &vector_b)?);

    // Example 3: Pass two vectors and a result consumer
    let consumer = |result: i64| -> Result<(), CallbackError> {
        println!("dot product = {}", result);
        Ok(())
    };
    dot_product_consume(&vector_a, &vector_b, &consumer)?;

    // Example 4: Create a native-side counter and interact with it
    let registry = CounterRegistry::new();
    let counter = registry.create(callback_ref(|count| {
        println!("count = {}", count);
        Ok(())
    }))?;
    registry.increment(counter)?;
    registry.increment(counter)?;
    // A made-up handle is rejected instead of crashing the process
    if let Err(e) = registry.increment(CounterHandle::from_raw(1337)) {
        println!("rejected: {}", e);
    }
    registry.destroy(counter)?;

    // Example 5: Invoke an async computation
    println!("Invoking computation (thread = {:?})", thread::current().id());
    let runner = AsyncRunner::new();
    let config = ComputationConfig::new().with_step_interval(Duration::from_millis(100));
    let computation = runner.spawn(
        callback_ref(|progress| {
            println!(
                "asyncCallback: thread = {:?}, progress = {}%",
                thread::current().id(),
                progress
            );
            Ok(())
        }),
        None,
        &config,
    )?;
    let report = computation.join()?;
    println!("Computation {} delivered {} updates", report.id, report.delivered.len());

    Ok(())
}
