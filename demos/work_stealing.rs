//! Work-stealing demo: submit bursts of uneven tasks and watch them spread
//! across the pool.
//!
//! Run with: `cargo run --example work_stealing`

use std::thread;
use std::time::Duration;

use taskbus::{Config, TaskExecutor};

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let pool = TaskExecutor::with_config(Config {
        workers: 4,
        ..Config::default()
    });
    println!("pool started with {} workers", pool.worker_count());

    let handles: Vec<_> = (0..32)
        .map(|i| {
            pool.submit(move || {
                let worker = thread::current()
                    .name()
                    .map(str::to_owned)
                    .unwrap_or_else(|| "?".into());
                // Uneven task cost makes stealing visible.
                thread::sleep(Duration::from_millis(if i % 4 == 0 { 10 } else { 1 }));
                (i, worker)
            })
        })
        .collect();

    for handle in handles {
        let (task, worker) = handle.wait().expect("task completed");
        println!("task {task:>2} ran on {worker}");
    }

    pool.stop(true);
    println!("pool stopped");
}
