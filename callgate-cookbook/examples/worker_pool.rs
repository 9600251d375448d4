//! Use the bounded executor on its own: 50 jobs of 100ms on 10 workers.

use callgate::{await_all, BoundedExecutor};
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let executor = BoundedExecutor::new(10)?;
    let started = Instant::now();

    let handles: Vec<_> = (0..50u32)
        .map(|i| {
            executor.dispatch(move || async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                if i % 2 == 1 {
                    Err(format!("job {} failed", i))
                } else {
                    Ok(i)
                }
            })
        })
        .collect();

    let results = await_all(handles).await;
    let ok = results.iter().filter(|r| r.is_ok()).count();
    println!(
        "{} ok, {} failed in {:?} (max {} at a time)",
        ok,
        results.len() - ok,
        started.elapsed(),
        executor.max_concurrency()
    );

    executor.shutdown().await;
    Ok(())
}
