//! Fire 20 concurrent submissions at a limiter that allows 10 per second.
//!
//! Half are admitted, half come back immediately as `RateLimitExceeded`.

use callgate::{await_all, AdmissionController, LimiterError};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let limiter = AdmissionController::configure(10, Duration::from_secs(1), Duration::ZERO, 10)?;

    let submissions = (0..20u32).map(|i| {
        let limiter = limiter.clone();
        async move { limiter.submit(move || async move { Ok::<_, std::io::Error>(i) }).await }
    });
    let handles = futures::future::join_all(submissions).await;

    let mut admitted = 0;
    let mut rejected = 0;
    for result in await_all(handles).await {
        match result {
            Ok(_) => admitted += 1,
            Err(LimiterError::RateLimitExceeded { retry_after, .. }) => {
                rejected += 1;
                println!("rejected, retry in {:?}", retry_after);
            }
            Err(other) => println!("unexpected: {}", other),
        }
    }
    println!("{} admitted, {} rejected", admitted, rejected);

    println!("{:?}", limiter.snapshot().await);
    limiter.shutdown().await;
    Ok(())
}
