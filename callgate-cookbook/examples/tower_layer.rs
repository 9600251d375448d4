//! Put the limiter in front of a tower service.

use callgate::{AdmissionLayer, LimiterConfig};
use callgate_cookbook::observed;
use std::time::Duration;
use tower::{service_fn, ServiceBuilder, ServiceExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = LimiterConfig::builder()
        .call_limit(3)
        .refresh_period(Duration::from_secs(2))
        .min_interval(Duration::from_millis(200))
        .max_concurrency(2)
        .build()?;
    let (limiter, memory) = observed(&config);

    let svc = ServiceBuilder::new()
        .layer(AdmissionLayer::new(limiter.clone()))
        .service(service_fn(|name: String| async move {
            Ok::<_, std::io::Error>(format!("hello, {}", name))
        }));

    for name in ["ada", "grace", "barbara", "edsger"] {
        match svc.clone().oneshot(name.to_string()).await {
            Ok(reply) => println!("{}", reply),
            Err(e) => println!("{} was throttled: {}", name, e),
        }
    }

    println!("\nCaptured telemetry events:");
    for event in memory.events() {
        println!("  - {}", event);
    }
    limiter.shutdown().await;
    Ok(())
}
