//! Flight search against a mocked API with a watchable quota window.
//!
//! 15 searches are submitted back to back to a limiter allowing 50 calls per
//! 5 seconds with at least 1 second between calls. Every admission, window
//! refresh and completion is logged.

use callgate::{await_all, presets, AdmissionController};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct ApiError(u32);

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upstream returned 500 for search #{}", self.0)
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Clone)]
struct FlightQuery {
    origin: &'static str,
    destination: &'static str,
    adults: u8,
}

/// Stand-in for a flight offers endpoint: 80ms latency, every seventh call fails.
#[derive(Clone, Default)]
struct MockFlightApi {
    calls: Arc<AtomicU32>,
}

impl MockFlightApi {
    async fn search(&self, query: FlightQuery) -> Result<Vec<String>, ApiError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(80)).await;
        if n % 7 == 0 {
            return Err(ApiError(n));
        }
        Ok(vec![format!("{}->{} x{} offer #{}", query.origin, query.destination, query.adults, n)])
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let limiter = AdmissionController::new(&presets::burst_window());
    let api = MockFlightApi::default();

    println!("Sending requests ...");
    let mut handles = Vec::new();
    for _ in 0..15 {
        let api = api.clone();
        let query = FlightQuery { origin: "MAD", destination: "LHR", adults: 1 };
        let search = move |q: FlightQuery| async move { api.search(q).await };
        handles.push(limiter.submit_with(search, query).await);
    }

    let results = await_all(handles).await;
    let successful = results.iter().filter(|r| r.is_ok()).count();
    let failed = results.len() - successful;
    println!("{} successful requests and {} fails", successful, failed);

    limiter.shutdown().await;
}
