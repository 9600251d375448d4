mod common;

use callgate::telemetry::{AdmissionEvent, LimiterEvent, MemorySink};
use callgate::{await_all, AdmissionController, CallState, LimiterConfig, QuotaLimits};
use common::test_helpers::{manual_controller, TestError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn ok() -> impl std::future::Future<Output = Result<(), TestError>> {
    async { Ok(()) }
}

#[tokio::test]
async fn no_window_admits_more_than_the_limit() {
    let (limiter, clock, _sink) = manual_controller(3, Duration::from_secs(1), Duration::ZERO, 4);

    for window in 0..5 {
        let mut admitted = 0;
        for _ in 0..7 {
            if !limiter.submit(ok).await.is_rejected() {
                admitted += 1;
            }
            clock.advance(Duration::from_millis(100));
        }
        assert_eq!(admitted, 3, "window {}", window);
        // Land exactly on the next boundary.
        clock.advance(Duration::from_millis(300));
    }
}

#[tokio::test]
async fn refresh_zeroes_count_and_moves_window_start() {
    let (limiter, clock, sink) = manual_controller(2, Duration::from_millis(500), Duration::ZERO, 2);

    limiter.submit(ok).await;
    limiter.submit(ok).await;
    clock.advance(Duration::from_millis(499));
    assert_eq!(limiter.snapshot().await.calls_in_window, 2);
    assert_eq!(limiter.snapshot().await.window_remaining, Duration::from_millis(1));

    clock.advance(Duration::from_millis(1));
    assert_eq!(limiter.snapshot().await.calls_in_window, 0);
    limiter.submit(ok).await;

    let snapshot = limiter.snapshot().await;
    assert_eq!(snapshot.calls_in_window, 1);
    assert_eq!(snapshot.window_remaining, Duration::from_millis(500));
    assert_eq!(
        sink.of_kind("window_refreshed"),
        vec![LimiterEvent::Admission(AdmissionEvent::WindowRefreshed {
            previous_calls: 2,
            refresh_period: Duration::from_millis(500),
        })]
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_submitters_stay_spaced() {
    let sink = MemorySink::new();
    let config = LimiterConfig::builder()
        .call_limit(100)
        .refresh_period(Duration::from_secs(60))
        .min_interval(Duration::from_millis(250))
        .max_concurrency(2)
        .build()
        .unwrap();
    let limiter = AdmissionController::with_sink(&config, sink.clone());

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let mut handles = Vec::new();
                for _ in 0..5 {
                    handles.push(limiter.submit(ok).await);
                }
                await_all(handles).await
            })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().iter().all(|r| r.is_ok()));
    }

    let mut admitted: Vec<Duration> = sink
        .of_kind("call_admitted")
        .into_iter()
        .filter_map(|event| match event {
            LimiterEvent::Admission(AdmissionEvent::Admitted { elapsed, .. }) => Some(elapsed),
            _ => None,
        })
        .collect();
    admitted.sort();
    assert_eq!(admitted.len(), 20);
    for pair in admitted.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(250), "{:?}", pair);
    }
}

#[tokio::test]
async fn one_failure_leaves_the_batch_alone() {
    let (limiter, _clock, _sink) = manual_controller(10, Duration::from_secs(1), Duration::ZERO, 3);

    let mut handles = Vec::new();
    for i in 0..6u32 {
        handles.push(
            limiter
                .submit(move || async move {
                    match i {
                        2 => panic!("call {} blew up", i),
                        4 => Err(TestError("bad gateway".into())),
                        _ => Ok(i),
                    }
                })
                .await,
        );
    }
    let results = await_all(handles).await;

    assert!(results[2].as_ref().unwrap_err().is_panic());
    assert!(results[4].as_ref().unwrap_err().is_inner());
    for i in [0, 1, 3, 5] {
        assert_eq!(results[i].as_ref().unwrap(), &(i as u32));
    }
}

#[tokio::test]
async fn handle_reaches_exactly_one_terminal_state() {
    let (limiter, _clock, _sink) = manual_controller(1, Duration::from_secs(60), Duration::ZERO, 1);
    let (release, wait) = tokio::sync::oneshot::channel::<()>();

    let running = limiter
        .submit(move || async move {
            let _ = wait.await;
            Ok::<_, TestError>("done")
        })
        .await;
    let rejected = limiter.submit(ok).await;

    assert!(!running.is_finished());
    assert_eq!(rejected.state(), CallState::Rejected);

    release.send(()).unwrap();
    let id = running.id();
    assert_eq!(running.await.unwrap(), "done");
    assert!(id < rejected.id());
}

#[tokio::test(start_paused = true)]
async fn shutdown_twice_equals_once() {
    let (limiter, _clock, _sink) = manual_controller(10, Duration::from_secs(1), Duration::ZERO, 2);
    let finished = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let finished = finished.clone();
        handles.push(
            limiter
                .submit(move || async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TestError>(())
                })
                .await,
        );
    }

    let other = limiter.clone();
    tokio::join!(limiter.shutdown(), other.shutdown());
    assert_eq!(finished.load(Ordering::SeqCst), 3);
    limiter.shutdown().await;

    assert!(limiter.is_shutdown());
    assert!(await_all(handles).await.iter().all(|r| r.is_ok()));
    assert!(limiter.submit(ok).await.await.unwrap_err().is_shutdown());
}

#[tokio::test]
async fn reconfigured_spacing_applies_to_next_submission() {
    let (limiter, clock, _sink) = manual_controller(10, Duration::from_secs(60), Duration::ZERO, 2);
    limiter.submit(ok).await;
    let first = clock_now(&limiter).await;

    limiter
        .reconfigure(QuotaLimits::new(10, Duration::from_secs(60), Duration::from_millis(300)))
        .unwrap();
    limiter.submit(ok).await;
    let second = clock_now(&limiter).await;

    assert_eq!(second - first, Duration::from_millis(300));
    assert_eq!(clock_value(&clock), second);
}

async fn clock_now<K: callgate::TelemetrySink>(limiter: &AdmissionController<K>) -> Duration {
    limiter.snapshot().await.last_admission.unwrap()
}

fn clock_value(clock: &callgate::ManualClock) -> Duration {
    use callgate::Clock;
    clock.now()
}

#[tokio::test(start_paused = true)]
async fn sub_millisecond_window_still_enforces_the_limit() {
    let config = LimiterConfig::new(1, Duration::from_micros(500), Duration::ZERO, 4).unwrap();
    let limiter = AdmissionController::with_sink(&config, MemorySink::new());

    let mut admitted = 0;
    for _ in 0..5 {
        if !limiter.submit(ok).await.is_rejected() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(limiter.snapshot().await.rejected_in_window, 4);
}

#[tokio::test(start_paused = true)]
async fn sub_millisecond_interval_still_spaces_admissions() {
    let config = LimiterConfig::new(100, Duration::from_secs(60), Duration::from_micros(900), 4)
        .unwrap();
    let limiter = AdmissionController::with_sink(&config, MemorySink::new());
    let started = tokio::time::Instant::now();

    let mut handles = Vec::new();
    for _ in 0..5 {
        handles.push(limiter.submit(ok).await);
    }
    assert!(await_all(handles).await.iter().all(|r| r.is_ok()));
    assert!(started.elapsed() >= Duration::from_micros(3_600), "{:?}", started.elapsed());
}

#[tokio::test]
async fn fractional_milliseconds_count_toward_spacing() {
    let (limiter, clock, _sink) =
        manual_controller(10, Duration::from_secs(60), Duration::from_millis(500), 2);
    clock.advance(Duration::from_micros(1_000_900));
    limiter.submit(ok).await;
    let first = clock_now(&limiter).await;

    clock.advance(Duration::from_micros(499_300));
    limiter.submit(ok).await;
    let second = clock_now(&limiter).await;

    assert_eq!(second - first, Duration::from_millis(500));
    assert_eq!(second, Duration::from_micros(1_500_900));
}
