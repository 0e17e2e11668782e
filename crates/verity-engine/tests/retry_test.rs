use std::time::Duration;
use tokio::time::Instant;

use verity_common::error::{DriverError, TestError};
use verity_engine::retry::{RetryPolicy, with_retry};

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff_base: Duration::from_millis(100),
        backoff_multiplier: 2.0,
        ..RetryPolicy::default()
    }
}

fn network_error() -> TestError {
    TestError::Driver(DriverError::Network("connection reset".into()))
}

#[tokio::test(start_paused = true)]
async fn permanently_failing_retryable_action_attempts_exactly_n() {
    let mut attempt_times: Vec<Instant> = Vec::new();

    let error = with_retry(&policy(4), &mut attempt_times, |times, _attempt| {
        Box::pin(async move {
            times.push(Instant::now());
            Err::<(), _>(network_error())
        })
    })
    .await
    .unwrap_err();

    match error {
        TestError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 4);
            assert!(matches!(*last, TestError::Driver(DriverError::Network(_))));
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }

    assert_eq!(attempt_times.len(), 4);

    // Inter-attempt delays follow base * multiplier^(attempt-1) and are
    // strictly increasing.
    let delays: Vec<Duration> = attempt_times
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
        ]
    );
    assert!(delays.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test(start_paused = true)]
async fn non_retryable_error_gets_exactly_one_attempt() {
    let mut attempts = 0u32;

    let error = with_retry(&policy(5), &mut attempts, |count, _attempt| {
        Box::pin(async move {
            *count += 1;
            Err::<(), _>(TestError::Assertion("wrong title".into()))
        })
    })
    .await
    .unwrap_err();

    assert!(matches!(error, TestError::Assertion(_)));
    assert_eq!(attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn ambiguous_element_is_not_retried() {
    let mut attempts = 0u32;

    let error = with_retry(&policy(5), &mut attempts, |count, _attempt| {
        Box::pin(async move {
            *count += 1;
            Err::<(), _>(TestError::AmbiguousOrMissing {
                target: "css=.row".into(),
                counts: Default::default(),
            })
        })
    })
    .await
    .unwrap_err();

    assert!(matches!(error, TestError::AmbiguousOrMissing { .. }));
    assert_eq!(attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn success_on_third_attempt_reports_attempt_count() {
    let mut failures_left = 2u32;

    let retried = with_retry(&policy(3), &mut failures_left, |left, _attempt| {
        Box::pin(async move {
            if *left > 0 {
                *left -= 1;
                Err(network_error())
            } else {
                Ok(42)
            }
        })
    })
    .await
    .unwrap();

    assert_eq!(retried.value, 42);
    assert_eq!(retried.attempts, 3);
    assert!(retried.was_flaky());
}

#[tokio::test(start_paused = true)]
async fn first_attempt_success_is_not_flaky() {
    let mut unused = ();
    let retried = with_retry(&policy(3), &mut unused, |_ctx, _attempt| {
        Box::pin(async move { Ok("done") })
    })
    .await
    .unwrap();

    assert_eq!(retried.attempts, 1);
    assert!(!retried.was_flaky());
}

#[tokio::test(start_paused = true)]
async fn wait_timeout_is_retryable_by_default() {
    let mut attempts = 0u32;

    let error = with_retry(&policy(2), &mut attempts, |count, _attempt| {
        Box::pin(async move {
            *count += 1;
            Err::<(), _>(TestError::WaitTimeout {
                condition: "network-idle".into(),
                elapsed: Duration::from_secs(2),
            })
        })
    })
    .await
    .unwrap_err();

    assert!(matches!(
        error,
        TestError::RetriesExhausted { attempts: 2, .. }
    ));
    assert_eq!(attempts, 2);
}
