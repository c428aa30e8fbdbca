use super::*;
use crate::status::StatusCode;
use yare::parameterized;

fn unavailable() -> Status {
    Status::new(StatusCode::Unavailable, "stream dropped")
}

#[parameterized(
    first = { 0, 100 },
    second = { 1, 200 },
    third = { 2, 400 },
    capped = { 6, 5000 },
    huge = { 10_000, 5000 },
)]
fn delay_grows_exponentially_up_to_cap(retry: u32, expected_ms: u64) {
    let policy = BackoffPolicy::default();
    assert_eq!(policy.delay_for(retry), Duration::from_millis(expected_ms));
}

#[test]
fn flat_multiplier_keeps_initial_delay() {
    let policy = BackoffPolicy::default()
        .with_initial_delay(Duration::from_millis(250))
        .with_multiplier(1.0);
    assert_eq!(policy.delay_for(7), Duration::from_millis(250));
}

#[test]
fn retries_forever_by_default() {
    let policy = BackoffPolicy::default();
    let mut state = RetryState::default();
    for _ in 0..1000 {
        state.record_failure();
    }
    assert!(matches!(
        state.next_action(&policy, &unavailable()),
        RetryAction::Retry { attempt: 1001, .. }
    ));
}

#[test]
fn gives_up_after_max_retries() {
    let policy = BackoffPolicy::default().with_max_retries(Some(2));
    let mut state = RetryState::default();

    assert_eq!(
        state.next_action(&policy, &unavailable()),
        RetryAction::Retry {
            attempt: 1,
            delay: Duration::from_millis(100)
        }
    );
    state.record_failure();
    assert_eq!(
        state.next_action(&policy, &unavailable()),
        RetryAction::Retry {
            attempt: 2,
            delay: Duration::from_millis(200)
        }
    );
    state.record_failure();
    assert_eq!(state.next_action(&policy, &unavailable()), RetryAction::GiveUp);
}

#[test]
fn zero_retries_gives_up_immediately() {
    let policy = BackoffPolicy::default().with_max_retries(Some(0));
    let state = RetryState::default();
    assert_eq!(state.next_action(&policy, &unavailable()), RetryAction::GiveUp);
}

#[parameterized(
    bad_request = { StatusCode::BadRequest },
    unauthenticated = { StatusCode::Unauthenticated },
)]
fn non_retryable_status_gives_up(code: StatusCode) {
    let state = RetryState::default();
    assert_eq!(
        state.next_action(&BackoffPolicy::default(), &Status::new(code, "")),
        RetryAction::GiveUp
    );
}

#[test]
fn reset_restarts_from_initial_delay() {
    let policy = BackoffPolicy::default();
    let mut state = RetryState::default();
    state.record_failure();
    state.record_failure();
    state.reset();

    assert_eq!(
        state.next_action(&policy, &unavailable()),
        RetryAction::Retry {
            attempt: 1,
            delay: Duration::from_millis(100)
        }
    );
}
