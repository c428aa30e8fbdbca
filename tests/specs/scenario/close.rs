//! Scenario close specs
//!
//! Closing settles every outstanding request exactly once and then goes quiet.

use crate::prelude::*;
use crate::prelude::assert_eq;

fn acquire_results(events: &[ScenarioEvent]) -> Vec<(bool, StatusCode)> {
    events
        .iter()
        .filter_map(|e| match e {
            ScenarioEvent::AcquireResult {
                acquired, status, ..
            } => Some((*acquired, status.code)),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn close_settles_a_queued_acquire_exactly_once() {
    let service = Service::new();
    let (mut holder, _) = service.started_client("jobs").await;
    let (mut waiter, _) = service.started_client("jobs").await;

    holder.create("jobs", 1);
    holder.acquire("jobs", "worker-1");
    assert!(holder.created().await.is_success());
    assert_eq!(holder.event().await.name(), "semaphore:acquire");

    waiter.acquire("jobs", "worker-2");
    assert_eq!(waiter.event().await.name(), "semaphore:acquire_pending");

    let rest = waiter.close().await;
    assert_eq!(
        acquire_results(&rest),
        vec![(false, StatusCode::Cancelled)]
    );
    assert!(service.fake.describe("jobs").unwrap().waiters.is_empty());

    holder.close().await;
}

#[tokio::test(start_paused = true)]
async fn close_while_reconnecting_returns_promptly() {
    let service = Service::new();
    service.fake.fail_next_opens(u32::MAX);
    let mut client = service.client(
        ScenarioSettings::new("jobs").with_backoff(
            BackoffPolicy::default().with_initial_delay(Duration::from_secs(3600)),
        ),
    );
    assert_eq!(client.event().await.name(), "session:failed");
    assert_eq!(client.event().await.name(), "session:reconnecting");

    let started = tokio::time::Instant::now();
    let rest = client.close().await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(rest.is_empty(), "{:?}", rest);
}

#[tokio::test(start_paused = true)]
async fn closed_scenario_removes_its_session() {
    let service = Service::new();
    let (client, session_id) = service.started_client("jobs").await;
    assert_eq!(service.fake.sessions(), vec![session_id]);

    client.close().await;

    assert!(service.fake.sessions().is_empty());
    assert_eq!(service.fake.open_streams(), 0);
}
