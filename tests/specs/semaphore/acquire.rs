//! Semaphore acquire specs

use crate::prelude::*;
use crate::prelude::assert_eq;

fn acquired(event: &ScenarioEvent) -> Option<(bool, Status)> {
    match event {
        ScenarioEvent::AcquireResult {
            acquired, status, ..
        } => Some((*acquired, status.clone())),
        _ => None,
    }
}

#[tokio::test(start_paused = true)]
async fn unbounded_acquire_succeeds_exactly_once() {
    let service = Service::new();
    let (mut client, session_id) = service.started_client("pub/svc-a").await;

    client.create("pub/svc-a", UNBOUNDED_LIMIT);
    client.acquire("pub/svc-a", "10.0.0.5:9000");

    assert!(client.created().await.is_success());
    assert_eq!(client.until(acquired).await, (true, Status::success()));

    tokio::time::sleep(Duration::from_secs(30)).await;
    let rest = client.close().await;
    assert!(rest.iter().all(|e| acquired(e).is_none()), "{:?}", rest);

    assert!(!service.fake.sessions().contains(&session_id));
}

#[tokio::test(start_paused = true)]
async fn started_precedes_results_of_its_requests() {
    let service = Service::new();
    let mut client = service.client(ScenarioSettings::new("jobs"));

    let mut events = vec![client.event().await];
    client.create("jobs", 1);
    client.acquire("jobs", "worker-1");
    events.push(client.event().await);
    events.push(client.event().await);

    let names: Vec<&str> = events.iter().map(|e| e.name()).collect();
    assert_eq!(
        names,
        vec!["session:started", "semaphore:create", "semaphore:acquire"]
    );

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn busy_semaphore_reports_pending_then_acquires_on_release() {
    let service = Service::new();
    let (mut holder, _) = service.started_client("jobs").await;
    let (mut waiter, _) = service.started_client("jobs").await;

    holder.create("jobs", 1);
    holder.acquire("jobs", "worker-1");
    assert_eq!(holder.until(acquired).await, (true, Status::success()));

    waiter.acquire("jobs", "worker-2");
    assert!(matches!(
        waiter.event().await,
        ScenarioEvent::AcquirePending { .. }
    ));

    holder.scenario.semaphores().release("jobs").unwrap();
    assert_eq!(waiter.until(acquired).await, (true, Status::success()));

    let owners = service.fake.describe("jobs").unwrap().owners;
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].data, b"worker-2".to_vec());

    holder.close().await;
    waiter.close().await;
}
