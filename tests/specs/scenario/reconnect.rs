//! Scenario reconnect specs
//!
//! Verify sessions come back after transport and session failures, and that
//! persistent acquires are re-issued without caller involvement.

use crate::prelude::*;
use crate::prelude::assert_eq;

fn persistent(client: &Client, name: &str, data: &str) {
    client
        .scenario
        .semaphores()
        .acquire(name, AcquireOptions::new(data).persistent())
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn transport_drop_resumes_the_session_and_reacquires() {
    let service = Service::new();
    let (mut client, first) = service.started_client("pub/svc-a").await;
    client.create("pub/svc-a", UNBOUNDED_LIMIT);
    persistent(&client, "pub/svc-a", "10.0.0.5:9000");
    assert!(client.created().await.is_success());
    assert_eq!(client.event().await.name(), "semaphore:acquire");

    service.fake.drop_all_streams();

    assert_eq!(client.event().await.name(), "session:failed");
    assert_eq!(
        client.event().await,
        ScenarioEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(100),
        }
    );
    let second = client.started().await;
    assert_eq!(second, first);
    match client.event().await {
        ScenarioEvent::AcquireResult {
            acquired, status, ..
        } => {
            assert!(acquired);
            assert!(status.is_success());
        }
        other => panic!("expected semaphore:acquire, got {:?}", other),
    }

    let owners = service.fake.describe("pub/svc-a").unwrap().owners;
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].data, b"10.0.0.5:9000".to_vec());

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn expired_session_is_replaced_with_a_new_one() {
    let service = Service::new();
    let (mut client, first) = service.started_client("jobs").await;

    service.fake.expire_session(first);

    match client.event().await {
        ScenarioEvent::Failure { status } => assert_eq!(status.code, StatusCode::SessionExpired),
        other => panic!("expected session:failed, got {:?}", other),
    }
    assert_eq!(client.event().await.name(), "session:reconnecting");
    let second = client.started().await;
    assert_ne!(second, first);
    assert_eq!(service.fake.sessions(), vec![second]);

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn bounded_retries_give_up() {
    let service = Service::new();
    service.fake.fail_next_opens(u32::MAX);
    let mut client = service.client(
        ScenarioSettings::new("jobs")
            .with_backoff(BackoffPolicy::default().with_max_retries(Some(1))),
    );

    let mut names = Vec::new();
    while let Some(event) = client.next().await {
        names.push(event.name());
    }

    assert_eq!(
        names,
        vec![
            "session:failed",
            "session:reconnecting",
            "session:failed",
            "session:gave_up",
        ]
    );
    assert!(client.scenario.is_finished());

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn unbounded_retries_outlast_a_long_outage() {
    let service = Service::new();
    service.fake.fail_next_opens(20);
    let mut client = service.client(ScenarioSettings::new("jobs"));

    let session_id = client
        .until(|e| match e {
            ScenarioEvent::SessionStarted { session_id } => Some(*session_id),
            ScenarioEvent::GaveUp { .. } => panic!("gave up: {:?}", e),
            _ => None,
        })
        .await;

    assert_eq!(service.fake.sessions(), vec![session_id]);
    client.close().await;
}
