//! Semaphore create specs
//!
//! Creating is idempotent for the same limit and conflicts otherwise.

use crate::prelude::*;
use crate::prelude::assert_eq;

#[tokio::test(start_paused = true)]
async fn second_create_with_same_limit_is_a_noop() {
    let service = Service::new();
    let (mut client, _) = service.started_client("jobs").await;

    client.create("jobs", 3);
    client.create("jobs", 3);

    assert_eq!(client.created().await, Status::success());
    assert_eq!(client.created().await, Status::success());
    assert_eq!(service.fake.describe("jobs").unwrap().limit, 3);

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn create_with_different_limit_conflicts() {
    let service = Service::new();
    let (mut first, _) = service.started_client("jobs").await;
    let (mut second, _) = service.started_client("jobs").await;

    first.create("jobs", 3);
    assert!(first.created().await.is_success());

    second.create("jobs", 4);
    let status = second.created().await;
    assert_eq!(status.code, StatusCode::AlreadyExists);
    assert_eq!(service.fake.describe("jobs").unwrap().limit, 3);

    first.close().await;
    second.close().await;
}

#[tokio::test(start_paused = true)]
async fn unbounded_create_is_idempotent_across_sessions() {
    let service = Service::new();
    let (mut first, _) = service.started_client("pub/svc-a").await;
    let (mut second, _) = service.started_client("pub/svc-a").await;

    first.create("pub/svc-a", UNBOUNDED_LIMIT);
    assert!(first.created().await.is_success());
    second.create("pub/svc-a", UNBOUNDED_LIMIT);
    assert!(second.created().await.is_success());

    first.close().await;
    second.close().await;
}
