//! Distributed lock specs

use crate::prelude::*;
use crate::prelude::assert_eq;

fn lock(service: &Service, holder: &str) -> DistributedLock {
    DistributedLock::start(ScenarioSettings::new("lock/jobs"), holder, None, service.deps())
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn only_one_holder_at_a_time() {
    let service = Service::new();
    let first = lock(&service, "worker-1");
    let second = lock(&service, "worker-2");

    // Either may win; the other waits
    tokio::time::sleep(Duration::from_secs(1)).await;
    let (winner, loser) = if first.is_held() {
        (first, second)
    } else {
        (second, first)
    };
    assert!(winner.is_held());
    assert_eq!(loser.status(), LockStatus::Waiting);

    winner.release().unwrap();
    loser.wait_held().await.unwrap();
    assert_eq!(service.fake.describe("lock/jobs").unwrap().owners.len(), 1);

    winner.close().await;
    loser.close().await;
}

#[tokio::test(start_paused = true)]
async fn closing_the_holder_hands_the_lock_over() {
    let service = Service::new();
    let first = lock(&service, "worker-1");
    first.wait_held().await.unwrap();
    let second = lock(&service, "worker-2");

    first.close().await;

    let session_id = second.wait_held().await.unwrap();
    let owners = service.fake.describe("lock/jobs").unwrap().owners;
    assert_eq!(owners[0].session_id, session_id);
    assert_eq!(owners[0].data, b"worker-2".to_vec());

    second.close().await;
}
