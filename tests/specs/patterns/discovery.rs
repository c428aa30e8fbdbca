//! Service-discovery publisher specs
//!
//! A publisher keeps its endpoint visible to readers across reconnects.

use crate::prelude::*;
use crate::prelude::assert_eq;

const ENDPOINT: &str = "10.0.0.5:9000";

fn publisher(service: &Service) -> ServiceDiscoveryPublisher {
    ServiceDiscoveryPublisher::start(ScenarioSettings::new("pub/svc-a"), ENDPOINT, service.deps())
        .unwrap()
}

async fn holders(reader: &mut Client) -> Vec<String> {
    reader
        .scenario
        .semaphores()
        .describe("pub/svc-a", DescribeOptions::owners())
        .unwrap();
    reader
        .until(|e| match e {
            ScenarioEvent::DescribeResult { description, .. } => Some(
                description
                    .as_ref()
                    .map(|d| {
                        d.owner_payloads()
                            .into_iter()
                            .map(|p| String::from_utf8_lossy(p).into_owned())
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default(),
            ),
            _ => None,
        })
        .await
}

#[tokio::test(start_paused = true)]
async fn published_endpoint_is_listed_for_another_session() {
    let service = Service::new();
    let publisher = publisher(&service);
    publisher.wait_published().await.unwrap();

    let (mut reader, _) = service.started_client("pub/svc-a").await;
    assert_eq!(holders(&mut reader).await, vec![ENDPOINT.to_string()]);

    reader.close().await;
    publisher.close().await;
}

#[tokio::test(start_paused = true)]
async fn endpoint_survives_a_transport_drop() {
    let service = Service::new();
    let publisher = publisher(&service);
    let first = publisher.wait_published().await.unwrap();
    let mut status = publisher.subscribe();

    service.fake.drop_all_streams();
    status
        .wait_for(|s| matches!(s, PublisherStatus::Unavailable { .. }))
        .await
        .unwrap();

    let second = publisher.wait_published().await.unwrap();
    assert_eq!(second, first);

    let (mut reader, _) = service.started_client("pub/svc-a").await;
    assert_eq!(holders(&mut reader).await, vec![ENDPOINT.to_string()]);

    reader.close().await;
    publisher.close().await;
}

#[tokio::test(start_paused = true)]
async fn every_live_publisher_is_listed() {
    let service = Service::new();
    let a = publisher(&service);
    let b = ServiceDiscoveryPublisher::start(
        ScenarioSettings::new("pub/svc-a"),
        "10.0.0.6:9000",
        service.deps(),
    )
    .unwrap();
    a.wait_published().await.unwrap();
    b.wait_published().await.unwrap();

    let (mut reader, _) = service.started_client("pub/svc-a").await;
    let mut listed = holders(&mut reader).await;
    listed.sort();
    assert_eq!(listed, vec![ENDPOINT.to_string(), "10.0.0.6:9000".to_string()]);

    b.close().await;
    assert_eq!(holders(&mut reader).await, vec![ENDPOINT.to_string()]);

    reader.close().await;
    a.close().await;
}
