use super::*;
use tether_adapters::{AuthError, FakeAuthProvider, FakeTransport, NopAuthProvider, TransportCall};
use tether_core::{DescribeOptions, StatusCode, UNBOUNDED_LIMIT};

const NODE: &str = "/local/coordination";

fn start_request(key: &str) -> SessionStart {
    SessionStart {
        path: NODE.to_string(),
        session_id: None,
        timeout: Duration::from_secs(5),
        description: "test".to_string(),
        seq_no: 1,
        protection_key: key.as_bytes().to_vec(),
        token: String::new(),
    }
}

fn start<A: AuthProvider>(fake: &FakeTransport, auth: A) -> (CoordinationSession, EventReceiver) {
    let (tx, rx) = event_channel();
    let session = CoordinationSession::start(
        fake.clone(),
        auth,
        SessionConfig::new(NODE),
        start_request("key"),
        tx,
    );
    (session, rx)
}

async fn next(rx: &mut EventReceiver) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
        .event
}

async fn started(fake: &FakeTransport) -> (CoordinationSession, EventReceiver, SessionId) {
    let (session, mut rx) = start(fake, NopAuthProvider);
    let SessionEvent::Started { session_id } = next(&mut rx).await else {
        panic!("expected Started");
    };
    (session, rx, session_id)
}

fn create(handle: &SessionHandle, name: &str, limit: u64) -> RequestId {
    handle
        .send(|req_id| SessionRequest::CreateSemaphore {
            req_id,
            name: name.to_string(),
            limit,
            data: Vec::new(),
        })
        .unwrap()
}

fn acquire(handle: &SessionHandle, name: &str, data: &[u8], timeout: Option<Duration>) -> RequestId {
    handle
        .send(|req_id| SessionRequest::AcquireSemaphore {
            req_id,
            name: name.to_string(),
            count: 1,
            timeout,
            data: data.to_vec(),
            ephemeral: false,
        })
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn start_reports_the_assigned_session_id() {
    let fake = FakeTransport::new(NODE);
    let (session, _rx, session_id) = started(&fake).await;

    assert_eq!(fake.sessions(), vec![session_id]);
    let handle = session.handle();
    assert!(handle.is_active());
    assert_eq!(handle.session_id(), Some(session_id));
    assert_eq!(handle.wait_started().await.unwrap(), session_id);
}

#[tokio::test(start_paused = true)]
async fn requests_are_refused_until_the_session_is_active() {
    let fake = FakeTransport::new(NODE);
    let (session, mut rx) = start(&fake, NopAuthProvider);

    let handle = session.handle();
    let refused = handle.send(|req_id| SessionRequest::ReleaseSemaphore {
        req_id,
        name: "lock".to_string(),
    });
    assert!(matches!(refused, Err(EngineError::NoActiveSession)));

    assert!(matches!(next(&mut rx).await, SessionEvent::Started { .. }));
    assert!(handle.is_active());
}

#[tokio::test(start_paused = true)]
async fn results_are_correlated_by_req_id() {
    let fake = FakeTransport::new(NODE);
    let (session, mut rx, _) = started(&fake).await;
    let handle = session.handle();

    let create_id = create(&handle, "pub/svc-a", UNBOUNDED_LIMIT);
    let acquire_id = acquire(&handle, "pub/svc-a", b"10.0.0.5:9000", None);
    assert_ne!(create_id, acquire_id);

    assert_eq!(
        next(&mut rx).await,
        SessionEvent::CreateResult {
            req_id: create_id,
            name: "pub/svc-a".to_string(),
            status: Status::success(),
        }
    );
    assert_eq!(
        next(&mut rx).await,
        SessionEvent::AcquireResult {
            req_id: acquire_id,
            name: "pub/svc-a".to_string(),
            acquired: true,
            status: Status::success(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn queued_acquire_reports_pending_then_result() {
    let fake = FakeTransport::new(NODE);
    let (holder, mut holder_rx, _) = started(&fake).await;
    let (waiter, mut waiter_rx, waiter_id) = started(&fake).await;

    create(&holder.handle(), "lock", 1);
    next(&mut holder_rx).await;
    acquire(&holder.handle(), "lock", b"holder", None);
    assert!(matches!(
        next(&mut holder_rx).await,
        SessionEvent::AcquireResult { acquired: true, .. }
    ));

    let req_id = acquire(&waiter.handle(), "lock", b"waiter", None);
    assert_eq!(
        next(&mut waiter_rx).await,
        SessionEvent::AcquirePending {
            req_id,
            name: "lock".to_string(),
        }
    );

    holder
        .handle()
        .send(|req_id| SessionRequest::ReleaseSemaphore {
            req_id,
            name: "lock".to_string(),
        })
        .unwrap();
    assert!(matches!(
        next(&mut holder_rx).await,
        SessionEvent::ReleaseResult { released: true, .. }
    ));
    assert!(matches!(
        next(&mut waiter_rx).await,
        SessionEvent::AcquireResult { req_id: r, acquired: true, .. } if r == req_id
    ));

    let owners = fake.describe("lock").unwrap().owners;
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].session_id, waiter_id);
}

#[tokio::test(start_paused = true)]
async fn describe_watch_delivers_one_change_notification() {
    let fake = FakeTransport::new(NODE);
    let (watcher, mut watcher_rx, _) = started(&fake).await;
    let (publisher, mut publisher_rx, _) = started(&fake).await;

    create(&publisher.handle(), "registry", UNBOUNDED_LIMIT);
    next(&mut publisher_rx).await;

    let watch_id = watcher
        .handle()
        .send(|req_id| SessionRequest::DescribeSemaphore {
            req_id,
            name: "registry".to_string(),
            options: DescribeOptions::watching_owners(),
        })
        .unwrap();
    match next(&mut watcher_rx).await {
        SessionEvent::DescribeResult {
            req_id,
            watch_added,
            description,
            ..
        } => {
            assert_eq!(req_id, watch_id);
            assert!(watch_added);
            assert!(description.unwrap().owners.is_empty());
        }
        other => panic!("unexpected {:?}", other),
    }

    acquire(&publisher.handle(), "registry", b"10.0.0.5:9000", None);
    assert_eq!(
        next(&mut watcher_rx).await,
        SessionEvent::DescribeChanged {
            req_id: watch_id,
            name: "registry".to_string(),
            data_changed: false,
            owners_changed: true,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn refused_open_is_reported_as_failure() {
    let fake = FakeTransport::new(NODE);
    fake.fail_next_opens(1);
    let (session, mut rx) = start(&fake, NopAuthProvider);

    match next(&mut rx).await {
        SessionEvent::Failure { status } => assert_eq!(status.code, StatusCode::TransportError),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(session.status().state, SessionState::Closed);
    assert_eq!(fake.calls(), vec![TransportCall::OpenRefused]);
}

#[tokio::test(start_paused = true)]
async fn auth_failure_fails_before_opening_a_stream() {
    let fake = FakeTransport::new(NODE);
    let auth = FakeAuthProvider::new("t");
    auth.set_failure(Some(AuthError::Unavailable("vault down".to_string())));
    let (_session, mut rx) = start(&fake, auth.clone());

    match next(&mut rx).await {
        SessionEvent::Failure { status } => assert_eq!(status.code, StatusCode::Unavailable),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(auth.requests(), 1);
    assert!(fake.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn token_is_sent_with_the_start_request() {
    let fake = FakeTransport::new(NODE).with_required_token("secret");

    let (_rejected, mut rx) = start(&fake, FakeAuthProvider::new("wrong"));
    match next(&mut rx).await {
        SessionEvent::Failure { status } => assert_eq!(status.code, StatusCode::Unauthenticated),
        other => panic!("unexpected {:?}", other),
    }

    let (_accepted, mut rx) = start(&fake, FakeAuthProvider::new("secret"));
    assert!(matches!(next(&mut rx).await, SessionEvent::Started { .. }));
}

#[tokio::test(start_paused = true)]
async fn stream_drop_fails_outstanding_requests_then_the_session() {
    let fake = FakeTransport::new(NODE);
    let (holder, mut holder_rx, _) = started(&fake).await;
    let (waiter, mut waiter_rx, _) = started(&fake).await;

    create(&holder.handle(), "lock", 1);
    next(&mut holder_rx).await;
    acquire(&holder.handle(), "lock", b"holder", None);
    next(&mut holder_rx).await;
    let req_id = acquire(&waiter.handle(), "lock", b"waiter", None);
    assert!(matches!(next(&mut waiter_rx).await, SessionEvent::AcquirePending { .. }));

    fake.drop_all_streams();

    match next(&mut waiter_rx).await {
        SessionEvent::AcquireResult {
            req_id: r,
            acquired,
            status,
            ..
        } => {
            assert_eq!(r, req_id);
            assert!(!acquired);
            assert_eq!(status.code, StatusCode::SessionLost);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(next(&mut waiter_rx).await, SessionEvent::Failure { .. }));
    assert!(!waiter.handle().is_active());
}

#[tokio::test(start_paused = true)]
async fn unanswered_pings_expire_the_session() {
    let fake = FakeTransport::new(NODE);
    let (session, mut rx, _) = started(&fake).await;
    fake.set_unresponsive(true);

    match next(&mut rx).await {
        SessionEvent::Failure { status } => {
            assert_eq!(status.code, StatusCode::Timeout);
            assert!(status.issues.contains("pings unanswered"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(session.status().state, SessionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn answered_pings_keep_the_session_alive() {
    let fake = FakeTransport::new(NODE);
    let (session, mut rx, _) = started(&fake).await;

    tokio::time::sleep(Duration::from_secs(30)).await;

    assert!(session.handle().is_active());
    assert!(rx.try_recv().is_err());
    let pings = fake
        .requests()
        .into_iter()
        .filter(|r| matches!(r, SessionRequest::Ping { .. }))
        .count();
    assert!(pings >= 25, "expected regular pings, saw {}", pings);
}

#[tokio::test(start_paused = true)]
async fn service_pings_are_answered() {
    let fake = FakeTransport::new(NODE);
    let (_session, _rx, _) = started(&fake).await;

    fake.ping_all(42);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(fake
        .requests()
        .contains(&SessionRequest::Pong { opaque: 42 }));
}

#[tokio::test(start_paused = true)]
async fn unanswered_start_times_out() {
    let fake = FakeTransport::new(NODE);
    fake.set_unresponsive(true);
    let (_session, mut rx) = start(&fake, NopAuthProvider);

    match next(&mut rx).await {
        SessionEvent::Failure { status } => assert_eq!(status.code, StatusCode::Timeout),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn acquire_without_result_times_out_locally() {
    let fake = FakeTransport::new(NODE);
    let (tx, mut rx) = event_channel();
    let config = SessionConfig::new(NODE).with_settings(SessionSettings {
        timeout: Duration::from_secs(1),
        ..SessionSettings::default()
    });
    let session = CoordinationSession::start(fake.clone(), NopAuthProvider, config, start_request("key"), tx);
    assert!(matches!(next(&mut rx).await, SessionEvent::Started { .. }));
    create(&session.handle(), "lock", 1);
    next(&mut rx).await;

    // Deadline is 500ms plus one session timeout, well before pings expire
    fake.set_unresponsive(true);
    let req_id = acquire(&session.handle(), "lock", b"x", Some(Duration::from_millis(500)));

    match next(&mut rx).await {
        SessionEvent::AcquireResult {
            req_id: r, status, ..
        } => {
            assert_eq!(r, req_id);
            assert_eq!(status.code, StatusCode::Timeout);
            assert!(status.issues.contains("local deadline"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_outstanding_requests_and_confirms() {
    let fake = FakeTransport::new(NODE);
    let (holder, mut holder_rx, _) = started(&fake).await;
    let (waiter, mut waiter_rx, waiter_id) = started(&fake).await;

    create(&holder.handle(), "lock", 1);
    next(&mut holder_rx).await;
    acquire(&holder.handle(), "lock", b"holder", None);
    next(&mut holder_rx).await;
    let req_id = acquire(&waiter.handle(), "lock", b"waiter", None);
    assert!(matches!(next(&mut waiter_rx).await, SessionEvent::AcquirePending { .. }));

    let handle = waiter.handle();
    waiter.stop().await;

    match next(&mut waiter_rx).await {
        SessionEvent::AcquireResult {
            req_id: r, status, ..
        } => {
            assert_eq!(r, req_id);
            assert_eq!(status.code, StatusCode::Cancelled);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(next(&mut waiter_rx).await, SessionEvent::Stopped);
    assert!(waiter_rx.recv().await.is_none());

    assert!(!handle.is_active());
    assert!(matches!(
        handle.send(|req_id| SessionRequest::ReleaseSemaphore {
            req_id,
            name: "lock".to_string()
        }),
        Err(EngineError::NoActiveSession)
    ));
    assert!(!fake.sessions().contains(&waiter_id));
    assert!(fake.requests().contains(&SessionRequest::SessionStop));
}

#[tokio::test(start_paused = true)]
async fn stop_before_start_emits_only_stopped() {
    let fake = FakeTransport::new(NODE);
    let (session, mut rx) = start(&fake, NopAuthProvider);

    session.stop().await;

    assert_eq!(next(&mut rx).await, SessionEvent::Stopped);
    assert!(rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_session_stops_it() {
    let fake = FakeTransport::new(NODE);
    let (session, mut rx, session_id) = started(&fake).await;

    drop(session);

    assert_eq!(next(&mut rx).await, SessionEvent::Stopped);
    assert!(!fake.sessions().contains(&session_id));
}

#[tokio::test(start_paused = true)]
async fn attempts_are_numbered_uniquely() {
    let fake = FakeTransport::new(NODE);
    let (first, mut first_rx) = start(&fake, NopAuthProvider);
    let (second, _second_rx) = start(&fake, NopAuthProvider);

    assert_ne!(first.attempt(), second.attempt());
    let event = first_rx.recv().await.unwrap();
    assert_eq!(event.attempt, first.attempt());
}

#[tokio::test(start_paused = true)]
async fn request_queued_as_the_stream_drops_still_gets_a_result() {
    let fake = FakeTransport::new(NODE);
    // The driver picks between the queued request and the closed stream
    // at random, so cover both orders
    for _ in 0..40 {
        let (session, mut rx, _) = started(&fake).await;
        let handle = session.handle();

        fake.drop_all_streams();
        let req_id = acquire(&handle, "lock", b"x", None);

        let mut results = Vec::new();
        loop {
            match next(&mut rx).await {
                SessionEvent::AcquireResult {
                    req_id: r,
                    acquired,
                    status,
                    ..
                } => results.push((r, acquired, status.code)),
                SessionEvent::Failure { .. } => break,
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(results, vec![(req_id, false, StatusCode::SessionLost)]);
        assert!(matches!(
            handle.send(|req_id| SessionRequest::ReleaseSemaphore {
                req_id,
                name: "lock".to_string()
            }),
            Err(EngineError::NoActiveSession)
        ));
    }
}

#[tokio::test(start_paused = true)]
async fn request_sent_during_stop_is_cancelled() {
    let fake = FakeTransport::new(NODE);
    let (session, mut rx, _) = started(&fake).await;
    let handle = session.handle();

    // Swallow the stop so the driver waits out its stop timeout
    fake.set_unresponsive(true);
    let stopping = tokio::spawn(session.stop());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(handle.is_active());
    let req_id = acquire(&handle, "lock", b"late", None);
    stopping.await.unwrap();

    match next(&mut rx).await {
        SessionEvent::AcquireResult {
            req_id: r,
            acquired,
            status,
            ..
        } => {
            assert_eq!(r, req_id);
            assert!(!acquired);
            assert_eq!(status.code, StatusCode::Cancelled);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(next(&mut rx).await, SessionEvent::Stopped);
    assert!(matches!(
        handle.send(|req_id| SessionRequest::ReleaseSemaphore {
            req_id,
            name: "lock".to_string()
        }),
        Err(EngineError::NoActiveSession)
    ));
}

#[tokio::test(start_paused = true)]
async fn attempts_sharing_request_ids_never_reuse_one() {
    let fake = FakeTransport::new(NODE);
    let ids = RequestIds::default();
    let mut seen = Vec::new();
    for key in ["a", "b"] {
        let (tx, mut rx) = event_channel();
        let config = SessionConfig::new(NODE).with_request_ids(ids.clone());
        let session = CoordinationSession::start(fake.clone(), NopAuthProvider, config, start_request(key), tx);
        assert!(matches!(next(&mut rx).await, SessionEvent::Started { .. }));
        seen.push(create(&session.handle(), "lock", 1));
        seen.push(create(&session.handle(), "lock", 1));
        session.stop().await;
    }
    assert_eq!(seen, vec![1, 2, 3, 4]);
}
