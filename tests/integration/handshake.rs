use crate::*;

use sluice_services::{fetch, SessionError};

// ── NameRequest retries ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_four_lost_name_requests_still_connect() {
    init_tracing();
    let content = test_data(5000, 1);
    let (server, root) = serve_file("hs-four", "f.bin", &content, fast_config(), Faults::default())
        .await
        .unwrap();

    let client = LossyTransport::bind(Faults::drop_first(FrameKind::NameRequest, 4))
        .await
        .unwrap();
    let (_, received) = fetch(client.clone(), server.addr, "f.bin", Vec::new(), fast_config(), None)
        .await
        .expect("fifth NameRequest should get through");

    assert_eq!(client.dropped(), 4);
    assert!(received == content);

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn test_five_lost_name_requests_time_out() {
    init_tracing();
    let (server, root) = serve_file("hs-five", "f.bin", b"unused", fast_config(), Faults::default())
        .await
        .unwrap();

    let client = LossyTransport::bind(Faults::drop_first(FrameKind::NameRequest, 5))
        .await
        .unwrap();
    let (tx, mut events) = mpsc::unbounded_channel();
    let err = fetch(client.clone(), server.addr, "f.bin", Vec::new(), fast_config(), Some(tx))
        .await
        .unwrap_err();

    assert!(
        matches!(err, SessionError::HandshakeTimeout { attempts: 5 }),
        "unexpected error: {err}"
    );
    assert_eq!(client.dropped(), 5);
    assert!(server.sessions.is_empty(), "no NameRequest reached the server");

    let exhausted = wait_for_event(&mut events, Duration::from_millis(100), |ev| {
        matches!(ev, SessionEvent::RetryExhausted { .. })
    })
    .await;
    assert!(matches!(
        exhausted,
        Some(SessionEvent::RetryExhausted {
            phase: sluice_services::Phase::Negotiating,
            ..
        })
    ));

    let _ = std::fs::remove_dir_all(&root);
}

// ── Later handshake steps ───────────────────────────────────────────────────

#[tokio::test]
async fn test_lost_size_responses_are_resent() {
    init_tracing();
    let content = test_data(3000, 2);
    let (server, root) = serve_file(
        "hs-size",
        "f.bin",
        &content,
        fast_config(),
        Faults::drop_first(FrameKind::SizeResponse, 3),
    )
    .await
    .unwrap();

    let client = LossyTransport::bind(Faults::default()).await.unwrap();
    let (_, received) = fetch(client, server.addr, "f.bin", Vec::new(), fast_config(), None)
        .await
        .unwrap();

    assert!(received == content);
    assert_eq!(server.transport.dropped(), 3);

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn test_lost_ready_is_recovered() {
    init_tracing();
    let content = test_data(8000, 3);
    let (server, root) = serve_file("hs-ready", "f.bin", &content, fast_config(), Faults::default())
        .await
        .unwrap();

    let client = LossyTransport::bind(Faults::drop_first(FrameKind::ReadyToReceive, 2))
        .await
        .unwrap();
    let (_, received) = fetch(client.clone(), server.addr, "f.bin", Vec::new(), fast_config(), None)
        .await
        .unwrap();

    assert!(received == content);
    assert_eq!(client.dropped(), 2);

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn test_sender_gives_up_without_ready() {
    init_tracing();
    let config = SessionConfig {
        transfer_retries: 3,
        ..fast_config()
    };
    let (mut server, root) = serve_file("hs-noready", "f.bin", b"some bytes", config.clone(), Faults::default())
        .await
        .unwrap();

    // Every Ready the receiver ever sends is lost.
    let client = LossyTransport::bind(Faults::drop_first(FrameKind::ReadyToReceive, u32::MAX))
        .await
        .unwrap();
    let err = fetch(client, server.addr, "f.bin", Vec::new(), config, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::TransferTimeout { .. }), "unexpected error: {err}");

    let failed = wait_for_event(&mut server.events, Duration::from_secs(2), |ev| {
        matches!(ev, SessionEvent::Failed { .. })
    })
    .await;
    match failed {
        Some(SessionEvent::Failed { reason, .. }) => assert!(reason.contains("handshake")),
        other => panic!("sender did not fail: {other:?}"),
    }

    let _ = std::fs::remove_dir_all(&root);
}
