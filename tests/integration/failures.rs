use crate::*;

use sluice_services::{fetch, Role, SegmentSink, SessionError};

// ── Missing files ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_missing_file_fails_sender_and_times_out_receiver() {
    init_tracing();
    let root = temp_root("missing");
    let mut server = TestServer::start(root.clone(), fast_config(), Faults::default())
        .await
        .unwrap();

    let client = LossyTransport::bind(Faults::default()).await.unwrap();
    let err = fetch(client, server.addr, "nope.bin", Vec::new(), fast_config(), None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, SessionError::HandshakeTimeout { .. }),
        "unexpected error: {err}"
    );

    let failed = wait_for_event(&mut server.events, Duration::from_secs(1), |ev| {
        matches!(ev, SessionEvent::Failed { role: Role::Sender, .. })
    })
    .await;
    match failed {
        Some(SessionEvent::Failed { reason, .. }) => assert!(reason.contains("not found")),
        other => panic!("expected a sender failure, got {other:?}"),
    }

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn test_names_outside_root_are_not_served() {
    init_tracing();
    let parent = temp_root("escape");
    let root = parent.join("served");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(parent.join("secret.txt"), b"do not serve").unwrap();
    let server = TestServer::start(root, fast_config(), Faults::default())
        .await
        .unwrap();

    for name in ["../secret.txt", "/etc/hostname"] {
        let client = LossyTransport::bind(Faults::default()).await.unwrap();
        let err = fetch(client, server.addr, name, Vec::new(), fast_config(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::HandshakeTimeout { .. }), "{name}: {err}");
    }

    let _ = std::fs::remove_dir_all(&parent);
}

#[tokio::test]
async fn test_listener_keeps_serving_after_failed_session() {
    init_tracing();
    let content = test_data(7000, 31);
    let (server, root) = serve_file("resilient", "ok.bin", &content, fast_config(), Faults::default())
        .await
        .unwrap();

    let client = LossyTransport::bind(Faults::default()).await.unwrap();
    assert!(fetch(client, server.addr, "missing.bin", Vec::new(), fast_config(), None)
        .await
        .is_err());

    let client = LossyTransport::bind(Faults::default()).await.unwrap();
    let (_, received) = fetch(client, server.addr, "ok.bin", Vec::new(), fast_config(), None)
        .await
        .unwrap();
    assert!(received == content);

    let _ = std::fs::remove_dir_all(&root);
}

// ── Peers disappearing ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_receiver_times_out_when_sender_vanishes() {
    init_tracing();
    let config = SessionConfig {
        transfer_retries: 4,
        ..fast_config()
    };
    // SizeResponse and a few segments get out, then nothing.
    let (server, root) = serve_file(
        "sender-gone",
        "big.bin",
        &test_data(50_000, 32),
        config.clone(),
        Faults {
            blackhole_after: Some(4),
            ..Faults::default()
        },
    )
    .await
    .unwrap();

    let client = LossyTransport::bind(Faults::default()).await.unwrap();
    let (tx, mut events) = mpsc::unbounded_channel();
    let err = fetch(client, server.addr, "big.bin", Vec::new(), config, Some(tx))
        .await
        .unwrap_err();
    assert!(
        matches!(err, SessionError::TransferTimeout { intervals: 4 }),
        "unexpected error: {err}"
    );

    let exhausted = wait_for_event(&mut events, Duration::from_millis(100), |ev| {
        matches!(ev, SessionEvent::RetryExhausted { .. })
    })
    .await;
    assert!(matches!(
        exhausted,
        Some(SessionEvent::RetryExhausted {
            phase: sluice_services::Phase::Transferring,
            ..
        })
    ));

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn test_sender_times_out_when_receiver_vanishes() {
    init_tracing();
    let config = SessionConfig {
        transfer_retries: 5,
        ..fast_config()
    };
    let (mut server, root) = serve_file("receiver-gone", "big.bin", &test_data(50_000, 33), config.clone(), Faults::default())
        .await
        .unwrap();

    // NameRequest, Ready and three acks, then silence.
    let client = LossyTransport::bind(Faults {
        blackhole_after: Some(5),
        ..Faults::default()
    })
    .await
    .unwrap();
    let receiver = tokio::spawn(fetch(client, server.addr, "big.bin", Vec::new(), config, None));

    let failed = wait_for_event(&mut server.events, Duration::from_secs(3), |ev| {
        matches!(ev, SessionEvent::Failed { .. })
    })
    .await;
    match failed {
        Some(SessionEvent::Failed { reason, role, .. }) => {
            assert_eq!(role, Role::Sender);
            assert!(reason.contains("stalled"), "unexpected reason: {reason}");
        }
        other => panic!("sender did not give up: {other:?}"),
    }
    assert!(server.drained(Duration::from_secs(1)).await);

    receiver.abort();
    let _ = std::fs::remove_dir_all(&root);
}

// ── Sink failures ───────────────────────────────────────────────────────────

/// Accepts `limit` bytes, then fails every write.
#[derive(Debug)]
struct FailAfter {
    written: usize,
    limit: usize,
}

impl SegmentSink for FailAfter {
    async fn write_next(&mut self, data: &[u8]) -> io::Result<()> {
        if self.written + data.len() > self.limit {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.written += data.len();
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_sink_failure_is_fatal_for_receiver() {
    init_tracing();
    let (server, root) = serve_file("sink", "f.bin", &test_data(20_000, 34), fast_config(), Faults::default())
        .await
        .unwrap();

    let client = LossyTransport::bind(Faults::default()).await.unwrap();
    let sink = FailAfter {
        written: 0,
        limit: 5000,
    };
    let err = fetch(client, server.addr, "f.bin", sink, fast_config(), None)
        .await
        .unwrap_err();
    match err {
        SessionError::Io(e) => assert_eq!(e.to_string(), "disk full"),
        other => panic!("expected an I/O failure, got {other}"),
    }

    let _ = std::fs::remove_dir_all(&root);
}

// ── Concurrency ─────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sessions_are_independent() {
    init_tracing();
    let root = temp_root("concurrent");
    let files: Vec<(String, Vec<u8>)> = (0..4)
        .map(|i| (format!("file-{i}.bin"), test_data(20_000 + i * 3000, 40 + i as u64)))
        .collect();
    for (name, content) in &files {
        std::fs::write(root.join(name), content).unwrap();
    }
    let server = TestServer::start(root.clone(), fast_config(), Faults::default())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for (name, content) in files.clone() {
        let addr = server.addr;
        handles.push(tokio::spawn(async move {
            let client = LossyTransport::bind(Faults {
                loss: 0.05,
                ..Faults::random(content.len() as u64)
            })
            .await
            .unwrap();
            let config = SessionConfig {
                handshake_retries: 10,
                ..fast_config()
            };
            let (_, received) = fetch(client, addr, &name, Vec::new(), config, None)
                .await
                .unwrap_or_else(|e| panic!("{name}: {e}"));
            assert!(received == content, "{name}: content mismatch");
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert!(server.drained(Duration::from_secs(2)).await, "sessions left behind");
    let _ = std::fs::remove_dir_all(&root);
}
