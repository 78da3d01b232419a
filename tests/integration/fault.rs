use crate::*;

use sluice_services::fetch;

// ── Random faults in both directions ────────────────────────────────────────

/// Serve `content` with `server_faults`, fetch it with `client_faults`, and
/// check the bytes came through intact.
async fn transfer_through(
    tag: &str,
    content: &[u8],
    server_faults: Faults,
    client_faults: Faults,
) -> sluice_services::TransferReport {
    // Loss can also hit the handshake; give it more room than the default.
    let config = SessionConfig {
        handshake_retries: 10,
        ..fast_config()
    };
    let (server, root) = serve_file(tag, "data.bin", content, config.clone(), server_faults)
        .await
        .unwrap();
    let client = LossyTransport::bind(client_faults).await.unwrap();

    let (report, received) = fetch(client, server.addr, "data.bin", Vec::new(), config, None)
        .await
        .unwrap_or_else(|e| panic!("{tag}: transfer failed: {e}"));
    assert_eq!(received.len(), content.len(), "{tag}: length mismatch");
    assert!(received == content, "{tag}: content mismatch");

    let _ = std::fs::remove_dir_all(&root);
    report
}

#[tokio::test]
async fn test_packet_loss_both_ways() {
    init_tracing();
    let content = test_data(100_000, 21);
    let lossy = |seed| Faults {
        loss: 0.2,
        ..Faults::random(seed)
    };
    transfer_through("loss", &content, lossy(1), lossy(2)).await;
}

#[tokio::test]
async fn test_corruption_is_detected_and_recovered() {
    init_tracing();
    let content = test_data(100_000, 22);
    let corrupting = |seed| Faults {
        corrupt: 0.1,
        ..Faults::random(seed)
    };
    let report = transfer_through("corrupt", &content, corrupting(3), corrupting(4)).await;
    assert!(report.stats.corrupt > 0, "no corrupt segment was ever seen");
}

#[tokio::test]
async fn test_duplicated_datagrams_do_not_duplicate_output() {
    init_tracing();
    let content = test_data(60_000, 23);
    let duplicating = |seed| Faults {
        duplicate: 0.3,
        ..Faults::random(seed)
    };
    let report = transfer_through("dup", &content, duplicating(5), duplicating(6)).await;
    assert!(
        report.stats.duplicates + report.stats.rejected > 0,
        "no duplicate segment was ever seen"
    );
}

#[tokio::test]
async fn test_reordered_datagrams() {
    init_tracing();
    let content = test_data(60_000, 24);
    let reordering = |seed| Faults {
        reorder: 0.4,
        ..Faults::random(seed)
    };
    transfer_through("reorder", &content, reordering(7), reordering(8)).await;
}

#[tokio::test]
async fn test_everything_at_once() {
    init_tracing();
    let content = test_data(80_000, 25);
    let hostile = |seed| Faults {
        loss: 0.1,
        duplicate: 0.1,
        corrupt: 0.05,
        reorder: 0.2,
        ..Faults::random(seed)
    };
    transfer_through("hostile", &content, hostile(9), hostile(10)).await;
}

// ── Scripted faults ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_lost_acks_are_covered_by_retransmission() {
    init_tracing();
    let content = test_data(20_000, 26);
    let report = transfer_through(
        "acks",
        &content,
        Faults::default(),
        Faults::drop_first(FrameKind::DataAck, 10),
    )
    .await;
    // Every dropped ack forces a resend the receiver sees as a repeat.
    assert!(report.stats.duplicates + report.stats.rejected > 0);
}

#[tokio::test]
async fn test_final_acks_lost_sender_still_completes() {
    init_tracing();
    // One segment: its only ack is dropped twice, so the sender relies on
    // the receiver acknowledging retransmissions after it has completed.
    let content = test_data(500, 27);
    let (mut server, root) = serve_file("linger", "one.bin", &content, fast_config(), Faults::default())
        .await
        .unwrap();
    let client = LossyTransport::bind(Faults::drop_first(FrameKind::DataAck, 2))
        .await
        .unwrap();

    let (_, received) = fetch(client, server.addr, "one.bin", Vec::new(), fast_config(), None)
        .await
        .unwrap();
    assert!(received == content);

    let done = wait_for_event(&mut server.events, Duration::from_secs(2), |ev| {
        matches!(ev, SessionEvent::Completed { .. } | SessionEvent::Failed { .. })
    })
    .await;
    assert!(
        matches!(done, Some(SessionEvent::Completed { bytes: 500, .. })),
        "sender did not complete: {done:?}"
    );

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn test_single_retry_budget_covers_one_lost_segment() {
    init_tracing();
    // A single segment, lost once: no ack can reset the stall count, so
    // the one allowed resend round has to carry it.
    let config = SessionConfig {
        transfer_retries: 1,
        ..fast_config()
    };
    let content = test_data(500, 28);
    let (mut server, root) = serve_file(
        "one-retry",
        "r.bin",
        &content,
        config.clone(),
        Faults::drop_first(FrameKind::DataSegment, 1),
    )
    .await
    .unwrap();

    let client = LossyTransport::bind(Faults::default()).await.unwrap();
    let (_, received) = fetch(client, server.addr, "r.bin", Vec::new(), config, None)
        .await
        .unwrap();
    assert!(received == content);
    assert_eq!(server.transport.dropped(), 1);

    let done = wait_for_event(&mut server.events, Duration::from_secs(2), |ev| {
        matches!(ev, SessionEvent::Completed { .. } | SessionEvent::Failed { .. })
    })
    .await;
    assert!(
        matches!(done, Some(SessionEvent::Completed { bytes: 500, .. })),
        "sender did not complete: {done:?}"
    );

    let _ = std::fs::remove_dir_all(&root);
}
