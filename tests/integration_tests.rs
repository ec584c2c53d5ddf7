
use enhance_client::transport::METRICS_HEADER;
use enhance_client::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use test_helpers::*;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nenhanced";

fn two_images() -> Vec<InputImage> {
    vec![image("fileA.jpg"), image("fileB.png")]
}

// ── Pairing ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_outputs_pair_with_inputs_by_position() {
    let transport = ScriptedTransport::new(Reply::entries(&[
        ("out-0", "enhanced-0"),
        ("out-1", "enhanced-1"),
        ("out-2", "enhanced-2"),
    ]));
    let orch = orchestrator(transport.clone(), EnhanceConfig::default());
    orch.select(vec![image("a.jpg"), image("b.jpg"), image("c.jpg")])
        .unwrap();

    let outcome = orch.enhance().await;
    assert!(matches!(
        outcome,
        EnhanceOutcome::Succeeded {
            outputs: 3,
            unpaired: 0,
            ..
        }
    ));

    let outputs = orch.outputs();
    assert_eq!(outputs.len(), 3);
    for (i, output) in outputs.iter().enumerate() {
        assert_eq!(output.index, i);
        assert_eq!(output.content.as_ref(), format!("enhanced-{}", i).as_bytes());
    }
    assert_eq!(orch.snapshot().metrics, Some(fixed_metrics()));
    assert_eq!(transport.seen(), vec![vec!["a.jpg", "b.jpg", "c.jpg"]]);
}

#[tokio::test]
async fn test_entry_names_never_drive_pairing() {
    // The archive lists B's result first. Position wins over names.
    let transport = ScriptedTransport::new(Reply::entries(&[
        ("fileB-enhanced.png", "enc_b"),
        ("fileA-enhanced.jpg", "enc_a"),
    ]));
    let orch = orchestrator(transport, EnhanceConfig::default());
    orch.select(two_images()).unwrap();
    orch.enhance().await;

    let pairs = orch.pairs();
    assert_eq!(pairs[0].0.name(), "fileA.jpg");
    assert_eq!(pairs[0].1.as_ref().unwrap().content.as_ref(), b"enc_b");
    assert_eq!(pairs[0].1.as_ref().unwrap().entry_name, "fileB-enhanced.png");
    assert_eq!(pairs[1].0.name(), "fileB.png");
    assert_eq!(pairs[1].1.as_ref().unwrap().content.as_ref(), b"enc_a");
}

#[tokio::test]
async fn test_short_archive_is_lenient_by_default() {
    let transport = ScriptedTransport::new(Reply::entries(&[("only", "enc_a")]));
    let orch = orchestrator(transport, EnhanceConfig::default());
    orch.select(two_images()).unwrap();

    let outcome = orch.enhance().await;
    assert!(matches!(
        outcome,
        EnhanceOutcome::Succeeded {
            outputs: 1,
            unpaired: 1,
            ..
        }
    ));

    let pairs = orch.pairs();
    assert!(pairs[0].1.is_some());
    assert!(pairs[1].1.is_none());
    assert_eq!(orch.snapshot().unpaired, 1);
}

#[tokio::test]
async fn test_short_archive_fails_when_strict() {
    let transport = ScriptedTransport::new(Reply::entries(&[("only", "enc_a")]));
    let config = EnhanceConfig::builder()
        .with_pairing(PairingPolicy::Strict)
        .build();
    let orch = orchestrator(transport, config);
    orch.select(two_images()).unwrap();

    let outcome = orch.enhance().await;
    assert!(matches!(
        outcome,
        EnhanceOutcome::Failed {
            kind: FailureKind::PairingShortfall,
            ..
        }
    ));
    assert!(orch.outputs().is_empty());
    assert_eq!(orch.inputs().len(), 2);
}

#[tokio::test]
async fn test_oversized_archive_fails() {
    let transport = ScriptedTransport::new(Reply::entries(&[
        ("a", "1"),
        ("b", "2"),
        ("c", "3"),
    ]));
    let orch = orchestrator(transport, EnhanceConfig::default());
    orch.select(two_images()).unwrap();

    let outcome = orch.enhance().await;
    assert!(matches!(
        outcome,
        EnhanceOutcome::Failed {
            kind: FailureKind::PairingOverflow,
            ..
        }
    ));
    assert_eq!(orch.phase(), Phase::Failed);
    assert!(orch.outputs().is_empty());
}

// ── Selection and rejection ─────────────────────────────────────────

#[tokio::test]
async fn test_enhance_without_selection_sends_nothing() {
    let transport = ScriptedTransport::new(Reply::entries(&[("a", "1")]));
    let orch = orchestrator(transport.clone(), EnhanceConfig::default());

    let outcome = orch.enhance().await;
    assert_eq!(outcome, EnhanceOutcome::Rejected(Rejection::NoInput));
    assert_eq!(transport.calls(), 0);
    assert_eq!(orch.phase(), Phase::Idle);
}

#[tokio::test]
async fn test_empty_selection_is_rejected() {
    let transport = ScriptedTransport::new(Reply::entries(&[("a", "1")]));
    let orch = orchestrator(transport.clone(), EnhanceConfig::default());
    orch.select(vec![image("keep.jpg")]).unwrap();

    let err = orch.select(Vec::new()).unwrap_err();
    assert!(matches!(err, EnhanceError::NoInput));
    assert_eq!(orch.phase(), Phase::Ready);
    assert_eq!(orch.inputs()[0].name(), "keep.jpg");
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_non_image_selection_is_rejected() {
    let transport = ScriptedTransport::new(Reply::entries(&[("a", "1")]));
    let orch = orchestrator(transport, EnhanceConfig::default());

    let err = orch
        .select(vec![
            image("a.jpg"),
            InputImage::new("notes.txt", "text/plain", &b"hello"[..]),
        ])
        .unwrap_err();
    assert!(matches!(
        err,
        EnhanceError::InvalidMediaType { ref name, .. } if name == "notes.txt"
    ));
    assert_eq!(orch.phase(), Phase::Idle);
}

#[tokio::test]
async fn test_selection_assigns_positions() {
    let transport = ScriptedTransport::new(Reply::entries(&[("a", "1")]));
    let orch = orchestrator(transport, EnhanceConfig::default());
    orch.select(vec![image("x.jpg"), image("y.jpg"), image("z.jpg")])
        .unwrap();

    let indices: Vec<usize> = orch.inputs().iter().map(|i| i.index()).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(orch.phase(), Phase::Ready);
    assert_eq!(orch.progress(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_second_enhance_while_enhancing_is_noop() {
    let transport = ScriptedTransport::gated(Reply::entries(&[("a", "1"), ("b", "2")]));
    let orch = orchestrator(transport.clone(), EnhanceConfig::default());
    orch.select(two_images()).unwrap();

    let first = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.enhance().await }
    });
    wait_for_phase(&orch, Phase::Enhancing).await;

    let second = orch.enhance().await;
    assert_eq!(second, EnhanceOutcome::Rejected(Rejection::AlreadyEnhancing));
    assert_eq!(orch.phase(), Phase::Enhancing);

    transport.release();
    let outcome = first.await.unwrap();
    assert!(matches!(outcome, EnhanceOutcome::Succeeded { outputs: 2, .. }));
    assert_eq!(transport.calls(), 1);
}

// ── Progress ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_progress_stays_below_100_then_completes() {
    let transport = ScriptedTransport::delayed(
        Reply::entries(&[("a", "1"), ("b", "2")]),
        Duration::from_secs(3),
    );
    let orch = orchestrator(transport, EnhanceConfig::default());
    let mut rx = orch.subscribe();
    orch.select(two_images()).unwrap();

    let outcome = orch.enhance().await;
    assert!(matches!(outcome, EnhanceOutcome::Succeeded { .. }));

    let events = drain(&mut rx);
    let values = progress_values(&events);
    let (last, estimates) = values.split_last().unwrap();
    assert_eq!(*last, 100.0);
    assert!(!estimates.is_empty());
    assert!(estimates.iter().all(|v| *v > 0.0 && *v <= 90.0));
    assert!(estimates.windows(2).all(|w| w[0] <= w[1]));

    // Final progress event lands right before the terminal event.
    let n = events.len();
    assert!(matches!(events[n - 2], BatchEvent::Progress { percent, .. } if percent == 100.0));
    assert!(matches!(events[n - 1], BatchEvent::Succeeded { outputs: 2, .. }));
    assert!(matches!(events[0], BatchEvent::Selected { inputs: 2, .. }));
    assert!(matches!(events[1], BatchEvent::Started { attempt: 1, .. }));

    assert_eq!(orch.progress(), 100.0);
}

#[tokio::test(start_paused = true)]
async fn test_progress_observed_while_enhancing() {
    let transport = ScriptedTransport::gated(Reply::entries(&[("a", "1")]));
    let orch = orchestrator(transport.clone(), EnhanceConfig::default());
    orch.select(vec![image("a.jpg")]).unwrap();

    let task = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.enhance().await }
    });
    wait_for_phase(&orch, Phase::Enhancing).await;

    let mut last = 0.0;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let now = orch.progress();
        assert!(now >= last);
        assert!(now < 100.0);
        last = now;
    }
    assert!(last > 0.0);

    transport.release();
    task.await.unwrap();
    assert_eq!(orch.progress(), 100.0);
}

// ── Failure ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_transport_error_fails_batch() {
    let transport = ScriptedTransport::new(Reply::Status(502));
    let orch = orchestrator(transport, EnhanceConfig::default());
    let mut rx = orch.subscribe();
    orch.select(two_images()).unwrap();

    let outcome = orch.enhance().await;
    assert!(matches!(
        outcome,
        EnhanceOutcome::Failed {
            kind: FailureKind::Transport,
            ref notice,
            ..
        } if notice == FAILURE_NOTICE
    ));

    let snapshot = orch.snapshot();
    assert_eq!(snapshot.phase, Phase::Failed);
    assert_eq!(snapshot.outputs, 0);
    assert_eq!(snapshot.metrics, None);
    assert_eq!(snapshot.notice.as_deref(), Some(FAILURE_NOTICE));
    assert_eq!(snapshot.failure, Some(FailureKind::Transport));

    let names: Vec<String> = orch.inputs().iter().map(|i| i.name().to_string()).collect();
    assert_eq!(names, vec!["fileA.jpg", "fileB.png"]);

    let events = drain(&mut rx);
    assert!(matches!(
        events.last(),
        Some(BatchEvent::Failed {
            kind: FailureKind::Transport,
            ..
        })
    ));
}

#[tokio::test]
async fn test_undecodable_archive_fails_batch() {
    let transport = ScriptedTransport::new(Reply::Raw(b"<html>gateway error</html>".to_vec()));
    let orch = orchestrator(transport, EnhanceConfig::default());
    orch.select(two_images()).unwrap();

    let outcome = orch.enhance().await;
    assert!(matches!(
        outcome,
        EnhanceOutcome::Failed {
            kind: FailureKind::Decode,
            ..
        }
    ));
    assert!(orch.outputs().is_empty());
    assert_eq!(orch.inputs().len(), 2);
    assert!(matches!(orch.download(0), Err(EnhanceError::NoResults)));
}

async fn assert_decode_failure(body: Vec<u8>) {
    let transport = ScriptedTransport::new(Reply::Raw(body));
    let orch = orchestrator(transport, EnhanceConfig::default());
    let mut rx = orch.subscribe();
    orch.select(vec![image("a.jpg")]).unwrap();

    let outcome = orch.enhance().await;
    assert!(matches!(
        outcome,
        EnhanceOutcome::Failed {
            kind: FailureKind::Decode,
            ..
        }
    ));
    assert_eq!(orch.phase(), Phase::Failed);
    assert!(orch.outputs().is_empty());
    assert_eq!(orch.inputs()[0].name(), "a.jpg");
    assert!(matches!(
        drain(&mut rx).last(),
        Some(BatchEvent::Failed {
            kind: FailureKind::Decode,
            ..
        })
    ));
}

#[tokio::test]
async fn test_archive_with_huge_declared_size_fails_batch() {
    assert_decode_failure(single_entry_zip(1 << 60, CRC_X)).await;
}

#[tokio::test]
async fn test_archive_with_bad_checksum_fails_batch() {
    assert_decode_failure(single_entry_zip(1, !CRC_X)).await;
}

#[tokio::test]
async fn test_well_formed_single_entry_archive_succeeds() {
    let transport = ScriptedTransport::new(Reply::Raw(single_entry_zip(1, CRC_X)));
    let orch = orchestrator(transport, EnhanceConfig::default());
    orch.select(vec![image("a.jpg")]).unwrap();

    assert!(matches!(
        orch.enhance().await,
        EnhanceOutcome::Succeeded { outputs: 1, .. }
    ));
    assert_eq!(orch.outputs()[0].content.as_ref(), b"x");
}

#[tokio::test]
async fn test_decoder_panic_fails_batch() {
    let transport = ScriptedTransport::new(Reply::entries(&[("a", "1")]));
    let orch = BatchOrchestrator::new(transport, EnhanceConfig::default())
        .with_codec(PanickingCodec);
    orch.select(vec![image("a.jpg")]).unwrap();

    let outcome = orch.enhance().await;
    assert!(matches!(
        outcome,
        EnhanceOutcome::Failed {
            kind: FailureKind::Decode,
            ..
        }
    ));
    assert_eq!(orch.inputs().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_service_times_out() {
    let transport = ScriptedTransport::delayed(
        Reply::entries(&[("a", "1")]),
        Duration::from_secs(10),
    );
    let config = EnhanceConfig::builder()
        .with_timeout(Duration::from_secs(1))
        .build();
    let orch = orchestrator(transport, config);
    orch.select(vec![image("a.jpg")]).unwrap();

    let outcome = orch.enhance().await;
    assert!(matches!(
        outcome,
        EnhanceOutcome::Failed {
            kind: FailureKind::Timeout,
            ..
        }
    ));
    assert_eq!(orch.phase(), Phase::Failed);
}

#[tokio::test]
async fn test_retry_after_failure() {
    let transport = ScriptedTransport::sequence(vec![
        Reply::Status(500),
        Reply::entries(&[("a", "1"), ("b", "2")]),
    ]);
    let orch = orchestrator(transport.clone(), EnhanceConfig::default());
    let mut rx = orch.subscribe();
    let batch_id = orch.select(two_images()).unwrap();

    assert!(matches!(orch.enhance().await, EnhanceOutcome::Failed { .. }));
    assert!(matches!(
        orch.enhance().await,
        EnhanceOutcome::Succeeded { batch_id: id, outputs: 2, .. } if id == batch_id
    ));
    assert_eq!(transport.calls(), 2);
    assert_eq!(orch.snapshot().notice, None);

    let attempts: Vec<u32> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            BatchEvent::Started { attempt, .. } => Some(attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2]);
}

#[tokio::test]
async fn test_failed_rerun_discards_earlier_results() {
    let transport = ScriptedTransport::sequence(vec![
        Reply::entries(&[("a", "1")]),
        Reply::Status(500),
    ]);
    let orch = orchestrator(transport, EnhanceConfig::default());
    orch.select(vec![image("a.jpg")]).unwrap();

    orch.enhance().await;
    let handle = orch.output_handle(0).unwrap();
    assert_eq!(orch.read_output(&handle).unwrap().as_ref(), b"1");

    orch.enhance().await;
    assert_eq!(orch.phase(), Phase::Failed);
    assert!(orch.outputs().is_empty());
    assert!(orch.snapshot().metrics.is_none());
    assert!(matches!(
        orch.read_output(&handle),
        Err(EnhanceError::StaleHandle)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_enhance_marks_batch_abandoned() {
    let transport = ScriptedTransport::gated(Reply::entries(&[("a", "1")]));
    let orch = orchestrator(transport, EnhanceConfig::default());
    let mut rx = orch.subscribe();
    orch.select(vec![image("a.jpg")]).unwrap();

    let result = tokio::time::timeout(Duration::from_millis(500), orch.enhance()).await;
    assert!(result.is_err());

    let snapshot = orch.snapshot();
    assert_eq!(snapshot.phase, Phase::Failed);
    assert_eq!(snapshot.failure, Some(FailureKind::Abandoned));
    assert_eq!(snapshot.inputs.len(), 1);

    let events = drain(&mut rx);
    assert!(matches!(
        events.last(),
        Some(BatchEvent::Failed {
            kind: FailureKind::Abandoned,
            ..
        })
    ));

    // No estimator left behind.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(drain(&mut rx).is_empty());
}

// ── Reset and stale results ─────────────────────────────────────────

#[tokio::test]
async fn test_reset_clears_every_phase() {
    let transport = ScriptedTransport::sequence(vec![
        Reply::entries(&[("a", "1"), ("b", "2")]),
        Reply::Status(500),
    ]);
    let orch = orchestrator(transport, EnhanceConfig::default());

    // Idle
    orch.reset();
    assert_eq!(orch.phase(), Phase::Idle);

    // Ready
    orch.select(two_images()).unwrap();
    orch.reset();
    assert_eq!(orch.phase(), Phase::Idle);
    assert!(orch.inputs().is_empty());

    // Succeeded
    orch.select(two_images()).unwrap();
    orch.enhance().await;
    let handle = orch.output_handle(1).unwrap();
    orch.reset();

    let snapshot = orch.snapshot();
    assert_eq!(snapshot.phase, Phase::Idle);
    assert_eq!(snapshot.batch_id, None);
    assert!(snapshot.inputs.is_empty());
    assert_eq!(snapshot.outputs, 0);
    assert_eq!(snapshot.metrics, None);
    assert_eq!(snapshot.progress, 0.0);
    assert!(matches!(
        orch.read_output(&handle),
        Err(EnhanceError::StaleHandle)
    ));

    // Failed
    orch.select(two_images()).unwrap();
    orch.enhance().await;
    assert_eq!(orch.phase(), Phase::Failed);
    orch.reset();
    assert_eq!(orch.phase(), Phase::Idle);
    assert_eq!(orch.snapshot().notice, None);
}

#[tokio::test(start_paused = true)]
async fn test_reset_while_enhancing_cancels_request() {
    let transport = ScriptedTransport::gated(Reply::entries(&[("a", "1")]));
    let orch = orchestrator(transport.clone(), EnhanceConfig::default());
    let mut rx = orch.subscribe();
    let batch_id = orch.select(vec![image("a.jpg")]).unwrap();

    let task = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.enhance().await }
    });
    wait_for_phase(&orch, Phase::Enhancing).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    orch.reset();
    let outcome = task.await.unwrap();
    assert_eq!(outcome, EnhanceOutcome::Superseded { batch_id });

    let before = drain(&mut rx);
    assert!(!progress_values(&before).is_empty());
    assert!(matches!(before.last(), Some(BatchEvent::Reset { batch_id: Some(id) }) if *id == batch_id));

    // The estimator is gone and a late response has nowhere to land.
    transport.release();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(drain(&mut rx).is_empty());
    assert_eq!(orch.phase(), Phase::Idle);
    assert_eq!(orch.progress(), 0.0);
    assert!(orch.outputs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_selection_during_enhance_discards_late_result() {
    let transport = ScriptedTransport::gated(Reply::entries(&[("a", "stale")]));
    let orch = orchestrator(transport.clone(), EnhanceConfig::default());
    let mut rx = orch.subscribe();
    let old = orch.select(vec![image("old.jpg")]).unwrap();

    let task = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.enhance().await }
    });
    wait_for_phase(&orch, Phase::Enhancing).await;

    let new = orch.select(vec![image("new.jpg")]).unwrap();
    assert_ne!(old, new);
    drain(&mut rx);

    transport.release();
    let outcome = task.await.unwrap();
    assert_eq!(outcome, EnhanceOutcome::Superseded { batch_id: old });

    let snapshot = orch.snapshot();
    assert_eq!(snapshot.batch_id, Some(new));
    assert_eq!(snapshot.phase, Phase::Ready);
    assert_eq!(snapshot.outputs, 0);
    assert_eq!(snapshot.progress, 0.0);
    assert_eq!(snapshot.inputs[0].name, "new.jpg");

    // Nothing about the old batch reached subscribers after the switch.
    assert!(drain(&mut rx)
        .iter()
        .all(|e| e.batch_id() != Some(old)));
}

// ── Metrics ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_placeholder_metrics_within_ranges() {
    let transport = ScriptedTransport::new(Reply::entries(&[("a", "1")]));
    let orch = BatchOrchestrator::new(transport, EnhanceConfig::default());
    orch.select(vec![image("a.jpg")]).unwrap();
    orch.enhance().await;

    let metrics = orch.snapshot().metrics.unwrap();
    assert!((25.0..=35.0).contains(&metrics.psnr));
    assert!((0.8..=1.0).contains(&metrics.ssim));
    assert!((0.7..=1.0).contains(&metrics.confidence));
    assert!((1.0..=3.0).contains(&metrics.processing_time));
}

#[tokio::test]
async fn test_metrics_source_sees_completion_report() {
    let transport = ScriptedTransport::new(Reply::entries(&[("a", "1")]));
    let orch = BatchOrchestrator::new(transport, EnhanceConfig::default()).with_metrics(
        |report: &CompletionReport| Metrics {
            psnr: report.inputs as f64,
            ssim: report.outputs as f64,
            confidence: 1.0,
            processing_time: 0.0,
        },
    );
    orch.select(two_images()).unwrap();
    orch.enhance().await;

    let metrics = orch.snapshot().metrics.unwrap();
    assert_eq!(metrics.psnr, 2.0);
    assert_eq!(metrics.ssim, 1.0);
}

// ── HTTP ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_http_error_status_fails_batch() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/enhance-image/")
        .with_status(500)
        .with_body("model crashed")
        .create_async()
        .await;

    let config = EnhanceConfig::builder().with_endpoint(server.url()).build();
    let orch = BatchOrchestrator::new(HttpTransport::new(&config).unwrap(), config);
    orch.select(vec![image("fileA.jpg")]).unwrap();

    let outcome = orch.enhance().await;
    mock.assert_async().await;

    assert!(matches!(
        outcome,
        EnhanceOutcome::Failed {
            kind: FailureKind::Transport,
            ..
        }
    ));
    assert_eq!(orch.phase(), Phase::Failed);
    assert_eq!(orch.inputs()[0].name(), "fileA.jpg");
    assert!(orch.outputs().is_empty());
}

#[tokio::test]
async fn test_http_round_trip_with_reported_metrics() {
    let archive = ZipCodec
        .encode(&[
            ArchiveEntry::new("fileA-enhanced.png", PNG),
            ArchiveEntry::new("fileB-enhanced.png", PNG),
        ])
        .unwrap();

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/enhance-image/")
        .match_header(
            "content-type",
            mockito::Matcher::Regex("multipart/form-data; boundary=.*".into()),
        )
        .with_status(200)
        .with_header("content-type", "application/zip")
        .with_header(
            METRICS_HEADER,
            r#"{"psnr":33.1,"ssim":0.95,"confidence":0.9,"processingTime":1.2}"#,
        )
        .with_body(archive.to_vec())
        .create_async()
        .await;

    let config = EnhanceConfig::builder().with_endpoint(server.url()).build();
    let orch = BatchOrchestrator::new(HttpTransport::new(&config).unwrap(), config)
        .with_metrics(<ReportedMetrics>::default());
    orch.select(two_images()).unwrap();

    let outcome = orch.enhance().await;
    mock.assert_async().await;
    assert!(matches!(outcome, EnhanceOutcome::Succeeded { outputs: 2, .. }));

    let metrics = orch.snapshot().metrics.unwrap();
    assert_eq!(metrics.psnr, 33.1);
    assert_eq!(metrics.processing_time, 1.2);

    let download = orch.download(0).unwrap();
    assert_eq!(download.file_name, "enhanced-1-fileA.png");
    assert_eq!(download.media_type, "image/png");
}

// ── Files and downloads ─────────────────────────────────────────────

#[tokio::test]
async fn test_echo_service_end_to_end_from_disk() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.png");
    let b = dir.path().join("b.jpg");
    std::fs::write(&a, PNG).unwrap();
    std::fs::write(&b, [0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3]).unwrap();

    let inputs = vec![
        InputImage::from_path(&a).await.unwrap(),
        InputImage::from_path(&b).await.unwrap(),
    ];
    assert_eq!(inputs[0].media_type(), "image/png");
    assert_eq!(inputs[1].media_type(), "image/jpeg");

    let orch = BatchOrchestrator::new(
        EchoTransport::new(Duration::ZERO),
        EnhanceConfig::default(),
    );
    orch.select(inputs).unwrap();
    assert!(matches!(
        orch.enhance().await,
        EnhanceOutcome::Succeeded { outputs: 2, .. }
    ));

    let first = orch.download(0).unwrap();
    assert_eq!(first.file_name, "enhanced-1-a.png");
    assert_eq!(first.bytes.as_ref(), PNG);
    let second = orch.download(1).unwrap();
    assert_eq!(second.file_name, "enhanced-2-b.jpg");
    assert_eq!(second.media_type, "image/jpeg");

    let bundle = orch.download_all().unwrap();
    assert_eq!(bundle.file_name, "enhanced-images.zip");
    assert_eq!(bundle.media_type, "application/zip");

    let out = dir.path().join(&bundle.file_name);
    std::fs::write(&out, &bundle.bytes).unwrap();
    let entries = ZipCodec.decode(&std::fs::read(&out).unwrap()).unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["enhanced-1-a.png", "enhanced-2-b.jpg"]);
}

#[tokio::test]
async fn test_missing_file_is_io_error() {
    let dir = tempdir().unwrap();
    let err = InputImage::from_path(dir.path().join("nope.png"))
        .await
        .unwrap_err();
    assert!(matches!(err, EnhanceError::Io(_)));
}

#[tokio::test]
async fn test_download_out_of_range() {
    let transport = ScriptedTransport::new(Reply::entries(&[("a", "1")]));
    let orch = orchestrator(transport, EnhanceConfig::default());
    orch.select(two_images()).unwrap();
    orch.enhance().await;

    assert!(matches!(
        orch.download(1),
        Err(EnhanceError::OutputNotFound(1))
    ));
    assert!(orch.output_handle(1).is_none());
}
