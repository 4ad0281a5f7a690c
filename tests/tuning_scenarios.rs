//! End-to-end tuning scenarios against the scripted mock controller.
//!
//! All tests run on paused time, so poll intervals elapse instantly while
//! `tokio::time::Instant` still measures the virtual wall clock.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tunelink::config::{Config, LinkConfig, TuningConfig};
use tunelink::mock::{MockController, PollStep};
use tunelink::protocol::Status;
use tunelink::{LinkError, LinkSession, Quantity, TuningController, TuningOutcome};

async fn open(controller: &MockController) -> LinkSession {
    LinkSession::open_with_transport(controller.spawn(), "mock", &LinkConfig::default())
        .await
        .expect("handshake should succeed")
}

fn tuning_config(poll_budget: u32) -> TuningConfig {
    TuningConfig {
        poll_budget,
        poll_interval: Duration::from_secs(1),
        ..TuningConfig::default()
    }
}

#[tokio::test]
async fn test_handshake_ok_establishes_link() {
    let controller = MockController::new();

    let session = open(&controller).await;

    assert!(session.is_established());
    assert_eq!(controller.count("start_link"), 1);
    let request = &controller.requests()[0];
    assert_eq!(request.correlation_id, 1);
    assert_eq!(request.parameters["ip_address"], "192.168.1.100");
}

#[tokio::test]
async fn test_handshake_fail_closes_transport() {
    let (client, mut device) = tokio::io::duplex(4096);
    device
        .write_all(
            br#"{"message":{"transmission_id":[1],"op":"start_link_reply","parameters":{"status":"fail"}}}"#,
        )
        .await
        .unwrap();
    device.write_all(b"\n").await.unwrap();

    let err = LinkSession::open_with_transport(Box::new(client), "device", &LinkConfig::default())
        .await
        .unwrap_err();

    match &err {
        LinkError::Connect { endpoint, reply, .. } => {
            assert_eq!(endpoint, "device");
            let reply = reply.as_ref().expect("handshake reply kept");
            assert_eq!(reply.status, Status::from("fail"));
        }
        other => panic!("expected connect error, got {other:?}"),
    }

    // The client end is gone: the device reads the request, then EOF.
    let mut received = Vec::new();
    device.read_to_end(&mut received).await.unwrap();
    let request = String::from_utf8(received).unwrap();
    assert!(request.contains("start_link"));
    assert!(request.ends_with('\n'));
}

#[tokio::test(start_paused = true)]
async fn test_converges_on_third_poll() {
    let controller = MockController::new().poll_sequence(vec![
        PollStep::tuning(779.2),
        PollStep::tuning(779.9),
        PollStep::at_target(780.02),
    ]);
    let mut session = open(&controller).await;
    let config = tuning_config(30);

    let outcome = TuningController::new(&mut session, &config)
        .tune(Quantity::nanometers(780.0), &CancellationToken::new())
        .await;

    assert_eq!(outcome, TuningOutcome::Converged(Quantity::nanometers(780.02)));
    assert_eq!(controller.count("set_wave_m"), 1);
    assert_eq!(controller.count("poll_wave_m"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_budget_exhaustion_times_out_with_last_reading() {
    let controller = MockController::new().poll_sequence(vec![PollStep::tuning(779.8)]);
    let mut session = open(&controller).await;
    let config = tuning_config(5);

    let started = Instant::now();
    let outcome = TuningController::new(&mut session, &config)
        .tune(Quantity::nanometers(780.0), &CancellationToken::new())
        .await;
    let elapsed = started.elapsed();

    assert_eq!(outcome, TuningOutcome::TimedOut(Quantity::nanometers(779.8)));
    assert_eq!(controller.count("poll_wave_m"), 5);
    assert!(elapsed >= Duration::from_secs(5), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(6), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_setpoint_skips_polling() {
    let controller = MockController::new().set_wave_status(Status::from("rejected"));
    let mut session = open(&controller).await;
    let config = tuning_config(5);

    let outcome = TuningController::new(&mut session, &config)
        .tune(Quantity::nanometers(780.0), &CancellationToken::new())
        .await;

    assert_eq!(outcome, TuningOutcome::Rejected(Status::Text("rejected".to_string())));
    assert_eq!(controller.count("poll_wave_m"), 0);
    assert!(session.is_established());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_tuning_is_stable() {
    let controller = MockController::new().converge_after(2);
    let mut session = open(&controller).await;
    let config = tuning_config(10);

    for target_nm in [760.0, 800.0, 760.0] {
        let outcome = TuningController::new(&mut session, &config)
            .tune(Quantity::nanometers(target_nm), &CancellationToken::new())
            .await;
        assert_eq!(outcome, TuningOutcome::Converged(Quantity::nanometers(target_nm)));
    }

    assert_eq!(controller.count("set_wave_m"), 3);
    assert_eq!(controller.count("poll_wave_m"), 9);
}

#[tokio::test(start_paused = true)]
async fn test_correlation_ids_increase_across_operations() {
    let controller = MockController::new();
    let mut session = open(&controller).await;
    let config = tuning_config(3);

    let outcome = TuningController::new(&mut session, &config)
        .tune(Quantity::new(0.78, tunelink::LengthUnit::Micrometer), &CancellationToken::new())
        .await;
    assert!(outcome.is_converged());

    let ids: Vec<u64> = controller.requests().iter().map(|r| r.correlation_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!((controller.setpoint_nm() - 780.0).abs() < 1e-9);
    assert_eq!(session.diagnostics().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_alignment_after_tuning_through_config() {
    let config = Config::default();
    let controller = MockController::new();
    let laser = tunelink::TunableLaser::with_transport(controller.spawn(), "mock", &config)
        .await
        .unwrap();

    let status = laser.one_shot(&CancellationToken::new()).await.unwrap();

    assert_eq!(status, tunelink::protocol::AlignmentStatus::Succeeded);
    let alignment = controller
        .requests()
        .into_iter()
        .find(|r| r.operation == "beam_alignment")
        .expect("alignment requested");
    assert_eq!(alignment.parameters["mode"], serde_json::json!([config.tuning.alignment_mode]));
    laser.close().await;
}

#[tokio::test]
async fn test_mismatched_reply_is_never_accepted() {
    let controller = MockController::new().fault_on("poll_wave_m", 1, tunelink::mock::Fault::WrongId);
    let mut session = open(&controller).await;

    let err = session
        .call("poll_wave_m", serde_json::Map::new(), Duration::from_secs(1))
        .await
        .unwrap_err();

    assert!(err.is_protocol_mismatch());
    assert!(session.is_established());
    let last = session.diagnostics().last_reply().expect("mismatched reply recorded");
    assert_eq!(last.correlation_id, 3);
}

#[tokio::test]
async fn test_close_after_failed_open_is_safe() {
    let config = LinkConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        connect_timeout: Duration::from_millis(200),
        ..LinkConfig::default()
    };
    let mut session = LinkSession::new(&config);

    assert!(session.establish().await.unwrap_err().is_connect_error());

    session.close().await;
    session.close().await;
    assert!(!session.is_established());
}
