//! End-to-end session behavior over the synthetic backend with an
//! in-memory negotiator.

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use common::{depth, eventually, offer, Handshake, Harness};
use realsense_monitor::capture::CaptureState;
use realsense_monitor::device::{
    OptionValue, Resolution, StreamConfig, StreamFormat, StreamRequest, StreamType,
};
use realsense_monitor::webrtc::{
    CleanupLoop, ConnectionState, IceCandidate, PeerSettings, PeerState, SignalingMessage,
};
use realsense_monitor::AppError;

fn settings(handshake_ms: u64, stale_ms: u64) -> PeerSettings {
    PeerSettings {
        handshake_timeout: Duration::from_millis(handshake_ms),
        stale_timeout: Duration::from_millis(stale_ms),
        max_sessions: 16,
    }
}

fn cleanup(h: &Harness) -> CleanupLoop {
    CleanupLoop::new(
        h.peers.clone(),
        h.capture.clone(),
        h.events.clone(),
        Duration::from_millis(20),
    )
}

#[tokio::test]
async fn test_two_viewers_share_one_capture_session() {
    let h = Harness::default().await;

    h.peers.on_offer("V1", offer(depth(30))).await.unwrap();
    let capture = h.capture.session("D1").unwrap();
    assert_eq!(capture.state(), CaptureState::Active);
    assert_eq!(h.peers.get_session("V1").unwrap().state(), PeerState::Connected);
    assert!(h.is_streaming("D1"));

    h.peers.on_offer("V2", offer(depth(30))).await.unwrap();
    let joined = h.capture.session("D1").unwrap();
    assert!(Arc::ptr_eq(&capture, &joined));
    assert_eq!(capture.subscriber_count(), 2);
    assert_eq!(h.backend.start_count(), 1);

    h.peers.on_disconnect("V1").await;
    assert_eq!(capture.subscriber_count(), 1);
    assert_eq!(capture.state(), CaptureState::Active);
    assert!(h.is_streaming("D1"));

    h.peers.on_disconnect("V2").await;
    assert_eq!(capture.subscriber_count(), 0);
    assert_eq!(capture.state(), CaptureState::Idle);
    assert!(!h.is_streaming("D1"));
    assert!(h.capture.session("D1").is_none());
    assert!(!h.backend.is_claimed("D1"));
}

#[tokio::test]
async fn test_concurrent_starts_open_one_pipeline() {
    let h = Harness::default().await;
    h.backend.set_start_delay(Some(Duration::from_millis(100)));

    let request = depth(30);
    let (a, b) = tokio::join!(
        h.capture.ensure_session("D1", &request, Some("A")),
        h.capture.ensure_session("D1", &request, Some("B")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(h.backend.start_count(), 1);
    assert_eq!(a.subscriber_count(), 2);
}

#[tokio::test]
async fn test_concurrent_offers_compatible_and_conflicting() {
    let h = Harness::default().await;
    h.backend.set_start_delay(Some(Duration::from_millis(50)));

    let (v1, v2) = tokio::join!(
        h.peers.on_offer("V1", offer(depth(30))),
        h.peers.on_offer("V2", offer(depth(30))),
    );
    v1.unwrap();
    v2.unwrap();
    assert_eq!(h.capture.session("D1").unwrap().subscriber_count(), 2);
    h.peers.close_all().await;
    assert!(h.capture.session("D1").is_none());

    let (v3, v4) = tokio::join!(
        h.peers.on_offer("V3", offer(depth(30))),
        h.peers.on_offer("V4", offer(depth(15))),
    );
    let conflicts = [&v3, &v4]
        .iter()
        .filter(|r| matches!(r, Err(AppError::SessionConflict(_))))
        .count();
    assert_eq!(conflicts, 1);
    assert_eq!(h.peers.session_count(), 1);
    assert_eq!(h.capture.session("D1").unwrap().subscriber_count(), 1);
}

#[tokio::test]
async fn test_unsupported_offer_creates_nothing() {
    let h = Harness::default().await;
    let mut request = depth(30);
    request.configs[0].resolution = Resolution::new(123, 45);

    let err = h.peers.on_offer("V1", offer(request)).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidConfig(_)));
    assert!(h.peers.get_session("V1").is_none());
    assert!(h.capture.session("D1").is_none());
    assert_eq!(h.negotiator.created(), 0);
    assert!(!h.is_streaming("D1"));
}

#[tokio::test]
async fn test_offer_for_unknown_device() {
    let h = Harness::default().await;
    let mut o = offer(depth(30));
    o.device_id = "nope".to_string();

    let err = h.peers.on_offer("V1", o).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(h.peers.session_count(), 0);
}

#[tokio::test]
async fn test_option_validation_leaves_value_untouched() {
    let h = Harness::default().await;

    for bad in [9999.0, 45.0] {
        let err = h
            .registry
            .set_option("D1", "S1", "laser_power", OptionValue::Numeric(bad))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::OutOfRange(_)), "{} accepted", bad);
    }
    let option = h.registry.get_option("D1", "S1", "laser_power").await.unwrap();
    assert_eq!(option.current_value, OptionValue::Numeric(150.0));

    let err = h
        .registry
        .set_option("D1", "S1", "asic_temperature", OptionValue::Numeric(20.0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ReadOnly(_)));

    let option = h
        .registry
        .set_option("D1", "S1", "laser_power", OptionValue::Numeric(240.0))
        .await
        .unwrap();
    assert_eq!(option.current_value, OptionValue::Numeric(240.0));
}

#[tokio::test]
async fn test_frames_reach_the_transport() {
    let h = Harness::default().await;
    h.peers.on_offer("V1", offer(depth(30))).await.unwrap();
    let transport = h.negotiator.transport("V1").unwrap();

    assert!(eventually(|| transport.frames_received() > 2).await);

    h.peers.on_disconnect("V1").await;
    assert_eq!(transport.close_count(), 1);
    assert!(!h.capture.distributor().is_subscribed("V1"));
}

#[tokio::test]
async fn test_local_candidates_are_trickled() {
    let h = Harness::default().await;
    h.peers.on_offer("V1", offer(depth(30))).await.unwrap();

    let signaling = h.signaling.clone();
    assert!(eventually(|| signaling.kinds_sent_to("V1").contains(&"candidate")).await);
    assert!(h.signaling.kinds_sent_to("V1").contains(&"state"));
}

#[tokio::test]
async fn test_remote_candidates_reach_the_transport() {
    let h = Harness::default().await;
    h.peers.on_offer("V1", offer(depth(30))).await.unwrap();

    h.peers
        .on_ice_candidate("V1", IceCandidate::new("candidate:2 1 udp 2 10.0.0.2 5000 typ host"))
        .await
        .unwrap();
    let transport = h.negotiator.transport("V1").unwrap();
    assert_eq!(transport.remote_candidates().len(), 1);

    let err = h
        .peers
        .on_ice_candidate("ghost", IceCandidate::new("candidate:3"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_stale_session_is_evicted() {
    let h = Harness::new(Handshake::NeverConnect, settings(5000, 50)).await;
    h.peers.on_offer("V1", offer(depth(30))).await.unwrap();
    let capture = h.capture.session("D1").unwrap();

    let cleanup = cleanup(&h);
    assert!(cleanup.run_once().await.is_empty());

    tokio::time::sleep(Duration::from_millis(80)).await;
    let report = cleanup.run_once().await;
    assert_eq!(report.evicted, vec!["V1".to_string()]);
    assert_eq!(report.errors, 0);
    assert!(h.peers.get_session("V1").is_none());
    assert_eq!(capture.state(), CaptureState::Idle);
    assert!(!h.is_streaming("D1"));
}

#[tokio::test]
async fn test_keepalive_defers_eviction() {
    let h = Harness::new(Handshake::NeverConnect, settings(5000, 150)).await;
    h.peers.on_offer("V1", offer(depth(30))).await.unwrap();
    let cleanup = cleanup(&h);

    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_ok!(h.peers.keepalive("V1"));
        assert!(cleanup.run_once().await.evicted.is_empty());
    }
    assert_eq!(h.peers.get_session("V1").unwrap().state(), PeerState::Negotiating);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(cleanup.run_once().await.evicted, vec!["V1".to_string()]);
}

#[tokio::test]
async fn test_connected_viewer_outlives_stale_timeout() {
    let h = Harness::new(Handshake::ConnectImmediately, settings(1000, 100)).await;
    h.peers.on_offer("V1", offer(depth(30))).await.unwrap();
    let transport = h.negotiator.transport("V1").unwrap();
    let cleanup = cleanup(&h);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(cleanup.run_once().await.is_empty());
    assert_eq!(h.peers.get_session("V1").unwrap().state(), PeerState::Connected);
    assert!(transport.frames_received() > 0);
    assert!(h.is_streaming("D1"));

    transport.set_state(ConnectionState::Disconnected);
    let report = cleanup.run_once().await;
    assert_eq!(report.evicted, vec!["V1".to_string()]);
    assert!(h.capture.session("D1").is_none());
}

#[tokio::test]
async fn test_dead_transport_is_evicted() {
    let h = Harness::default().await;
    h.peers.on_offer("V1", offer(depth(30))).await.unwrap();
    h.negotiator
        .transport("V1")
        .unwrap()
        .set_state(ConnectionState::Failed);

    let report = cleanup(&h).run_once().await;
    assert_eq!(report.evicted, vec!["V1".to_string()]);
    assert!(h.capture.session("D1").is_none());
}

#[tokio::test]
async fn test_eviction_runs_once_under_concurrent_teardown() {
    let h = Harness::new(Handshake::NeverConnect, settings(5000, 10)).await;
    h.peers.on_offer("V1", offer(depth(30))).await.unwrap();
    let session = h.peers.get_session("V1").unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let cleanup = cleanup(&h);
    let (report, closed) = tokio::join!(
        cleanup.run_once(),
        h.peers.close_session(&session, "bye")
    );
    let teardowns = report.evicted.len() + usize::from(closed);
    assert_eq!(teardowns, 1);
    assert_eq!(h.negotiator.transport("V1").unwrap().close_count(), 1);
    assert!(session.state().is_terminal());
}

#[tokio::test]
async fn test_handshake_timeout() {
    let h = Harness::new(
        Handshake::SlowAnswer(Duration::from_millis(300)),
        settings(50, 30_000),
    )
    .await;

    let err = h.peers.on_offer("V1", offer(depth(30))).await.unwrap_err();
    assert!(matches!(err, AppError::NegotiationTimeout(_)));
    assert!(h.peers.get_session("V1").is_none());
    assert!(h.capture.session("D1").is_none());
    assert_eq!(h.negotiator.transport("V1").unwrap().close_count(), 1);
}

#[tokio::test]
async fn test_rejected_offer_fails_session() {
    let h = Harness::new(Handshake::Reject, PeerSettings::default()).await;
    let mut events = h.events.subscribe();

    let err = h.peers.on_offer("V1", offer(depth(30))).await.unwrap_err();
    assert!(matches!(err, AppError::NegotiationFailed(_)));
    assert!(h.peers.get_session("V1").is_none());
    assert!(!h.is_streaming("D1"));

    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let realsense_monitor::events::SystemEvent::PeerStateChanged { state, .. } = event {
            states.push(state);
        }
    }
    assert_eq!(states, vec!["negotiating".to_string(), "failed".to_string()]);
}

#[tokio::test]
async fn test_connection_arriving_after_answer() {
    let h = Harness::new(
        Handshake::ConnectAfter(Duration::from_millis(30)),
        settings(1000, 30_000),
    )
    .await;
    h.peers.on_offer("V1", offer(depth(30))).await.unwrap();
    let session = h.peers.get_session("V1").unwrap();
    assert_eq!(session.state(), PeerState::Negotiating);

    assert!(eventually(|| session.state() == PeerState::Connected).await);
}

#[tokio::test]
async fn test_connect_deadline_fails_session() {
    let h = Harness::new(Handshake::NeverConnect, settings(80, 30_000)).await;
    h.peers.on_offer("V1", offer(depth(30))).await.unwrap();
    let session = h.peers.get_session("V1").unwrap();

    assert!(eventually(|| session.state() == PeerState::Failed).await);
    assert!(h.peers.get_session("V1").is_none());
    assert!(h.capture.session("D1").is_none());

    let errors: Vec<_> = h
        .signaling
        .sent_to("V1")
        .into_iter()
        .filter_map(|m| match m {
            SignalingMessage::Error(e) => Some(e),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, "negotiation_timeout");
}

#[tokio::test]
async fn test_signal_flow() {
    let h = Harness::default().await;

    h.peers
        .handle_signal("V1", SignalingMessage::Offer(offer(depth(30))))
        .await;
    assert!(h.signaling.kinds_sent_to("V1").contains(&"answer"));
    assert_eq!(h.peers.get_session("V1").unwrap().state(), PeerState::Connected);

    h.peers.handle_signal("V1", SignalingMessage::Keepalive).await;
    h.peers
        .handle_signal("V1", SignalingMessage::Candidate(IceCandidate::new("candidate:9")))
        .await;
    assert!(!h.signaling.kinds_sent_to("V1").contains(&"error"));

    // server-side messages are refused
    h.peers
        .handle_signal(
            "V1",
            SignalingMessage::State {
                state: ConnectionState::Connected,
            },
        )
        .await;
    assert_eq!(
        h.signaling
            .kinds_sent_to("V1")
            .iter()
            .filter(|k| **k == "error")
            .count(),
        1
    );

    h.peers.handle_signal("V1", SignalingMessage::Close).await;
    assert!(h.peers.get_session("V1").is_none());
    assert_err!(h.peers.keepalive("V1"));
    assert!(h.capture.session("D1").is_none());

    h.peers.handle_signal("V1", SignalingMessage::Keepalive).await;
    let last = h.signaling.sent_to("V1").pop().unwrap();
    assert!(matches!(last, SignalingMessage::Error(e) if e.kind == "not_found"));
}

#[tokio::test]
async fn test_offer_error_is_signaled() {
    let h = Harness::default().await;
    let mut request = depth(30);
    request.configs[0].framerate = 7;

    h.peers
        .handle_signal("V1", SignalingMessage::Offer(offer(request)))
        .await;
    let sent = h.signaling.sent_to("V1");
    assert_eq!(sent.len(), 1);
    assert!(matches!(&sent[0], SignalingMessage::Error(e) if e.kind == "invalid_config"));
}

#[tokio::test]
async fn test_stop_evicts_viewers() {
    let h = Harness::default().await;
    h.peers.on_offer("V1", offer(depth(30))).await.unwrap();
    h.peers.on_offer("V2", offer(depth(30))).await.unwrap();

    let mut evicted = h.peers.stop_capture("D1").await.unwrap();
    evicted.sort();
    assert_eq!(evicted, vec!["V1".to_string(), "V2".to_string()]);
    assert_eq!(h.peers.session_count(), 0);
    assert!(!h.is_streaming("D1"));

    for viewer in ["V1", "V2"] {
        assert!(h.signaling.kinds_sent_to(viewer).contains(&"stream_ended"));
        assert_eq!(h.negotiator.transport(viewer).unwrap().close_count(), 1);
    }

    let err = h.peers.stop_capture("D1").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_unplug_evicts_viewers() {
    let h = Harness::default().await;
    let cancel = CancellationToken::new();
    tokio::spawn(h.peers.clone().run_eviction_listener(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.peers.on_offer("V1", offer(depth(30))).await.unwrap();
    h.backend.unplug("D1");

    let peers = h.peers.clone();
    assert!(eventually(|| peers.session_count() == 0).await);
    assert!(h.capture.session("D1").is_none());
    assert!(!h.backend.is_claimed("D1"));

    let signaling = h.signaling.clone();
    assert!(eventually(|| signaling.kinds_sent_to("V1").contains(&"stream_ended")).await);
    cancel.cancel();
}

#[tokio::test]
async fn test_new_offer_replaces_viewer_session() {
    let h = Harness::default().await;
    h.peers.on_offer("V1", offer(depth(30))).await.unwrap();
    let first = h.peers.get_session("V1").unwrap();
    let first_transport = h.negotiator.transport("V1").unwrap();

    h.peers.on_offer("V1", offer(depth(30))).await.unwrap();
    let second = h.peers.get_session("V1").unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(first.state(), PeerState::Closed);
    assert_eq!(second.state(), PeerState::Connected);
    assert_eq!(first_transport.close_count(), 1);
    assert_eq!(h.peers.session_count(), 1);
    assert_eq!(h.negotiator.created(), 2);
    assert_eq!(h.capture.session("D1").unwrap().subscriber_count(), 1);
}

#[tokio::test]
async fn test_concurrent_offers_from_one_viewer() {
    let h = Harness::default().await;
    h.backend.set_start_delay(Some(Duration::from_millis(50)));

    let (a, b) = tokio::join!(
        h.peers.on_offer("V1", offer(depth(30))),
        h.peers.on_offer("V1", offer(depth(30))),
    );
    a.unwrap();
    b.unwrap();

    let transports = h.negotiator.transports("V1");
    assert_eq!(transports.len(), 2);
    assert_eq!(h.peers.session_count(), 1);
    assert_eq!(transports[0].close_count(), 1);
    assert_eq!(transports[1].close_count(), 0);
    assert_eq!(h.capture.session("D1").unwrap().subscriber_count(), 1);

    h.peers.on_disconnect("V1").await;
    for transport in &transports {
        assert_eq!(transport.close_count(), 1);
        assert_eq!(transport.state(), ConnectionState::Closed);
    }
    assert!(h.capture.session("D1").is_none());
    assert!(!h.is_streaming("D1"));
}

#[tokio::test]
async fn test_max_sessions() {
    let h = Harness::new(
        Handshake::ConnectImmediately,
        PeerSettings {
            max_sessions: 1,
            ..PeerSettings::default()
        },
    )
    .await;
    h.peers.on_offer("V1", offer(depth(30))).await.unwrap();

    let err = h.peers.on_offer("V2", offer(depth(30))).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    // the existing viewer may still renegotiate
    h.peers.on_offer("V1", offer(depth(30))).await.unwrap();
}

#[tokio::test]
async fn test_max_sessions_under_concurrent_offers() {
    let h = Harness::new(
        Handshake::ConnectImmediately,
        PeerSettings {
            max_sessions: 2,
            ..PeerSettings::default()
        },
    )
    .await;
    h.backend.set_start_delay(Some(Duration::from_millis(50)));

    let (v1, v2, v3) = tokio::join!(
        h.peers.on_offer("V1", offer(depth(30))),
        h.peers.on_offer("V2", offer(depth(30))),
        h.peers.on_offer("V3", offer(depth(30))),
    );
    let results = [v1, v2, v3];
    let accepted = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::BadRequest(_))))
        .count();
    assert_eq!((accepted, refused), (2, 1));
    assert_eq!(h.peers.session_count(), 2);
    assert_eq!(h.capture.session("D1").unwrap().subscriber_count(), 2);
}

#[tokio::test]
async fn test_empty_offer_joins_running_session() {
    let h = Harness::default().await;
    let err = h
        .peers
        .on_offer("V1", offer(StreamRequest::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    h.peers.on_offer("V1", offer(depth(30))).await.unwrap();
    h.peers
        .on_offer("V2", offer(StreamRequest::default()))
        .await
        .unwrap();
    assert_eq!(h.capture.session("D1").unwrap().subscriber_count(), 2);
}

#[tokio::test]
async fn test_explicit_start_survives_viewers() {
    let h = Harness::default().await;
    let request = StreamRequest::new(vec![StreamConfig {
        sensor_id: "S2".to_string(),
        stream_type: StreamType::Color,
        format: StreamFormat::Rgb8,
        resolution: Resolution::new(640, 480),
        framerate: 30,
        enable: true,
    }]);
    h.capture.ensure_session("D1", &request, None).await.unwrap();

    h.peers.on_offer("V1", offer(request.clone())).await.unwrap();
    h.peers.on_disconnect("V1").await;
    assert!(cleanup(&h).run_once().await.reaped.is_empty());
    assert!(h.is_streaming("D1"));

    h.peers.stop_capture("D1").await.unwrap();
    assert!(!h.is_streaming("D1"));
}

#[tokio::test]
async fn test_cleanup_loop_stops_on_cancel() {
    let h = Harness::new(Handshake::NeverConnect, settings(5000, 50)).await;
    h.peers.on_offer("V1", offer(depth(30))).await.unwrap();

    let cancel = CancellationToken::new();
    let task = tokio::spawn(cleanup(&h).run(cancel.clone()));

    let peers = h.peers.clone();
    assert!(eventually(|| peers.session_count() == 0).await);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("cleanup loop did not stop")
        .unwrap();
}
