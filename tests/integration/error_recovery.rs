//! Fatal errors move the session to `Errored` and still tear everything down.

use crate::helpers::{
    MockConnector, MockDevices, MockMic, MockTransport, test_config, wait_for_end,
};
use duplex_agent::bridge::SessionOutcome;
use duplex_agent::config::CaptureMode;
use duplex_agent::pipeline::messages::StreamRead;
use duplex_agent::{SessionError, SessionOrchestrator, SessionState, ToolRegistry, ui_bridge};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn connect_failure_goes_straight_to_errored() {
    let devices = MockDevices::new(MockMic::new(None));
    let connector = MockConnector::failing();
    let (mut ui, bridge) = ui_bridge(8);

    let result = SessionOrchestrator::new(
        test_config(),
        connector.clone(),
        devices.clone(),
        ToolRegistry::new(),
    )
    .with_bridge(bridge)
    .run()
    .await;

    assert!(matches!(result, Err(SessionError::Transport(_))));
    let mut states = Vec::new();
    let outcome = wait_for_end(&mut ui.notifications, &mut states).await;
    assert!(matches!(outcome, SessionOutcome::Failed { .. }));
    assert_eq!(states, vec![SessionState::Connecting, SessionState::Errored]);
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(devices.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn microphone_failure_errors_the_session() {
    let (transport, _script) = MockTransport::new();
    let devices = MockDevices::new(MockMic::new(Some(3)));
    let (mut ui, bridge) = ui_bridge(8);

    let session = tokio::spawn(
        SessionOrchestrator::new(
            test_config(),
            MockConnector::new(Arc::clone(&transport)),
            devices.clone(),
            ToolRegistry::new(),
        )
        .with_bridge(bridge)
        .run(),
    );

    let mut states = Vec::new();
    let outcome = wait_for_end(&mut ui.notifications, &mut states).await;
    let result = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .expect("session did not end")
        .unwrap();

    assert!(matches!(result, Err(SessionError::Device(_))), "{result:?}");
    match outcome {
        SessionOutcome::Failed { cause } => assert!(cause.contains("microphone"), "{cause}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(
        states,
        vec![
            SessionState::Connecting,
            SessionState::Active,
            SessionState::Errored,
        ]
    );
    assert!(transport.is_closed());
    assert!(devices.all_closed());
}

#[tokio::test]
async fn receive_failure_errors_the_session() {
    let (transport, script) = MockTransport::new();
    let devices = MockDevices::new(MockMic::new(None));
    let (mut ui, bridge) = ui_bridge(8);

    let session = tokio::spawn(
        SessionOrchestrator::new(
            test_config(),
            MockConnector::new(Arc::clone(&transport)),
            devices.clone(),
            ToolRegistry::new(),
        )
        .with_bridge(bridge)
        .run(),
    );

    script.push(StreamRead::Failed("connection reset".into()));

    let mut states = Vec::new();
    let outcome = wait_for_end(&mut ui.notifications, &mut states).await;
    let result = session.await.unwrap();

    assert!(matches!(result, Err(SessionError::Transport(_))), "{result:?}");
    assert!(matches!(outcome, SessionOutcome::Failed { .. }));
    assert_eq!(states.last(), Some(&SessionState::Errored));
    assert!(transport.is_closed());
    assert!(devices.all_closed());
}

#[tokio::test]
async fn endpoint_hangup_errors_the_session() {
    let (transport, script) = MockTransport::new();
    let devices = MockDevices::new(MockMic::new(None));

    let session = tokio::spawn(
        SessionOrchestrator::new(
            test_config(),
            MockConnector::new(Arc::clone(&transport)),
            devices.clone(),
            ToolRegistry::new(),
        )
        .run(),
    );
    script.push(StreamRead::EndOfStream);

    let result = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .expect("session did not end")
        .unwrap();
    assert!(matches!(result, Err(SessionError::Transport(_))), "{result:?}");
    assert!(devices.all_closed());
}

#[tokio::test]
async fn missing_capture_device_closes_what_was_opened() {
    let (transport, _script) = MockTransport::new();
    // No camera behind this provider, so opening one fails.
    let devices = MockDevices::new(MockMic::new(None));
    let mut config = test_config();
    config.capture.mode = CaptureMode::Camera;

    let result = SessionOrchestrator::new(
        config,
        MockConnector::new(Arc::clone(&transport)),
        devices.clone(),
        ToolRegistry::new(),
    )
    .run()
    .await;

    assert!(matches!(result, Err(SessionError::Device(_))), "{result:?}");
    assert!(transport.is_closed());
    assert!(devices.all_closed());
}
