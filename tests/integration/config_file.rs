//! Config files on disk drive the session the same way defaults do.

use crate::helpers::{MockConnector, MockDevices, MockMic, MockTransport};
use duplex_agent::config::CaptureMode;
use duplex_agent::{SessionConfig, SessionError, SessionOrchestrator, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn partial_file_keeps_defaults_for_missing_sections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[capture]
mode = "screen"
interval_ms = 500

[outbound]
quit_sentinel = "bye"

[tools.ticket]
endpoint = "https://tickets.example/status"
"#,
    )
    .unwrap();

    let config = SessionConfig::from_file(&path).unwrap();
    assert_eq!(config.capture.mode, CaptureMode::Screen);
    assert_eq!(config.capture.interval(), Duration::from_millis(500));
    assert_eq!(config.capture.max_dimension, 1024);
    assert_eq!(config.outbound.quit_sentinel, "bye");
    assert_eq!(config.outbound.queue_capacity, 5);
    assert_eq!(config.audio.send_sample_rate, 16_000);
    assert_eq!(config.audio.receive_sample_rate, 24_000);

    let registry = ToolRegistry::from_config(&config.tools);
    assert!(registry.contains(&config.tools.ticket.name));
}

#[test]
fn saved_file_loads_back_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = SessionConfig::default();
    config.capture.mode = CaptureMode::Camera;
    config.transport.system_instruction = "Answer railway questions.".into();
    config.save_to_file(&path).unwrap();

    assert_eq!(SessionConfig::from_file(&path).unwrap(), config);
}

#[test]
fn invalid_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[outbound]\nqueue_capacity = 0\n").unwrap();

    assert!(matches!(
        SessionConfig::from_file(&path),
        Err(SessionError::Config(_))
    ));
}

#[tokio::test]
async fn custom_quit_sentinel_ends_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[outbound]\nquit_sentinel = \"bye\"\n\n[shutdown]\ndrain_timeout_ms = 500\n",
    )
    .unwrap();
    let config = SessionConfig::from_file(&path).unwrap();

    let (transport, _script) = MockTransport::new();
    let (ui, bridge) = duplex_agent::ui_bridge(8);
    let session = tokio::spawn(
        SessionOrchestrator::new(
            config,
            MockConnector::new(Arc::clone(&transport)),
            MockDevices::new(MockMic::new(None)),
            ToolRegistry::new(),
        )
        .with_bridge(bridge)
        .run(),
    );

    // The default sentinel is plain text under this config.
    ui.commands.send("q".to_owned()).await.unwrap();
    ui.commands.send("bye".to_owned()).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .expect("session did not end")
        .unwrap();
    assert!(result.is_ok());
    assert!(transport.is_closed());
}
