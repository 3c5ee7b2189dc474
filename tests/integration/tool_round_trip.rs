//! Tool calls from the endpoint are answered over the same session.

use crate::helpers::{MockConnector, MockDevices, MockMic, MockTransport, test_config, wait_for};
use duplex_agent::bridge::Notification;
use duplex_agent::config::ToolsConfig;
use duplex_agent::error::{Result, SessionError};
use duplex_agent::pipeline::messages::{
    InboundEvent, OutboundMessage, ToolCallRequest, ToolCallResponse, ToolOutcome,
};
use duplex_agent::{SessionOrchestrator, SessionState, ToolHandler, ToolRegistry, ui_bridge};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Echo;

impl ToolHandler for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the arguments back"
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object" })
    }

    fn call(&self, arguments: Map<String, Value>) -> Result<Value> {
        Ok(Value::Object(arguments))
    }
}

struct OutOfService;

impl ToolHandler for OutOfService {
    fn name(&self) -> &str {
        "seat_map"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object" })
    }

    fn call(&self, _arguments: Map<String, Value>) -> Result<Value> {
        Err(SessionError::ToolHandler("seat map service unavailable".into()))
    }
}

fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    let Value::Object(arguments) = arguments else {
        panic!("arguments must be an object");
    };
    ToolCallRequest {
        id: id.into(),
        name: name.into(),
        arguments,
    }
}

async fn wait_for_responses(transport: &MockTransport, count: usize) -> Vec<ToolCallResponse> {
    for _ in 0..200 {
        let responses: Vec<_> = transport
            .sent()
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::ToolResponse(r) => Some(r),
                _ => None,
            })
            .collect();
        if responses.len() >= count {
            return responses;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {count} tool responses");
}

#[tokio::test]
async fn registered_and_unknown_tools_are_both_answered() {
    let (transport, script) = MockTransport::new();
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(Echo));
    let (mut ui, bridge) = ui_bridge(8);

    let orchestrator = SessionOrchestrator::new(
        test_config(),
        MockConnector::new(Arc::clone(&transport)),
        MockDevices::new(MockMic::new(None)),
        registry,
    )
    .with_bridge(bridge);
    let cancel = orchestrator.cancel_token();
    let session = tokio::spawn(orchestrator.run());

    script.event(InboundEvent::ToolCall(vec![
        call("c1", "echo", json!({ "x": 1 })),
        call("c2", "launch_rockets", json!({})),
    ]));

    let responses = wait_for_responses(&transport, 2).await;
    assert_eq!(
        responses[0],
        ToolCallResponse {
            id: "c1".into(),
            name: "echo".into(),
            outcome: ToolOutcome::Result(json!({ "x": 1 })),
        }
    );
    assert_eq!(responses[1].id, "c2");
    assert_eq!(responses[1].outcome, ToolOutcome::acknowledged());

    let mut states = Vec::new();
    let activity = wait_for(&mut ui.notifications, &mut states, |n| {
        matches!(n, Notification::ToolActivity { .. })
    })
    .await;
    assert!(matches!(
        activity,
        Notification::ToolActivity { success: true, .. }
    ));

    cancel.cancel();
    assert!(session.await.unwrap().is_ok());
}

#[tokio::test]
async fn failing_handler_is_answered_and_session_continues() {
    let (transport, script) = MockTransport::new();
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(OutOfService));
    registry.register(Arc::new(Echo));
    let (mut ui, bridge) = ui_bridge(8);

    let orchestrator = SessionOrchestrator::new(
        test_config(),
        MockConnector::new(Arc::clone(&transport)),
        MockDevices::new(MockMic::new(None)),
        registry,
    )
    .with_bridge(bridge);
    let cancel = orchestrator.cancel_token();
    let state = orchestrator.state();
    let session = tokio::spawn(orchestrator.run());

    script.event(InboundEvent::ToolCall(vec![call("s1", "seat_map", json!({}))]));
    let responses = wait_for_responses(&transport, 1).await;
    assert_eq!(responses.len(), 1);
    assert_eq!(
        responses[0],
        ToolCallResponse {
            id: "s1".into(),
            name: "seat_map".into(),
            outcome: ToolOutcome::Error("seat map service unavailable".into()),
        }
    );
    assert_eq!(
        responses[0].outcome.to_payload(),
        json!({ "error": "seat map service unavailable" })
    );

    let mut states = Vec::new();
    let activity = wait_for(&mut ui.notifications, &mut states, |n| {
        matches!(n, Notification::ToolActivity { .. })
    })
    .await;
    assert!(matches!(
        activity,
        Notification::ToolActivity { success: false, .. }
    ));

    // The session keeps serving turns after the failure.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*state.borrow(), SessionState::Active);
    script.event(InboundEvent::ToolCall(vec![call("e1", "echo", json!({ "ok": true }))]));
    let responses = wait_for_responses(&transport, 2).await;
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[1].id, "e1");
    assert!(responses[1].outcome.is_success());
    assert_eq!(*state.borrow(), SessionState::Active);

    cancel.cancel();
    assert!(session.await.unwrap().is_ok());
}

#[tokio::test]
async fn ticket_tool_queries_the_status_service() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pnr"))
        .and(header("authorization", "secret"))
        .and(body_json(json!({ "ticket": "2834567890" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "CNF",
            "train": "12951"
        })))
        .mount(&server)
        .await;

    let mut tools = ToolsConfig::default();
    tools.ticket.endpoint = Some(format!("{}/pnr", server.uri()));
    tools.ticket.authorization = Some("secret".into());
    let registry = ToolRegistry::from_config(&tools);
    let tool_name = tools.ticket.name.clone();
    assert!(registry.contains(&tool_name));

    let (transport, script) = MockTransport::new();
    let orchestrator = SessionOrchestrator::new(
        test_config(),
        MockConnector::new(Arc::clone(&transport)),
        MockDevices::new(MockMic::new(None)),
        registry,
    );
    let cancel = orchestrator.cancel_token();
    let session = tokio::spawn(orchestrator.run());

    script.event(InboundEvent::ToolCall(vec![call(
        "pnr-1",
        &tool_name,
        json!({ "ticket_pnr": "2834567890" }),
    )]));

    let responses = wait_for_responses(&transport, 1).await;
    assert_eq!(responses[0].id, "pnr-1");
    assert_eq!(
        responses[0].outcome,
        ToolOutcome::Result(json!({ "status": "CNF", "train": "12951" }))
    );

    cancel.cancel();
    assert!(session.await.unwrap().is_ok());
}
