use async_trait::async_trait;
use std::sync::Arc;
use streamgate_core::{IceConnectionState, PeerId};
use streamgate_server::{
    DataChannelHandler, NegotiationState, OrchestratorEvent, OrchestratorMode, PeerTransportEvent,
};
use tokio::sync::Mutex;

use crate::integration::{
    create_test_orchestrator, create_test_orchestrator_with, init_tracing, test_config,
};
use crate::utils::{
    EVENT_TIMEOUT_MS, FakeSignalingClient, TransportCall, offer_json, wait_until,
};

#[derive(Clone, Default)]
struct RecordingHandler {
    messages: Arc<Mutex<Vec<(PeerId, String)>>>,
}

#[async_trait]
impl DataChannelHandler for RecordingHandler {
    async fn on_data_channel_message(&self, peer_id: PeerId, text: String) {
        self.messages.lock().await.push((peer_id, text));
    }
}

#[tokio::test]
async fn test_ice_connected_marks_session_connected() {
    init_tracing();

    let mut test = create_test_orchestrator(OrchestratorMode::MultiPeer);
    test.sign_in().await;

    let viewer = PeerId(7);
    test.signaling.message_from(viewer, offer_json("v=0 viewer"));
    test.wait_for_sent(1).await;

    test.factory
        .raise(
            viewer,
            PeerTransportEvent::IceStateChanged(viewer, IceConnectionState::Checking),
        )
        .await;
    test.factory
        .raise(
            viewer,
            PeerTransportEvent::IceStateChanged(viewer, IceConnectionState::Connected),
        )
        .await;

    test.wait_for_event(|e| {
        *e == OrchestratorEvent::SessionStateChanged(viewer, NegotiationState::Connected)
    })
    .await;
    test.wait_for_event(|e| {
        *e == OrchestratorEvent::IceStateChanged(viewer, IceConnectionState::Connected)
    })
    .await;

    let snapshot = test.snapshot().await;
    assert_eq!(
        snapshot.session(viewer).unwrap().state,
        NegotiationState::Connected
    );
}

#[tokio::test]
async fn test_failed_ice_evicts_session_in_multi_peer_mode() {
    init_tracing();

    let mut test = create_test_orchestrator(OrchestratorMode::MultiPeer);
    test.sign_in().await;

    let viewer = PeerId(7);
    test.signaling.message_from(viewer, offer_json("v=0 viewer"));
    test.wait_for_sent(1).await;

    test.factory
        .raise(
            viewer,
            PeerTransportEvent::IceStateChanged(viewer, IceConnectionState::Failed),
        )
        .await;
    test.wait_for_event(|e| *e == OrchestratorEvent::SessionClosed(viewer))
        .await;

    assert!(test.snapshot().await.sessions.is_empty());
    assert!(test.factory.calls().contains(&TransportCall::Close(viewer)));
}

#[tokio::test]
async fn test_failed_ice_keeps_session_in_single_peer_mode() {
    init_tracing();

    let mut test = create_test_orchestrator(OrchestratorMode::SinglePeer);
    test.sign_in().await;

    let viewer = PeerId(7);
    test.signaling.message_from(viewer, offer_json("v=0 viewer"));
    test.wait_for_sent(1).await;

    test.factory
        .raise(
            viewer,
            PeerTransportEvent::IceStateChanged(viewer, IceConnectionState::Failed),
        )
        .await;
    test.wait_for_event(|e| {
        *e == OrchestratorEvent::IceStateChanged(viewer, IceConnectionState::Failed)
    })
    .await;

    assert!(test.snapshot().await.session(viewer).is_some());
}

#[tokio::test]
async fn test_data_channel_text_reaches_handler() {
    init_tracing();

    let handler = RecordingHandler::default();
    let mut test = create_test_orchestrator_with(
        test_config(OrchestratorMode::MultiPeer),
        FakeSignalingClient::auto_complete(),
        |o| o.with_data_channel_handler(Arc::new(handler.clone())),
    );
    test.sign_in().await;

    let viewer = PeerId(7);
    test.signaling.message_from(viewer, offer_json("v=0 viewer"));
    test.wait_for_sent(1).await;

    test.factory
        .raise(
            viewer,
            PeerTransportEvent::DataChannelMessage(viewer, r#"{"key":"W","down":true}"#.to_owned()),
        )
        .await;

    let messages = handler.messages.clone();
    let received = wait_until(EVENT_TIMEOUT_MS, || {
        messages.try_lock().is_ok_and(|m| !m.is_empty())
    })
    .await;
    assert!(received, "Handler did not receive the message");
    assert_eq!(
        handler.messages.lock().await.as_slice(),
        &[(viewer, r#"{"key":"W","down":true}"#.to_owned())]
    );
}
