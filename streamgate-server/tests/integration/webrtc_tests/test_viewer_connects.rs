use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use streamgate_core::{PeerId, PeerMessage, SdpType, SessionDescription};
use streamgate_server::{
    DataChannelHandler, NegotiationState, OrchestratorEvent, OrchestratorMode, RtcTransportFactory,
};
use tokio::sync::mpsc;

use crate::integration::{
    TestOrchestrator, create_test_orchestrator_with, init_tracing, test_config,
};
use crate::utils::{FakeSignalingClient, ViewerClient};

/// Timeout for connection establishment (ms).
const CONNECTION_TIMEOUT_MS: u64 = 10000;

struct ChannelHandler {
    tx: mpsc::UnboundedSender<(PeerId, String)>,
}

#[async_trait]
impl DataChannelHandler for ChannelHandler {
    async fn on_data_channel_message(&self, peer_id: PeerId, text: String) {
        let _ = self.tx.send((peer_id, text));
    }
}

/// Forward signaling both ways until the viewer reports a connection.
async fn exchange_until_connected(test: &TestOrchestrator, viewer: &ViewerClient, id: PeerId) {
    let start = tokio::time::Instant::now();
    let mut forwarded = 0;
    let mut answered = false;

    while start.elapsed() < Duration::from_millis(CONNECTION_TIMEOUT_MS) {
        let sent = test.signaling.sent_to(id);
        for payload in &sent[forwarded..] {
            match PeerMessage::parse(payload).expect("Server sent a malformed message") {
                PeerMessage::Description(answer) => {
                    assert_eq!(answer.kind, SdpType::Answer);
                    viewer
                        .set_remote_answer(answer.sdp)
                        .await
                        .expect("Viewer rejected the answer");
                    answered = true;
                }
                PeerMessage::Candidate(candidate) => viewer
                    .add_remote_candidate(&candidate)
                    .await
                    .expect("Viewer rejected a candidate"),
            }
        }
        forwarded = sent.len();

        for candidate in viewer.take_candidates() {
            test.signaling
                .message_from(id, PeerMessage::Candidate(candidate).to_json());
        }

        if answered && viewer.is_connected() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("Viewer did not connect");
}

#[tokio::test]
async fn test_viewer_connects_and_sends_input() {
    init_tracing();

    let (input_tx, mut input_rx) = mpsc::unbounded_channel();
    let mut test = create_test_orchestrator_with(
        test_config(OrchestratorMode::MultiPeer),
        FakeSignalingClient::auto_complete(),
        |o| {
            o.with_transport_factory(Arc::new(RtcTransportFactory))
                .with_data_channel_handler(Arc::new(ChannelHandler { tx: input_tx }))
        },
    );
    test.sign_in().await;

    let id = PeerId(7);
    let viewer = ViewerClient::new().await.expect("Failed to create viewer");
    let offer = viewer.create_offer().await.expect("Failed to create offer");
    test.signaling.message_from(
        id,
        PeerMessage::Description(SessionDescription::offer(offer)).to_json(),
    );

    exchange_until_connected(&test, &viewer, id).await;
    test.wait_for_event(|e| {
        *e == OrchestratorEvent::SessionStateChanged(id, NegotiationState::Connected)
    })
    .await;

    viewer
        .wait_for_data_channel(CONNECTION_TIMEOUT_MS)
        .await
        .expect("Data channel did not open");
    viewer
        .send_text(r#"{"type":"mouse","x":10,"y":20}"#)
        .await
        .expect("Failed to send input");

    let (from, text) = tokio::time::timeout(
        Duration::from_millis(CONNECTION_TIMEOUT_MS),
        input_rx.recv(),
    )
    .await
    .expect("Input did not reach the handler")
    .expect("Handler channel closed");
    assert_eq!(from, id);
    assert_eq!(text, r#"{"type":"mouse","x":10,"y":20}"#);

    assert!(test.handle.close().await);
    viewer.close().await.expect("Failed to close viewer");
}
