use streamgate_core::{IceConnectionState, PeerId};
use streamgate_server::{
    NegotiationState, OrchestratorEvent, OrchestratorMode, PeerTransportEvent, SignalingEvent,
};

use crate::integration::{
    TestOrchestrator, create_test_orchestrator_with, init_tracing, test_config,
};
use crate::utils::{EVENT_TIMEOUT_MS, FakeSignalingClient, offer_json, wait_until};

async fn connect_viewer(test: &mut TestOrchestrator, viewer: PeerId) {
    let sent = test.signaling.sent().len();
    test.signaling.message_from(viewer, offer_json("v=0 viewer"));
    test.wait_for_sent(sent + 1).await;
    test.signaling.complete_send(true);

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
}

async fn wait_for_capacity(test: &TestOrchestrator, expected: &[u32]) {
    let signaling = test.signaling.clone();
    let reached = wait_until(EVENT_TIMEOUT_MS, || signaling.capacity_updates() == expected).await;
    assert!(
        reached,
        "Expected capacity reports {:?}, got {:?}",
        expected,
        test.signaling.capacity_updates()
    );
}

#[tokio::test]
async fn test_capacity_follows_connected_viewers() {
    init_tracing();

    let mut config = test_config(OrchestratorMode::MultiPeer);
    config.webrtc.capacity = 2;
    let mut test = create_test_orchestrator_with(config, FakeSignalingClient::new(), |o| o);
    test.sign_in().await;
    wait_for_capacity(&test, &[2]).await;

    let first = PeerId(7);
    let second = PeerId(8);
    connect_viewer(&mut test, first).await;
    wait_for_capacity(&test, &[2, 1]).await;
    connect_viewer(&mut test, second).await;
    wait_for_capacity(&test, &[2, 1, 0]).await;

    // Completed after Connected is the same viewer
    test.factory
        .raise(
            first,
            PeerTransportEvent::IceStateChanged(first, IceConnectionState::Completed),
        )
        .await;
    test.wait_for_event(|e| {
        *e == OrchestratorEvent::IceStateChanged(first, IceConnectionState::Completed)
    })
    .await;

    test.signaling
        .push(SignalingEvent::PeerDisconnected { id: first });
    test.wait_for_event(|e| *e == OrchestratorEvent::SessionClosed(first))
        .await;
    wait_for_capacity(&test, &[2, 1, 0, 1]).await;

    test.factory
        .raise(
            second,
            PeerTransportEvent::IceStateChanged(second, IceConnectionState::Failed),
        )
        .await;
    test.wait_for_event(|e| *e == OrchestratorEvent::SessionClosed(second))
        .await;
    wait_for_capacity(&test, &[2, 1, 0, 1, 2]).await;
}

#[tokio::test]
async fn test_viewer_that_never_connected_does_not_change_capacity() {
    init_tracing();

    let mut config = test_config(OrchestratorMode::MultiPeer);
    config.webrtc.capacity = 3;
    let mut test = create_test_orchestrator_with(config, FakeSignalingClient::new(), |o| o);
    test.sign_in().await;
    wait_for_capacity(&test, &[3]).await;

    let viewer = PeerId(7);
    test.signaling.message_from(viewer, offer_json("v=0 viewer"));
    test.wait_for_sent(1).await;
    test.signaling
        .push(SignalingEvent::PeerDisconnected { id: viewer });
    test.wait_for_event(|e| *e == OrchestratorEvent::SessionClosed(viewer))
        .await;

    let snapshot = test.snapshot().await;
    assert!(snapshot.sessions.is_empty());
    assert_eq!(test.signaling.capacity_updates(), vec![3]);
}

#[tokio::test]
async fn test_capacity_is_silent_when_disabled_or_single_peer() {
    init_tracing();

    let mut disabled = create_test_orchestrator_with(
        test_config(OrchestratorMode::MultiPeer),
        FakeSignalingClient::new(),
        |o| o,
    );
    disabled.sign_in().await;
    connect_viewer(&mut disabled, PeerId(7)).await;
    assert!(disabled.signaling.capacity_updates().is_empty());

    let mut config = test_config(OrchestratorMode::SinglePeer);
    config.webrtc.capacity = 2;
    let mut single = create_test_orchestrator_with(config, FakeSignalingClient::new(), |o| o);
    single.sign_in().await;
    connect_viewer(&mut single, PeerId(7)).await;
    assert!(single.signaling.capacity_updates().is_empty());
}
