use std::sync::Arc;
use streamgate_core::{BearerToken, PeerId};
use streamgate_server::{
    AuthenticationProvider, OrchestratorEvent, OrchestratorMode, TurnCredentialProvider,
};

use crate::integration::{create_test_orchestrator_with, init_tracing, test_config};
use crate::utils::{
    EVENT_TIMEOUT_MS, FakeSignalingClient, ManualAuthProvider, ScriptedTransport, http_response,
    offer_json, wait_until,
};

const TURN_SERVICE: &str = "http://turn.example.com/api/credentials";

fn turn_service() -> ScriptedTransport {
    ScriptedTransport::new(|_| {
        http_response(200, r#"{"username":"turn-user","password":"turn-pass"}"#)
    })
}

#[tokio::test]
async fn test_token_is_installed_before_sign_in() {
    init_tracing();

    let auth = Arc::new(ManualAuthProvider::granting("tok"));
    let auth_dyn: Arc<dyn AuthenticationProvider> = auth.clone();
    let mut test = create_test_orchestrator_with(
        test_config(OrchestratorMode::MultiPeer),
        FakeSignalingClient::new(),
        |o| o.with_authentication(auth_dyn),
    );

    test.sign_in().await;

    assert_eq!(test.signaling.authorization().as_deref(), Some("Bearer tok"));
    assert_eq!(
        test.signaling.connects(),
        vec![("localhost".to_owned(), 8888, "render".to_owned())]
    );
    assert_eq!(auth.calls(), 1);
}

#[tokio::test]
async fn test_failed_authentication_aborts_connect() {
    init_tracing();

    let auth = Arc::new(ManualAuthProvider::new());
    let auth_dyn: Arc<dyn AuthenticationProvider> = auth.clone();
    let mut test = create_test_orchestrator_with(
        test_config(OrchestratorMode::MultiPeer),
        FakeSignalingClient::new(),
        |o| o.with_authentication(auth_dyn),
    );

    assert!(test.handle.connect("render").await);
    assert!(wait_until(EVENT_TIMEOUT_MS, || auth.is_running()).await);

    auth.complete(BearerToken::failed());
    test.wait_for_event(|e| matches!(e, OrchestratorEvent::ConnectFailed(_)))
        .await;
    assert!(test.signaling.connects().is_empty());

    // A later connect starts over
    assert!(test.handle.connect("render").await);
    assert!(wait_until(EVENT_TIMEOUT_MS, || auth.is_running()).await);
    assert_eq!(auth.calls(), 2);
}

#[tokio::test]
async fn test_turn_credentials_feed_relay_configuration() {
    init_tracing();

    let transport = turn_service();
    let auth = Arc::new(ManualAuthProvider::granting("tok"));
    let auth_dyn: Arc<dyn AuthenticationProvider> = auth.clone();
    let turn = TurnCredentialProvider::new(TURN_SERVICE, Arc::new(transport.clone()))
        .expect("Invalid TURN service URI");
    assert!(turn.set_authentication_provider(auth_dyn.clone()));

    let mut config = test_config(OrchestratorMode::MultiPeer);
    config.webrtc.ice_configuration = "relay".to_owned();
    config.webrtc.turn_server.uri = "turn:turn.example.com:3478".to_owned();
    config.webrtc.turn_server.username = "static-user".to_owned();
    config.webrtc.turn_server.password = "static-pass".to_owned();

    let mut test = create_test_orchestrator_with(config, FakeSignalingClient::new(), |o| {
        o.with_turn_provider(turn).with_authentication(auth_dyn)
    });

    assert!(test.handle.connect("render").await);
    let ready = test
        .wait_for_event(|e| matches!(e, OrchestratorEvent::TurnCredentialsReady { .. }))
        .await;
    assert_eq!(ready, OrchestratorEvent::TurnCredentialsReady { success: true });
    test.wait_for_event(|e| matches!(e, OrchestratorEvent::SignedIn(_)))
        .await;

    // The token fetched for TURN is reused for signaling
    assert_eq!(auth.calls(), 1);
    assert_eq!(test.signaling.authorization().as_deref(), Some("Bearer tok"));
    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].header("Authorization"), Some("Bearer tok"));

    test.signaling
        .message_from(PeerId(7), offer_json("v=0 viewer"));
    test.wait_for_sent(1).await;

    let transport_config = test.factory.last_config().expect("No transport created");
    assert!(transport_config.relay_only);
    assert_eq!(
        transport_config.ice_servers[0].username.as_deref(),
        Some("turn-user")
    );
    assert_eq!(
        transport_config.ice_servers[0].credential.as_deref(),
        Some("turn-pass")
    );
}

#[tokio::test]
async fn test_turn_behind_failed_authentication_aborts_connect() {
    init_tracing();

    let transport = turn_service();
    let auth = Arc::new(ManualAuthProvider::new());
    let auth_dyn: Arc<dyn AuthenticationProvider> = auth.clone();
    let turn = TurnCredentialProvider::new(TURN_SERVICE, Arc::new(transport.clone()))
        .expect("Invalid TURN service URI");
    turn.set_authentication_provider(auth_dyn.clone());

    let mut test = create_test_orchestrator_with(
        test_config(OrchestratorMode::MultiPeer),
        FakeSignalingClient::new(),
        |o| o.with_turn_provider(turn).with_authentication(auth_dyn),
    );

    assert!(test.handle.connect("render").await);
    assert!(wait_until(EVENT_TIMEOUT_MS, || auth.is_running()).await);

    auth.complete(BearerToken::failed());
    test.wait_for_event(|e| matches!(e, OrchestratorEvent::ConnectFailed(_)))
        .await;

    assert_eq!(transport.connect_count(), 0);
    assert!(test.signaling.connects().is_empty());
}
