use crate::auth::{AuthEvent, AuthenticationProvider};
use crate::error::FlowError;
use crate::turn::TurnCredentialProvider;
use std::sync::Arc;
use streamgate_core::{BearerToken, TurnCredentials};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub(crate) struct Credentials {
    pub(crate) turn: Option<TurnCredentials>,
    pub(crate) token: Option<BearerToken>,
}

/// Доводит TURN и аутентификацию до конца перед входом на сигнальный сервер.
///
/// Провайдер TURN молчит, если аутентификация под ним не удалась, поэтому
/// события провайдера аутентификации слушаются параллельно.
pub(crate) async fn acquire_credentials(
    turn: Option<TurnCredentialProvider>,
    authentication: Option<Arc<dyn AuthenticationProvider>>,
) -> Result<Credentials, FlowError> {
    let mut credentials = Credentials::default();
    let mut auth_events = authentication.as_ref().map(|a| a.subscribe());

    if let Some(turn) = &turn {
        let mut turn_events = turn.subscribe();
        if !turn.request_credentials() {
            debug!("TURN request already running, waiting for its result");
        }

        let received = loop {
            tokio::select! {
                event = turn_events.recv() => match event {
                    Ok(received) => break received,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return Err(FlowError::EventsClosed),
                },
                event = next_auth_event(&mut auth_events) => match event {
                    Some(Ok(AuthEvent::Complete(token))) if !token.success => {
                        return Err(FlowError::AuthenticationFailed);
                    }
                    Some(Ok(AuthEvent::CodeReady(code))) => info!(
                        "Sign in at {} with code {}",
                        code.verification_url, code.user_code
                    ),
                    Some(Err(RecvError::Closed)) => auth_events = None,
                    _ => {}
                },
            }
        };
        credentials.token = turn.bearer_token();
        credentials.turn = Some(received);
    }

    if credentials.token.is_none() {
        if let Some(authentication) = &authentication {
            credentials.token = Some(authenticate(authentication.as_ref()).await?);
        }
    }
    Ok(credentials)
}

async fn authenticate(provider: &dyn AuthenticationProvider) -> Result<BearerToken, FlowError> {
    let mut events = provider.subscribe();
    if !provider.authenticate() {
        debug!("Authentication already running, waiting for its result");
    }

    loop {
        match events.recv().await {
            Ok(AuthEvent::Complete(token)) if token.success => return Ok(token),
            Ok(AuthEvent::Complete(_)) => return Err(FlowError::AuthenticationFailed),
            Ok(AuthEvent::CodeReady(code)) => info!(
                "Sign in at {} with code {}",
                code.verification_url, code.user_code
            ),
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return Err(FlowError::EventsClosed),
        }
    }
}

async fn next_auth_event(
    events: &mut Option<broadcast::Receiver<AuthEvent>>,
) -> Option<Result<AuthEvent, RecvError>> {
    match events {
        Some(events) => Some(events.recv().await),
        None => std::future::pending().await,
    }
}
