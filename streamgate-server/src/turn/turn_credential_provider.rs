use crate::auth::{AuthEvent, AuthenticationProvider};
use crate::error::{ConfigError, FlowError};
use crate::flow_state::FlowState;
use crate::net::{
    Endpoint, HttpRequest, HttpTextClient, Transport, connect_endpoint, resolve_endpoint,
};
use std::sync::{Arc, OnceLock};
use streamgate_core::{BearerToken, TurnCredentials};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    NotActive,
    Resolving,
    Authenticating,
    /// Запрос ушел на сервер, ждем ответ.
    Active,
}

/// Получает временные учетные данные TURN. Если подключен провайдер
/// аутентификации, сначала добывает у него bearer-токен и кэширует его.
#[derive(Clone)]
pub struct TurnCredentialProvider {
    inner: Arc<TurnFlow>,
}

struct TurnFlow {
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    authentication: OnceLock<Arc<dyn AuthenticationProvider>>,
    token: OnceLock<BearerToken>,
    state: FlowState<TurnState>,
    events: broadcast::Sender<TurnCredentials>,
}

impl TurnCredentialProvider {
    pub fn new(uri: &str, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        if uri.trim().is_empty() {
            return Err(ConfigError::EmptyField("turnServer.provider"));
        }

        let (events, _) = broadcast::channel(16);
        Ok(Self {
            inner: Arc::new(TurnFlow {
                endpoint: Endpoint::parse(uri)?,
                transport,
                authentication: OnceLock::new(),
                token: OnceLock::new(),
                state: FlowState::new(TurnState::NotActive),
                events,
            }),
        })
    }

    /// Подключает провайдер аутентификации. Повторный вызов игнорируется.
    pub fn set_authentication_provider(&self, provider: Arc<dyn AuthenticationProvider>) -> bool {
        self.inner.authentication.set(provider).is_ok()
    }

    pub fn request_credentials(&self) -> bool {
        let first = if self.inner.endpoint.is_unresolved() {
            TurnState::Resolving
        } else if self.inner.needs_token() {
            TurnState::Authenticating
        } else {
            TurnState::Active
        };

        if !self.inner.state.try_begin(first) {
            debug!("TURN credentials request already running ({:?})", self.state());
            return false;
        }

        let flow = self.inner.clone();
        tokio::spawn(async move { flow.run().await });
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TurnCredentials> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> TurnState {
        self.inner.state.get()
    }

    pub fn watch_state(&self) -> watch::Receiver<TurnState> {
        self.inner.state.watch()
    }

    /// Токен, полученный от провайдера аутентификации, если он уже есть.
    pub fn bearer_token(&self) -> Option<BearerToken> {
        self.inner.token.get().cloned()
    }
}

impl TurnFlow {
    fn needs_token(&self) -> bool {
        self.token.get().is_none() && self.authentication.get().is_some()
    }

    async fn run(self: Arc<Self>) {
        match self.execute().await {
            Ok(credentials) => {
                if credentials.success {
                    info!("TURN credentials received for {}", credentials.username);
                } else {
                    warn!("TURN service returned no usable credentials");
                }
                self.state.reset();
                let _ = self.events.send(credentials);
            }
            Err(e @ (FlowError::AuthenticationFailed | FlowError::EventsClosed)) => {
                warn!("TURN credentials not requested: {}", e);
                self.state.reset();
            }
            Err(e) => {
                warn!("TURN credentials request failed: {}", e);
                self.state.reset();
                let _ = self.events.send(TurnCredentials::failed());
            }
        }
    }

    async fn execute(&self) -> Result<TurnCredentials, FlowError> {
        let addr = resolve_endpoint(self.transport.as_ref(), &self.endpoint).await?;
        let token = self.bearer().await?;

        self.state.set(TurnState::Active);
        let stream = connect_endpoint(self.transport.as_ref(), &self.endpoint, addr).await?;
        let mut client = HttpTextClient::handshake(stream).await?;

        let request =
            HttpRequest::get(&self.endpoint).header("Authorization", format!("Bearer {token}"));
        let response = client.exchange(&request).await;
        client.close();
        let response = response?;

        debug!("TURN service answered {}", response.status());
        Ok(TurnCredentials::from_body(response.body()))
    }

    async fn bearer(&self) -> Result<String, FlowError> {
        if let Some(token) = self.token.get() {
            return Ok(token.token.clone());
        }
        let Some(provider) = self.authentication.get() else {
            return Ok(String::new());
        };

        self.state.set(TurnState::Authenticating);
        let mut events = provider.subscribe();
        if !provider.authenticate() {
            debug!("Authentication already in progress, waiting for its result");
        }

        loop {
            match events.recv().await {
                Ok(AuthEvent::Complete(token)) if token.success => {
                    let value = token.token.clone();
                    let _ = self.token.set(token);
                    return Ok(value);
                }
                Ok(AuthEvent::Complete(_)) => return Err(FlowError::AuthenticationFailed),
                Ok(AuthEvent::CodeReady(code)) => {
                    info!("Waiting for device code {} to be confirmed", code.user_code);
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Skipped {} authentication events", skipped);
                }
                Err(RecvError::Closed) => return Err(FlowError::EventsClosed),
            }
        }
    }
}
