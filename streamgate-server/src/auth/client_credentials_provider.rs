use crate::auth::{AuthEvent, AuthenticationProvider, EVENT_CAPACITY};
use crate::error::{ConfigError, FlowError};
use crate::flow_state::FlowState;
use crate::net::{
    Endpoint, HttpRequest, HttpTextClient, Transport, connect_endpoint, resolve_endpoint,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use streamgate_core::BearerToken;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientCredentialsConfig {
    pub authority: String,
    pub client_id: String,
    pub client_secret: String,
    pub resource: String,
}

impl ClientCredentialsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.authority.trim().is_empty() {
            return Err(ConfigError::EmptyField("authority"));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::EmptyField("clientId"));
        }
        if self.client_secret.trim().is_empty() {
            return Err(ConfigError::EmptyField("clientSecret"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCredentialsState {
    NotActive,
    Resolving,
    Active,
}

/// OAuth2 client-credentials: один POST на authority, в ответе `access_token`.
#[derive(Clone)]
pub struct ClientCredentialsProvider {
    inner: Arc<ClientCredentialsFlow>,
}

struct ClientCredentialsFlow {
    config: ClientCredentialsConfig,
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    state: FlowState<ClientCredentialsState>,
    events: broadcast::Sender<AuthEvent>,
}

impl ClientCredentialsProvider {
    pub fn new(
        config: ClientCredentialsConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let endpoint = Endpoint::parse(&config.authority)?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(ClientCredentialsFlow {
                config,
                endpoint,
                transport,
                state: FlowState::new(ClientCredentialsState::NotActive),
                events,
            }),
        })
    }

    pub fn state(&self) -> ClientCredentialsState {
        self.inner.state.get()
    }

    pub fn watch_state(&self) -> watch::Receiver<ClientCredentialsState> {
        self.inner.state.watch()
    }
}

impl AuthenticationProvider for ClientCredentialsProvider {
    fn authenticate(&self) -> bool {
        let first = if self.inner.endpoint.is_unresolved() {
            ClientCredentialsState::Resolving
        } else {
            ClientCredentialsState::Active
        };

        if !self.inner.state.try_begin(first) {
            debug!("Client credentials flow already running");
            return false;
        }

        let flow = self.inner.clone();
        tokio::spawn(async move { flow.run().await });
        true
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }
}

impl ClientCredentialsFlow {
    async fn run(self: Arc<Self>) {
        let token = match self.execute().await {
            Ok(token) => {
                info!("Client credentials granted for {}", self.config.client_id);
                BearerToken::granted(token)
            }
            Err(e) => {
                warn!("Client credentials flow failed: {}", e);
                BearerToken::failed()
            }
        };

        self.state.reset();
        let _ = self.events.send(AuthEvent::Complete(token));
    }

    async fn execute(&self) -> Result<String, FlowError> {
        let addr = resolve_endpoint(self.transport.as_ref(), &self.endpoint).await?;

        self.state.set(ClientCredentialsState::Active);
        let stream = connect_endpoint(self.transport.as_ref(), &self.endpoint, addr).await?;
        let mut client = HttpTextClient::handshake(stream).await?;

        let request = HttpRequest::post_form(
            &self.endpoint,
            &[
                ("grant_type", "client_credentials"),
                ("client_id", &self.config.client_id),
                ("client_secret", &self.config.client_secret),
                ("resource", &self.config.resource),
            ],
        );
        let response = client.exchange(&request).await;
        client.close();
        let response = response?;

        if !response.is_success() {
            return Err(FlowError::UnexpectedStatus(response.status()));
        }

        let value: Value = serde_json::from_str(response.body())?;
        match value.get("access_token").and_then(Value::as_str) {
            Some(token) if !token.is_empty() => Ok(token.to_owned()),
            _ => Err(FlowError::EmptyToken),
        }
    }
}
