use crate::auth::{AuthEvent, AuthenticationProvider, EVENT_CAPACITY};
use crate::error::{ConfigError, FlowError};
use crate::flow_state::FlowState;
use crate::net::{
    Endpoint, HttpRequest, HttpResponse, HttpTextClient, Transport, connect_endpoint,
    resolve_endpoint,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use streamgate_core::{BearerToken, DeviceCodeData};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Интервал опроса, если сервер не прислал свой.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCodeState {
    NotActive,
    ResolvingCodeHost,
    ResolvingPollHost,
    RequestingCode,
    ActiveCode,
    RequestingPoll,
    ActivePoll,
}

/// OAuth2 device-code flow: получить код, показать его пользователю и
/// опрашивать poll endpoint, пока вход не подтвердят.
#[derive(Clone)]
pub struct DeviceCodeProvider {
    inner: Arc<DeviceCodeFlow>,
}

struct DeviceCodeFlow {
    code_endpoint: Endpoint,
    poll_endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    state: FlowState<DeviceCodeState>,
    events: broadcast::Sender<AuthEvent>,
}

impl DeviceCodeProvider {
    pub fn new(
        code_uri: &str,
        poll_uri: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        if code_uri.trim().is_empty() {
            return Err(ConfigError::EmptyField("codeUri"));
        }
        if poll_uri.trim().is_empty() {
            return Err(ConfigError::EmptyField("pollUri"));
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(DeviceCodeFlow {
                code_endpoint: Endpoint::parse(code_uri)?,
                poll_endpoint: Endpoint::parse(poll_uri)?,
                transport,
                state: FlowState::new(DeviceCodeState::NotActive),
                events,
            }),
        })
    }

    pub fn state(&self) -> DeviceCodeState {
        self.inner.state.get()
    }

    pub fn watch_state(&self) -> watch::Receiver<DeviceCodeState> {
        self.inner.state.watch()
    }
}

impl AuthenticationProvider for DeviceCodeProvider {
    fn authenticate(&self) -> bool {
        let first = if self.inner.code_endpoint.is_unresolved() {
            DeviceCodeState::ResolvingCodeHost
        } else if self.inner.poll_endpoint.is_unresolved() {
            DeviceCodeState::ResolvingPollHost
        } else {
            DeviceCodeState::RequestingCode
        };

        if !self.inner.state.try_begin(first) {
            debug!("Device code flow already running ({:?})", self.state());
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

impl DeviceCodeFlow {
    async fn run(self: Arc<Self>) {
        let token = match self.execute().await {
            Ok(token) => {
                info!("Device code flow completed");
                BearerToken::granted(token)
            }
            Err(e) => {
                warn!("Device code flow failed: {}", e);
                BearerToken::failed()
            }
        };

        self.state.reset();
        let _ = self.events.send(AuthEvent::Complete(token));
    }

    async fn execute(&self) -> Result<String, FlowError> {
        let code_addr = resolve_endpoint(self.transport.as_ref(), &self.code_endpoint).await?;
        if self.poll_endpoint.is_unresolved() {
            self.state.set(DeviceCodeState::ResolvingPollHost);
        }
        let poll_addr = resolve_endpoint(self.transport.as_ref(), &self.poll_endpoint).await?;

        let code = self.request_code(code_addr).await?;
        info!(
            "Device code ready: enter {} at {}",
            code.user_code, code.verification_url
        );
        let _ = self.events.send(AuthEvent::CodeReady(code.clone()));

        let poll = self
            .poll_endpoint
            .with_query_pair("device_code", &code.device_code);
        let interval = match code.interval_seconds {
            0 => DEFAULT_POLL_INTERVAL,
            secs => Duration::from_secs(secs),
        };

        loop {
            let response = self
                .fetch(
                    &poll,
                    poll_addr,
                    DeviceCodeState::RequestingPoll,
                    DeviceCodeState::ActivePoll,
                )
                .await?;

            match response.status() {
                400 => {
                    debug!("Authorization pending, next poll in {:?}", interval);
                    self.state.set(DeviceCodeState::RequestingPoll);
                    tokio::time::sleep(interval).await;
                }
                200 => return access_code(response.body()),
                other => return Err(FlowError::UnexpectedStatus(other)),
            }
        }
    }

    async fn request_code(&self, addr: SocketAddr) -> Result<DeviceCodeData, FlowError> {
        let response = self
            .fetch(
                &self.code_endpoint,
                addr,
                DeviceCodeState::RequestingCode,
                DeviceCodeState::ActiveCode,
            )
            .await?;

        if !response.is_success() {
            return Err(FlowError::UnexpectedStatus(response.status()));
        }
        Ok(DeviceCodeData::from_body(response.body())?)
    }

    /// Один GET на свежем соединении; соединение закрывается сразу после ответа.
    async fn fetch(
        &self,
        endpoint: &Endpoint,
        addr: SocketAddr,
        requesting: DeviceCodeState,
        reading: DeviceCodeState,
    ) -> Result<HttpResponse, FlowError> {
        self.state.set(requesting);
        let stream = connect_endpoint(self.transport.as_ref(), endpoint, addr).await?;
        let mut client = HttpTextClient::handshake(stream).await?;

        self.state.set(reading);
        let response = client.exchange(&HttpRequest::get(endpoint)).await;
        client.close();
        Ok(response?)
    }
}

fn access_code(body: &str) -> Result<String, FlowError> {
    let value: Value = serde_json::from_str(body)?;
    match value.get("access_code").and_then(Value::as_str) {
        Some(token) if !token.is_empty() => Ok(token.to_owned()),
        _ => Err(FlowError::EmptyToken),
    }
}
