use crate::error::FlowError;
use crate::flow_state::FlowState;
use crate::net::{
    Endpoint, HttpRequest, HttpResponse, HttpTextClient, Transport, connect_endpoint,
    resolve_endpoint,
};
use crate::signaling::{SignalingClient, SignalingEvent};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::time::Duration;
use streamgate_core::PeerId;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, warn};

/// Пауза перед повтором упавшего `/wait`.
pub const WAIT_RETRY_DELAY: Duration = Duration::from_secs(2);

const NO_ID: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    NotConnected,
    SigningIn,
    Connected,
    SigningOut,
}

#[derive(Clone)]
struct RelayServer {
    endpoint: Endpoint,
    addr: SocketAddr,
}

/// Клиент сигнального сервера с long-polling протоколом:
/// `/sign_in`, `/wait`, `/message`, `/sign_out`, `/heartbeat`, `/capacity`.
///
/// Свой id и отправитель каждого сообщения приходят в заголовке `Pragma`,
/// список пиров передается строками `name,id,connected`.
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    transport: Arc<dyn Transport>,
    events: mpsc::UnboundedSender<SignalingEvent>,
    state: FlowState<RelayState>,
    server: watch::Sender<Option<RelayServer>>,
    authorization: watch::Sender<String>,
    my_id: AtomicI32,
    sending: AtomicBool,
    peers: DashMap<PeerId, String>,
    heartbeat: Option<Duration>,
    capacity: AtomicU32,
    capacity_updates: Mutex<()>,
}

impl RelayClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        heartbeat: Option<Duration>,
    ) -> (Self, mpsc::UnboundedReceiver<SignalingEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (server, _) = watch::channel(None);
        let (authorization, _) = watch::channel(String::new());

        let client = Self {
            inner: Arc::new(RelayInner {
                transport,
                events,
                state: FlowState::new(RelayState::NotConnected),
                server,
                authorization,
                my_id: AtomicI32::new(NO_ID),
                sending: AtomicBool::new(false),
                peers: DashMap::new(),
                heartbeat: heartbeat.filter(|period| !period.is_zero()),
                capacity: AtomicU32::new(0),
                capacity_updates: Mutex::new(()),
            }),
        };
        (client, events_rx)
    }

    pub fn state(&self) -> RelayState {
        self.inner.state.get()
    }
}

impl SignalingClient for RelayClient {
    fn connect(&self, server: &str, port: u16, client_name: &str) {
        if !self.inner.state.try_begin(RelayState::SigningIn) {
            warn!("Already connected or connecting to the signaling server");
            return;
        }

        let inner = self.inner.clone();
        let server = server.to_owned();
        let name = client_name.to_owned();
        tokio::spawn(async move { inner.sign_in(server, port, name).await });
    }

    fn send_to_peer(&self, peer_id: PeerId, message: &str) -> bool {
        if self.inner.state.get() != RelayState::Connected {
            return false;
        }
        let Some(me) = self.inner.my_id() else {
            return false;
        };
        if self.inner.sending.swap(true, Ordering::SeqCst) {
            return false;
        }

        let inner = self.inner.clone();
        let body = message.to_owned();
        tokio::spawn(async move {
            let target = format!("/message?peer_id={me}&to={peer_id}");
            let success = match inner.request(&target, Some(body)).await {
                Ok(response) => response.is_success(),
                Err(e) => {
                    warn!("Failed to send message to peer {}: {}", peer_id, e);
                    false
                }
            };
            inner.sending.store(false, Ordering::SeqCst);
            let _ = inner.events.send(SignalingEvent::MessageSent { success });
        });
        true
    }

    fn is_sending_message(&self) -> bool {
        self.inner.sending.load(Ordering::SeqCst)
    }

    fn sign_out(&self) -> bool {
        if self
            .inner
            .state
            .advance(RelayState::SigningIn, RelayState::NotConnected)
        {
            debug!("Sign-in abandoned");
            return false;
        }
        if !self
            .inner
            .state
            .advance(RelayState::Connected, RelayState::SigningOut)
        {
            return false;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.finish_sign_out().await });
        true
    }

    fn update_capacity(&self, value: u32) -> bool {
        if self.inner.state.get() != RelayState::Connected {
            return false;
        }
        self.inner.capacity.store(value, Ordering::SeqCst);

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.push_capacity().await });
        true
    }

    fn set_authorization(&self, value: &str) {
        self.inner.authorization.send_replace(value.to_owned());
    }

    fn is_connected(&self) -> bool {
        self.inner.state.get() == RelayState::Connected
    }

    fn id(&self) -> Option<PeerId> {
        self.inner.my_id()
    }

    fn peers(&self) -> Vec<(PeerId, String)> {
        let mut peers: Vec<_> = self
            .inner
            .peers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        peers.sort_by_key(|(id, _)| *id);
        peers
    }
}

impl RelayInner {
    fn my_id(&self) -> Option<PeerId> {
        match self.my_id.load(Ordering::SeqCst) {
            NO_ID => None,
            id => Some(PeerId(id)),
        }
    }

    async fn sign_in(self: Arc<Self>, server: String, port: u16, name: String) {
        let roster = match self.try_sign_in(&server, port, &name).await {
            Ok(roster) => roster,
            Err(e) => {
                warn!("Failed to sign in to {}:{}: {}", server, port, e);
                self.state
                    .advance(RelayState::SigningIn, RelayState::NotConnected);
                let _ = self.events.send(SignalingEvent::ServerConnectionFailure);
                return;
            }
        };

        if !self.state.advance(RelayState::SigningIn, RelayState::Connected) {
            debug!("Sign-in to {} finished after it was abandoned", server);
            return;
        }
        let Some(id) = self.my_id() else {
            return;
        };
        info!("Signed in to {}:{} as {} (id {})", server, port, name, id);

        let _ = self.events.send(SignalingEvent::SignedIn { id });
        for (id, name) in roster {
            let _ = self.events.send(SignalingEvent::PeerConnected { id, name });
        }

        tokio::spawn(self.clone().wait_loop());
        if let Some(period) = self.heartbeat {
            tokio::spawn(self.clone().heartbeat_loop(period));
        }
    }

    async fn try_sign_in(
        &self,
        server: &str,
        port: u16,
        name: &str,
    ) -> Result<Vec<(PeerId, String)>, FlowError> {
        let endpoint = Endpoint::from_host_port(server, port)?;
        let addr = resolve_endpoint(self.transport.as_ref(), &endpoint).await?;
        self.server.send_replace(Some(RelayServer { endpoint, addr }));

        let encoded: String = url::form_urlencoded::byte_serialize(name.as_bytes()).collect();
        let response = self.request(&format!("/sign_in?{encoded}"), None).await?;
        if !response.is_success() {
            return Err(FlowError::UnexpectedStatus(response.status()));
        }

        let me = pragma_peer(&response).ok_or(FlowError::MissingPeerId)?;
        self.my_id.store(me.0, Ordering::SeqCst);
        self.peers.clear();

        let mut roster = Vec::new();
        for (name, id, connected) in response.body().lines().filter_map(parse_peer_line) {
            if id == me || !connected {
                continue;
            }
            self.peers.insert(id, name.clone());
            roster.push((id, name));
        }
        Ok(roster)
    }

    async fn wait_loop(self: Arc<Self>) {
        let mut state = self.state.watch();

        while self.state.get() == RelayState::Connected {
            let Some(me) = self.my_id() else {
                break;
            };
            let target = format!("/wait?peer_id={me}");

            let result = tokio::select! {
                result = self.request(&target, None) => result,
                _ = left_connected(&mut state) => break,
            };

            match result {
                Ok(response) if response.is_success() => self.dispatch_wait(me, &response),
                Ok(response) => {
                    warn!("Signaling wait answered {}", response.status());
                    tokio::time::sleep(WAIT_RETRY_DELAY).await;
                }
                Err(e) => {
                    warn!("Signaling wait failed: {}", e);
                    tokio::time::sleep(WAIT_RETRY_DELAY).await;
                }
            }
        }
        debug!("Signaling wait loop stopped");
    }

    fn dispatch_wait(&self, me: PeerId, response: &HttpResponse) {
        let Some(sender) = pragma_peer(response) else {
            warn!("Wait response without sender id");
            return;
        };

        if sender != me {
            let _ = self.events.send(SignalingEvent::MessageFromPeer {
                id: sender,
                message: response.body().to_owned(),
            });
            return;
        }

        for (name, id, connected) in response.body().lines().filter_map(parse_peer_line) {
            if id == me {
                continue;
            }
            if connected {
                if self.peers.insert(id, name.clone()).is_none() {
                    let _ = self.events.send(SignalingEvent::PeerConnected { id, name });
                }
            } else if self.peers.remove(&id).is_some() {
                let _ = self.events.send(SignalingEvent::PeerDisconnected { id });
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>, period: Duration) {
        let mut state = self.state.watch();
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = left_connected(&mut state) => break,
            }
            let Some(me) = self.my_id() else {
                break;
            };
            if let Err(e) = self.request(&format!("/heartbeat?peer_id={me}"), None).await {
                warn!("Heartbeat failed: {}", e);
            }
        }
    }

    /// Отправляет последнее значение емкости. Запросы идут по одному,
    /// поэтому последним на сервер приходит самое свежее значение.
    async fn push_capacity(&self) {
        let _guard = self.capacity_updates.lock().await;
        let Some(me) = self.my_id() else {
            return;
        };
        let value = self.capacity.load(Ordering::SeqCst);
        let target = format!("/capacity?peer_id={me}&value={value}");
        match self.send(&target, HttpRequest::put).await {
            Ok(response) if response.is_success() => debug!("Capacity {} reported", value),
            Ok(response) => warn!("Capacity update rejected: {}", response.status()),
            Err(e) => warn!("Capacity update failed: {}", e),
        }
    }

    async fn finish_sign_out(&self) {
        if let Some(me) = self.my_id() {
            if let Err(e) = self.request(&format!("/sign_out?peer_id={me}"), None).await {
                warn!("Sign-out request failed: {}", e);
            }
        }

        self.peers.clear();
        self.my_id.store(NO_ID, Ordering::SeqCst);
        self.state.reset();
        info!("Signed out of the signaling server");
        let _ = self.events.send(SignalingEvent::Disconnected);
    }

    /// GET, а с телом POST `text/plain`.
    async fn request(&self, target: &str, body: Option<String>) -> Result<HttpResponse, FlowError> {
        self.send(target, |endpoint| match body {
            Some(body) => HttpRequest::post(endpoint, "text/plain", body),
            None => HttpRequest::get(endpoint),
        })
        .await
    }

    async fn send(
        &self,
        target: &str,
        build: impl FnOnce(&Endpoint) -> HttpRequest,
    ) -> Result<HttpResponse, FlowError> {
        let server = self.server.borrow().clone();
        let Some(server) = server else {
            return Err(FlowError::NotConnected);
        };

        let mut request = build(&server.endpoint).with_target(target);
        let authorization = self.authorization.borrow().clone();
        if !authorization.is_empty() {
            request = request.header("Authorization", authorization);
        }

        let stream = connect_endpoint(self.transport.as_ref(), &server.endpoint, server.addr).await?;
        let mut client = HttpTextClient::handshake(stream).await?;
        let response = client.exchange(&request).await;
        client.close();
        Ok(response?)
    }
}

async fn left_connected(state: &mut watch::Receiver<RelayState>) {
    let _ = state.wait_for(|s| *s != RelayState::Connected).await;
}

fn pragma_peer(response: &HttpResponse) -> Option<PeerId> {
    response.header("Pragma")?.parse().ok()
}

/// Строка списка пиров: `name,id,connected`.
fn parse_peer_line(line: &str) -> Option<(String, PeerId, bool)> {
    let mut parts = line.trim().split(',');
    let name = parts.next()?.trim();
    if name.is_empty() {
        return None;
    }
    let id = parts.next()?.parse().ok()?;
    let connected = parts.next()?.trim() != "0";
    Some((name.to_owned(), id, connected))
}
