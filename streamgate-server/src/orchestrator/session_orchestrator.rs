use crate::auth::AuthenticationProvider;
use crate::config::WebRtcConfig;
use crate::orchestrator::bootstrap::{Credentials, acquire_credentials};
use crate::orchestrator::{
    DataChannelHandler, OrchestratorCommand, OrchestratorEvent, OrchestratorHandle,
    OrchestratorSnapshot, SessionSnapshot,
};
use crate::session::{NegotiationState, PeerSession, SessionLinks};
use crate::signaling::{SignalingClient, SignalingEvent};
use crate::transport::{
    PeerTransportEvent, PeerTransportFactory, RtcTransportFactory, StampedTransportEvent,
    TransportConfig, VideoSource,
};
use crate::turn::TurnCredentialProvider;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use streamgate_core::{HANG_UP_MESSAGE, OutboundEnvelope, PeerId};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Пауза перед повторной попыткой отправить голову очереди.
pub const SEND_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorMode {
    /// Много зрителей. Неудачная отправка остается в голове очереди и
    /// повторяется по таймеру.
    MultiPeer,
    /// Один собеседник. Неудачная отправка означает выход с сервера.
    SinglePeer,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub mode: OrchestratorMode,
    pub webrtc: WebRtcConfig,
    pub retry_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mode: OrchestratorMode::MultiPeer,
            webrtc: WebRtcConfig::default(),
            retry_delay: SEND_RETRY_DELAY,
        }
    }
}

enum InternalEvent {
    RetryDrain,
    CredentialsAcquired {
        display_name: String,
        credentials: Credentials,
    },
    CredentialsFailed(String),
}

/// Единственный владелец соединения с сигнальным сервером.
///
/// Все события (команды, сигнальный сервер, peer connection, исходящие
/// сообщения сессий, таймеры) обрабатываются по одному в `run`, поэтому
/// карта сессий и очередь живут без блокировок.
pub struct SessionOrchestrator {
    config: OrchestratorConfig,
    signaling: Arc<dyn SignalingClient>,
    signaling_rx: mpsc::UnboundedReceiver<SignalingEvent>,
    command_rx: mpsc::Receiver<OrchestratorCommand>,
    transport_rx: mpsc::Receiver<StampedTransportEvent>,
    transport_tx: mpsc::Sender<StampedTransportEvent>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundEnvelope>,
    outbound_tx: mpsc::UnboundedSender<OutboundEnvelope>,
    internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    events: broadcast::Sender<OrchestratorEvent>,

    factory: Arc<dyn PeerTransportFactory>,
    transport_config: TransportConfig,
    authentication: Option<Arc<dyn AuthenticationProvider>>,
    turn: Option<TurnCredentialProvider>,
    video_source: Option<Arc<dyn VideoSource>>,
    data_handler: Option<Arc<dyn DataChannelHandler>>,

    sessions: HashMap<PeerId, PeerSession>,
    next_generation: u64,
    /// Зрители, уже вычтенные из емкости.
    counted_viewers: HashSet<PeerId>,
    peers: HashMap<PeerId, String>,
    queue: VecDeque<OutboundEnvelope>,
    in_flight: Option<OutboundEnvelope>,
    partner: Option<PeerId>,
    retry_scheduled: bool,
    connecting: bool,
}

impl SessionOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        signaling: Arc<dyn SignalingClient>,
        signaling_rx: mpsc::UnboundedReceiver<SignalingEvent>,
    ) -> (Self, OrchestratorHandle) {
        let (command_tx, command_rx) = mpsc::channel(100);
        let (transport_tx, transport_rx) = mpsc::channel(256);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);

        let transport_config = TransportConfig::from_webrtc(&config.webrtc, None);
        let handle = OrchestratorHandle::new(command_tx, events.clone());

        let orchestrator = Self {
            config,
            signaling,
            signaling_rx,
            command_rx,
            transport_rx,
            transport_tx,
            outbound_rx,
            outbound_tx,
            internal_rx,
            internal_tx,
            events,
            factory: Arc::new(RtcTransportFactory),
            transport_config,
            authentication: None,
            turn: None,
            video_source: None,
            data_handler: None,
            sessions: HashMap::new(),
            next_generation: 0,
            counted_viewers: HashSet::new(),
            peers: HashMap::new(),
            queue: VecDeque::new(),
            in_flight: None,
            partner: None,
            retry_scheduled: false,
            connecting: false,
        };
        (orchestrator, handle)
    }

    pub fn with_transport_factory(mut self, factory: Arc<dyn PeerTransportFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_authentication(mut self, provider: Arc<dyn AuthenticationProvider>) -> Self {
        self.authentication = Some(provider);
        self
    }

    pub fn with_turn_provider(mut self, provider: TurnCredentialProvider) -> Self {
        self.turn = Some(provider);
        self
    }

    pub fn with_video_source(mut self, source: Arc<dyn VideoSource>) -> Self {
        self.video_source = Some(source);
        self
    }

    pub fn with_data_channel_handler(mut self, handler: Arc<dyn DataChannelHandler>) -> Self {
        self.data_handler = Some(handler);
        self
    }

    pub async fn run(mut self) {
        info!("Orchestrator event loop started ({:?})", self.config.mode);

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(c) => {
                            if !self.handle_command(c).await {
                                break;
                            }
                        }
                        None => {
                            info!("Command channel closed. Shutting down orchestrator.");
                            self.close().await;
                            break;
                        }
                    }
                }

                evt = self.signaling_rx.recv() => {
                    match evt {
                        Some(e) => self.handle_signaling_event(e).await,
                        None => {
                            warn!("Signaling channel closed unexpectedly");
                            self.close().await;
                            break;
                        }
                    }
                }

                Some(evt) = self.transport_rx.recv() => self.handle_transport_event(evt).await,

                Some(envelope) = self.outbound_rx.recv() => {
                    self.queue.push_back(envelope);
                    self.drain();
                }

                Some(evt) = self.internal_rx.recv() => self.handle_internal_event(evt).await,
            }
        }

        info!("Orchestrator event loop finished");
    }

    /// `false` значит, что цикл пора остановить.
    async fn handle_command(&mut self, cmd: OrchestratorCommand) -> bool {
        match cmd {
            OrchestratorCommand::Connect { display_name } => self.connect(display_name),

            OrchestratorCommand::ConnectToPeer { peer_id } => self.connect_to_peer(peer_id).await,

            OrchestratorCommand::DisconnectFromCurrentPeer => {
                self.disconnect_from_current_peer().await
            }

            OrchestratorCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }

            OrchestratorCommand::Close { done } => {
                self.close().await;
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    async fn connect_to_peer(&mut self, peer_id: PeerId) {
        if self.config.mode == OrchestratorMode::SinglePeer {
            if let Some(partner) = self.partner.filter(|p| *p != peer_id) {
                warn!("Already talking to {}, not calling {}", partner, peer_id);
                return;
            }
            self.partner = Some(peer_id);
        }
        if self.sessions.contains_key(&peer_id) {
            warn!("Session with {} already exists", peer_id);
            return;
        }

        let session = self.ensure_session(peer_id);
        if let Err(e) = session.start_offer().await {
            error!("Failed to start session with {}: {:?}", peer_id, e);
            self.remove_session(peer_id).await;
            return;
        }
        self.notify_state(peer_id);
    }

    /// Отправляет собеседнику `BYE` и закрывает сессию с ним.
    async fn disconnect_from_current_peer(&mut self) {
        let Some(partner) = self.partner.take() else {
            debug!("No current peer to disconnect from");
            return;
        };
        info!("Hanging up on {}", partner);
        self.queue
            .push_back(OutboundEnvelope::new(partner, HANG_UP_MESSAGE));
        self.remove_session(partner).await;
        self.drain();
    }

    fn connect(&mut self, display_name: String) {
        if self.connecting || self.signaling.is_connected() {
            warn!("Already connected or connecting, ignoring connect request");
            return;
        }
        self.connecting = true;

        if self.turn.is_none() && self.authentication.is_none() {
            self.sign_in(&display_name);
            return;
        }

        let turn = self.turn.clone();
        let authentication = self.authentication.clone();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let event = match acquire_credentials(turn, authentication).await {
                Ok(credentials) => InternalEvent::CredentialsAcquired {
                    display_name,
                    credentials,
                },
                Err(e) => InternalEvent::CredentialsFailed(e.to_string()),
            };
            let _ = internal_tx.send(event);
        });
    }

    fn sign_in(&mut self, display_name: &str) {
        let webrtc = &self.config.webrtc;
        info!(
            "Signing in to {}:{} as {}",
            webrtc.server, webrtc.port, display_name
        );
        self.signaling
            .connect(&webrtc.server, webrtc.port, display_name);
    }

    async fn handle_internal_event(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::RetryDrain => {
                self.retry_scheduled = false;
                self.drain();
            }

            InternalEvent::CredentialsAcquired {
                display_name,
                credentials,
            } => {
                if !self.connecting {
                    return;
                }
                if let Some(turn) = &credentials.turn {
                    if !turn.success {
                        warn!("No TURN credentials, continuing with configured ICE servers");
                    }
                    self.transport_config =
                        TransportConfig::from_webrtc(&self.config.webrtc, Some(turn));
                    self.emit(OrchestratorEvent::TurnCredentialsReady {
                        success: turn.success,
                    });
                }
                if let Some(token) = credentials.token.filter(|t| t.success) {
                    self.signaling
                        .set_authorization(&token.authorization_value());
                }
                self.sign_in(&display_name);
            }

            InternalEvent::CredentialsFailed(reason) => {
                error!("Not signing in: {}", reason);
                self.connecting = false;
                self.emit(OrchestratorEvent::ConnectFailed(reason));
            }
        }
    }

    async fn handle_signaling_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::SignedIn { id } => {
                info!("Signed in as {}", id);
                self.connecting = false;
                self.emit(OrchestratorEvent::SignedIn(id));
                self.publish_capacity();
                self.drain();
            }

            SignalingEvent::Disconnected => {
                info!("Disconnected from the signaling server");
                self.connecting = false;
                self.close_all_sessions().await;
                self.peers.clear();
                self.queue.clear();
                self.in_flight = None;
                self.partner = None;
                self.emit(OrchestratorEvent::SignedOut);
            }

            SignalingEvent::PeerConnected { id, name } => {
                debug!("Peer {} ({}) connected", id, name);
                self.peers.insert(id, name.clone());
                self.emit(OrchestratorEvent::PeerConnected(id, name));
            }

            SignalingEvent::PeerDisconnected { id } => {
                info!("Peer {} disconnected", id);
                self.peers.remove(&id);
                self.remove_session(id).await;
                self.emit(OrchestratorEvent::PeerDisconnected(id));

                if self.config.mode == OrchestratorMode::SinglePeer && self.partner == Some(id) {
                    info!("Our peer {} left, signing out", id);
                    self.partner = None;
                    self.close_all_sessions().await;
                    self.signaling.sign_out();
                }
            }

            SignalingEvent::MessageFromPeer { id, message } => {
                self.handle_peer_message(id, message).await;
            }

            SignalingEvent::MessageSent { success } => self.on_message_sent(success).await,

            SignalingEvent::ServerConnectionFailure => {
                error!("Failed to connect to the signaling server");
                self.connecting = false;
                self.emit(OrchestratorEvent::ConnectFailed(
                    "signaling server unreachable".to_owned(),
                ));
            }
        }
    }

    async fn handle_peer_message(&mut self, id: PeerId, message: String) {
        if self.config.mode == OrchestratorMode::SinglePeer {
            match self.partner {
                Some(partner) if partner != id => {
                    warn!("Ignoring message from {} while talking to {}", id, partner);
                    return;
                }
                Some(_) => {}
                None if message == HANG_UP_MESSAGE => return,
                None => self.partner = Some(id),
            }
        }

        if message == HANG_UP_MESSAGE {
            info!("Peer {} hung up", id);
            self.remove_session(id).await;
            if self.partner == Some(id) {
                self.partner = None;
            }
            return;
        }

        let session = self.ensure_session(id);
        let before = session.state();
        session.handle_message(&message).await;
        if session.state() != before {
            self.notify_state(id);
        }
    }

    async fn handle_transport_event(&mut self, stamped: StampedTransportEvent) {
        let StampedTransportEvent { generation, event } = stamped;
        let peer_id = event.peer_id();
        let current = self.sessions.get(&peer_id).map(PeerSession::generation);
        if current != Some(generation) {
            debug!(
                "Dropping event from a closed connection to {} (generation {})",
                peer_id, generation
            );
            return;
        }

        match event {
            PeerTransportEvent::LocalCandidate(peer_id, candidate) => {
                let Some(session) = self.sessions.get(&peer_id) else {
                    return;
                };
                session.on_local_candidate(candidate);
            }

            PeerTransportEvent::IceStateChanged(peer_id, state) => {
                let Some(session) = self.sessions.get_mut(&peer_id) else {
                    return;
                };
                let before = session.state();
                let after = session.on_ice_state(state);
                if after != before {
                    self.notify_state(peer_id);
                }
                self.emit(OrchestratorEvent::IceStateChanged(peer_id, state));

                if after == NegotiationState::Connected
                    && self.counts_capacity()
                    && self.counted_viewers.insert(peer_id)
                {
                    self.publish_capacity();
                }

                if self.config.mode == OrchestratorMode::MultiPeer && state.is_terminal() {
                    info!("Peer {} lost ICE connectivity ({:?})", peer_id, state);
                    self.remove_session(peer_id).await;
                }
            }

            PeerTransportEvent::DataChannelMessage(peer_id, text) => {
                let Some(handler) = &self.data_handler else {
                    debug!("No data channel handler, dropping message from {}", peer_id);
                    return;
                };
                handler.on_data_channel_message(peer_id, text).await;
            }
        }
    }

    /// Отправляет голову очереди, если сейчас ничего не отправляется.
    fn drain(&mut self) {
        if self.in_flight.is_some() || self.queue.is_empty() {
            return;
        }
        if !self.signaling.is_connected() {
            return;
        }
        if self.signaling.is_sending_message() {
            // Чужая отправка, например оставшаяся от прошлого входа.
            debug!("Signaling client is busy, retrying later");
            self.schedule_retry();
            return;
        }
        let Some(envelope) = self.queue.pop_front() else {
            return;
        };

        if self
            .signaling
            .send_to_peer(envelope.target_peer, &envelope.payload)
        {
            debug!("Sending message to {}", envelope.target_peer);
            self.in_flight = Some(envelope);
            return;
        }

        match self.config.mode {
            OrchestratorMode::MultiPeer => {
                debug!("Send to {} not started, retrying", envelope.target_peer);
                self.queue.push_front(envelope);
                self.schedule_retry();
            }
            OrchestratorMode::SinglePeer => {
                error!("Failed to send message to {}", envelope.target_peer);
                self.fail_stop();
            }
        }
    }

    async fn on_message_sent(&mut self, success: bool) {
        let Some(envelope) = self.in_flight.take() else {
            self.drain();
            return;
        };

        if success {
            self.drain();
            return;
        }

        match self.config.mode {
            OrchestratorMode::MultiPeer => {
                warn!("Send to {} failed, will retry", envelope.target_peer);
                self.queue.push_front(envelope);
                self.schedule_retry();
            }
            OrchestratorMode::SinglePeer => {
                error!("Send to {} failed", envelope.target_peer);
                self.fail_stop();
            }
        }
    }

    fn fail_stop(&mut self) {
        self.queue.clear();
        self.signaling.sign_out();
    }

    fn schedule_retry(&mut self) {
        if self.retry_scheduled {
            return;
        }
        self.retry_scheduled = true;

        let internal_tx = self.internal_tx.clone();
        let delay = self.config.retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal_tx.send(InternalEvent::RetryDrain);
        });
    }

    /// Единственное место, где создаются сессии.
    fn ensure_session(&mut self, id: PeerId) -> &mut PeerSession {
        if !self.sessions.contains_key(&id) {
            self.next_generation += 1;
        }
        let generation = self.next_generation;
        let name = self.peers.get(&id).cloned().unwrap_or_default();
        let links = self.session_links();
        self.sessions.entry(id).or_insert_with(|| {
            debug!("Creating session for peer {} (generation {})", id, generation);
            PeerSession::new(id, name, generation, links)
        })
    }

    fn session_links(&self) -> SessionLinks {
        SessionLinks {
            factory: self.factory.clone(),
            transport_config: self.transport_config.clone(),
            transport_events: self.transport_tx.clone(),
            outbound: self.outbound_tx.clone(),
            video_source: self.video_source.clone(),
        }
    }

    async fn remove_session(&mut self, id: PeerId) {
        let Some(mut session) = self.sessions.remove(&id) else {
            return;
        };
        session.close().await;
        self.emit(OrchestratorEvent::SessionClosed(id));
        if self.counted_viewers.remove(&id) {
            self.publish_capacity();
        }
    }

    async fn close_all_sessions(&mut self) {
        self.counted_viewers.clear();
        let mut sessions: Vec<PeerSession> = self.sessions.drain().map(|(_, s)| s).collect();
        futures::future::join_all(sessions.iter_mut().map(|s| s.close())).await;
        for session in &sessions {
            self.emit(OrchestratorEvent::SessionClosed(session.id()));
        }
    }

    async fn close(&mut self) {
        info!("Closing orchestrator");
        if self.signaling.is_connected() || self.connecting {
            self.signaling.sign_out();
        }
        self.connecting = false;
        self.close_all_sessions().await;
        self.queue.clear();
        self.in_flight = None;
        self.partner = None;
        self.emit(OrchestratorEvent::SignedOut);
    }

    fn counts_capacity(&self) -> bool {
        self.config.mode == OrchestratorMode::MultiPeer && self.config.webrtc.capacity > 0
    }

    /// Сообщает серверу, сколько зрителей еще можно принять.
    fn publish_capacity(&self) {
        if !self.counts_capacity() {
            return;
        }
        let used = u32::try_from(self.counted_viewers.len()).unwrap_or(u32::MAX);
        let remaining = self.config.webrtc.capacity.saturating_sub(used);
        debug!("Reporting capacity {}", remaining);
        self.signaling.update_capacity(remaining);
    }

    fn notify_state(&self, id: PeerId) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        self.emit(OrchestratorEvent::SessionStateChanged(id, session.state()));
    }

    fn snapshot(&self) -> OrchestratorSnapshot {
        let mut sessions: Vec<SessionSnapshot> = self
            .sessions
            .values()
            .map(|s| SessionSnapshot {
                id: s.id(),
                name: s.name().to_owned(),
                state: s.state(),
                has_remote_description: s.remote_description().is_some(),
                pending_candidates: s.pending_candidates().len(),
            })
            .collect();
        sessions.sort_by_key(|s| s.id);

        let mut peers: Vec<(PeerId, String)> =
            self.peers.iter().map(|(id, name)| (*id, name.clone())).collect();
        peers.sort_by_key(|(id, _)| *id);

        OrchestratorSnapshot {
            signed_in: self.signaling.is_connected(),
            own_id: self.signaling.id(),
            peers,
            sessions,
            queued: self.queue.iter().cloned().collect(),
            in_flight: self.in_flight.clone(),
            partner: self.partner,
        }
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.events.send(event);
    }
}
