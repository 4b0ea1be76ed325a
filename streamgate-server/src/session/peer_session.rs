use crate::transport::{
    PeerTransport, PeerTransportFactory, StampedTransportEvent, TransportConfig,
    TransportEventSink, VideoSource,
};
use anyhow::{Result, bail};
use std::sync::Arc;
use streamgate_core::{
    IceCandidate, IceConnectionState, OutboundEnvelope, PeerId, PeerMessage, PeerMessageError,
    SdpType, SessionDescription,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Uninitialized,
    Negotiating,
    Connected,
    Closed,
}

/// Все, что сессии нужно от оркестратора, чтобы создать соединение и
/// отправлять сообщения.
#[derive(Clone)]
pub struct SessionLinks {
    pub factory: Arc<dyn PeerTransportFactory>,
    pub transport_config: TransportConfig,
    pub transport_events: mpsc::Sender<StampedTransportEvent>,
    pub outbound: mpsc::UnboundedSender<OutboundEnvelope>,
    pub video_source: Option<Arc<dyn VideoSource>>,
}

/// Согласование SDP/ICE с одним удаленным пиром.
///
/// Соединение создается лениво, на первое входящее сообщение или на
/// `start_offer`. Исходящие сообщения уходят в очередь оркестратора,
/// напрямую сессия ничего не отправляет.
pub struct PeerSession {
    id: PeerId,
    name: String,
    generation: u64,
    state: NegotiationState,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    pending_candidates: Vec<IceCandidate>,
    transport: Option<Box<dyn PeerTransport>>,
    video_attached: bool,
    links: SessionLinks,
}

impl PeerSession {
    /// `generation` отличает эту сессию от прежних сессий с тем же пиром.
    pub fn new(id: PeerId, name: impl Into<String>, generation: u64, links: SessionLinks) -> Self {
        Self {
            id,
            name: name.into(),
            generation,
            state: NegotiationState::Uninitialized,
            local_description: None,
            remote_description: None,
            pending_candidates: Vec::new(),
            transport: None,
            video_attached: false,
            links,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn pending_candidates(&self) -> &[IceCandidate] {
        &self.pending_candidates
    }

    pub async fn handle_message(&mut self, text: &str) {
        if let Err(e) = self.ensure_transport().await {
            error!("Failed to allocate peer connection for {}: {:?}", self.id, e);
            return;
        }

        match PeerMessage::parse(text) {
            Ok(PeerMessage::Description(description)) => {
                self.apply_remote_description(description).await
            }
            Ok(PeerMessage::Candidate(candidate)) => self.apply_remote_candidate(candidate).await,
            Err(PeerMessageError::LoopbackOffer) => {
                debug!("Ignoring loopback offer from peer {}", self.id)
            }
            Err(e) => warn!("Dropping message from peer {}: {}", self.id, e),
        }
    }

    /// Сессия по инициативе сервера: data channel и offer сразу.
    pub async fn start_offer(&mut self) -> Result<()> {
        self.ensure_transport().await?;
        let Some(transport) = self.transport.as_deref() else {
            bail!("peer connection for {} is gone", self.id);
        };

        let offer = transport.create_offer().await?;
        info!("Sending offer to peer {}", self.id);
        self.local_description = Some(offer.clone());
        self.emit(PeerMessage::Description(offer));
        Ok(())
    }

    pub fn on_local_candidate(&self, candidate: IceCandidate) {
        if self.state == NegotiationState::Closed {
            return;
        }
        self.emit(PeerMessage::Candidate(candidate));
    }

    pub fn on_ice_state(&mut self, state: IceConnectionState) -> NegotiationState {
        if self.state == NegotiationState::Closed {
            return self.state;
        }
        if state.is_connected() && self.state != NegotiationState::Connected {
            info!("Peer {} connected", self.id);
            self.state = NegotiationState::Connected;
        }
        self.state
    }

    /// Закрывает соединение и отпускает видеоисточник. Повторный вызов ничего не делает.
    pub async fn close(&mut self) {
        if self.state == NegotiationState::Closed {
            return;
        }
        self.state = NegotiationState::Closed;
        self.pending_candidates.clear();

        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                warn!("Failed to close peer connection for {}: {:?}", self.id, e);
            }
        }
        if self.video_attached {
            if let Some(video) = &self.links.video_source {
                video.detach_video_source(self.id);
            }
            self.video_attached = false;
        }
        debug!("Session for peer {} closed", self.id);
    }

    async fn ensure_transport(&mut self) -> Result<()> {
        if self.transport.is_some() {
            return Ok(());
        }
        if self.state == NegotiationState::Closed {
            bail!("session for {} is closed", self.id);
        }

        let events = TransportEventSink::new(self.generation, self.links.transport_events.clone());
        let transport = self
            .links
            .factory
            .create(self.id, &self.links.transport_config, events)
            .await?;

        if let Some(video) = &self.links.video_source {
            if let Some(track) = video.attach_video_source(self.id) {
                match transport.add_video_track(track).await {
                    Ok(()) => self.video_attached = true,
                    Err(e) => warn!("Failed to attach video for {}: {:?}", self.id, e),
                }
            }
        }

        self.transport = Some(transport);
        self.state = NegotiationState::Negotiating;
        debug!("Peer connection allocated for {}", self.id);
        Ok(())
    }

    async fn apply_remote_description(&mut self, description: SessionDescription) {
        let Some(transport) = self.transport.as_deref() else {
            return;
        };
        if let Err(e) = transport.set_remote_description(&description).await {
            warn!("Remote {} rejected for peer {}: {:?}", description.kind, self.id, e);
            return;
        }
        let kind = description.kind;
        self.remote_description = Some(description);

        for candidate in std::mem::take(&mut self.pending_candidates) {
            if let Err(e) = transport.add_ice_candidate(&candidate).await {
                warn!("Failed to add buffered candidate for {}: {:?}", self.id, e);
            }
        }

        if kind != SdpType::Offer {
            return;
        }
        match transport.create_answer().await {
            Ok(answer) => {
                self.local_description = Some(answer.clone());
                self.emit(PeerMessage::Description(answer));
            }
            Err(e) => error!("Failed to create answer for {}: {:?}", self.id, e),
        }
    }

    async fn apply_remote_candidate(&mut self, candidate: IceCandidate) {
        if self.remote_description.is_none() {
            debug!("Buffering candidate for {} until remote description", self.id);
            self.pending_candidates.push(candidate);
            return;
        }
        let Some(transport) = self.transport.as_deref() else {
            return;
        };
        if let Err(e) = transport.add_ice_candidate(&candidate).await {
            warn!("Failed to add ICE candidate for {}: {:?}", self.id, e);
        }
    }

    fn emit(&self, message: PeerMessage) {
        let envelope = OutboundEnvelope::new(self.id, message.to_json());
        if self.links.outbound.send(envelope).is_err() {
            warn!("Outbound queue closed, dropping message for {}", self.id);
        }
    }
}
