use crate::transport::{
    PeerTransport, PeerTransportEvent, PeerTransportFactory, TransportConfig, TransportEventSink,
    VideoTrack,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use streamgate_core::{IceCandidate, IceConnectionState, PeerId, SdpType, SessionDescription};
use tokio::sync::Mutex;
use tracing::{debug, info};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

pub const INPUT_DATA_CHANNEL: &str = "inputDataChannel";

/// `PeerTransport` поверх `RTCPeerConnection` из webrtc-rs.
pub struct RtcPeerTransport {
    pub peer_id: PeerId,
    pub peer_connection: Arc<RTCPeerConnection>,
    data_channel: Mutex<Option<Arc<RTCDataChannel>>>,
    event_tx: TransportEventSink,
}

impl RtcPeerTransport {
    /// `event_tx`: канал, в который соединение отдает события для оркестратора.
    pub async fn new(
        peer_id: PeerId,
        config: &TransportConfig,
        event_tx: TransportEventSink,
    ) -> Result<Self> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut m)?;

        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config
                .ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                })
                .collect(),
            ice_transport_policy: if config.relay_only {
                RTCIceTransportPolicy::Relay
            } else {
                RTCIceTransportPolicy::All
            },
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await?);

        let state_tx = event_tx.clone();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |s: RTCIceConnectionState| {
                let tx = state_tx.clone();

                Box::pin(async move {
                    info!("ICE connection state changed for peer {}: {:?}", peer_id, s);
                    let Some(state) = map_ice_state(s) else {
                        return;
                    };
                    tx.send(PeerTransportEvent::IceStateChanged(peer_id, state))
                        .await;
                })
            },
        ));

        let ice_tx = event_tx.clone();
        peer_connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let tx = ice_tx.clone();

            Box::pin(async move {
                let Some(candidate) = c else { return };
                let Ok(init) = candidate.to_json() else {
                    return;
                };
                let candidate = IceCandidate {
                    sdp_mid: init.sdp_mid.unwrap_or_default(),
                    sdp_mline_index: init.sdp_mline_index.unwrap_or_default(),
                    candidate: init.candidate,
                };
                tx.send(PeerTransportEvent::LocalCandidate(peer_id, candidate))
                    .await;
            })
        }));

        let dc_tx = event_tx.clone();
        peer_connection.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let tx = dc_tx.clone();

            Box::pin(async move {
                debug!("Remote data channel '{}' opened by peer {}", dc.label(), peer_id);
                forward_messages(&dc, peer_id, tx);
            })
        }));

        Ok(Self {
            peer_id,
            peer_connection,
            data_channel: Mutex::new(None),
            event_tx,
        })
    }
}

#[async_trait]
impl PeerTransport for RtcPeerTransport {
    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()> {
        let desc = match description.kind {
            SdpType::Offer => RTCSessionDescription::offer(description.sdp.clone())?,
            SdpType::Answer => RTCSessionDescription::answer(description.sdp.clone())?,
        };
        self.peer_connection.set_remote_description(desc).await?;
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.peer_connection.create_answer(None).await?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let init = RTCDataChannelInit {
            ordered: Some(false),
            max_retransmits: Some(0),
            ..Default::default()
        };
        let dc = self
            .peer_connection
            .create_data_channel(INPUT_DATA_CHANNEL, Some(init))
            .await
            .context("Failed to create data channel")?;
        forward_messages(&dc, self.peer_id, self.event_tx.clone());
        *self.data_channel.lock().await = Some(dc);

        let offer = self.peer_connection.create_offer(None).await?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: Some(candidate.sdp_mid.clone()),
            sdp_mline_index: Some(candidate.sdp_mline_index),
            ..Default::default()
        };
        self.peer_connection.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn add_video_track(&self, track: VideoTrack) -> Result<()> {
        self.peer_connection
            .add_track(track)
            .await
            .context("Failed to add video track")?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(dc) = self.data_channel.lock().await.take() {
            let _ = dc.close().await;
        }
        self.peer_connection.close().await?;
        Ok(())
    }
}

/// Фабрика настоящих WebRTC-соединений.
#[derive(Debug, Clone, Copy, Default)]
pub struct RtcTransportFactory;

#[async_trait]
impl PeerTransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        peer_id: PeerId,
        config: &TransportConfig,
        events: TransportEventSink,
    ) -> Result<Box<dyn PeerTransport>> {
        let transport = RtcPeerTransport::new(peer_id, config, events).await?;
        Ok(Box::new(transport))
    }
}

fn forward_messages(dc: &Arc<RTCDataChannel>, peer_id: PeerId, tx: TransportEventSink) {
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = tx.clone();
        Box::pin(async move {
            let text = String::from_utf8_lossy(&msg.data).into_owned();
            tx.send(PeerTransportEvent::DataChannelMessage(peer_id, text))
                .await;
        })
    }));
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    Some(match state {
        RTCIceConnectionState::New => IceConnectionState::New,
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => return None,
    })
}
