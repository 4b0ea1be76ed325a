use crate::transport::{TransportConfig, TransportEventSink};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use streamgate_core::{IceCandidate, PeerId, SessionDescription};
use webrtc::track::track_local::TrackLocal;

pub type VideoTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Peer connection одной сессии.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()>;

    /// Создает answer и ставит его локальным описанием.
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Открывает data channel `inputDataChannel`, создает offer и ставит его
    /// локальным описанием.
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    async fn add_video_track(&self, track: VideoTrack) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    async fn create(
        &self,
        peer_id: PeerId,
        config: &TransportConfig,
        events: TransportEventSink,
    ) -> Result<Box<dyn PeerTransport>>;
}

/// Источник видео: отдает трек для новой сессии и освобождает его при закрытии.
pub trait VideoSource: Send + Sync {
    fn attach_video_source(&self, peer_id: PeerId) -> Option<VideoTrack>;

    fn detach_video_source(&self, _peer_id: PeerId) {}
}
