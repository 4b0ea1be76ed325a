use streamgate_core::{IceCandidate, IceConnectionState, PeerId};
use tokio::sync::mpsc;

/// События, которые peer connection отдает в главный цикл оркестратора.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerTransportEvent {
    LocalCandidate(PeerId, IceCandidate),
    IceStateChanged(PeerId, IceConnectionState),
    DataChannelMessage(PeerId, String),
}

impl PeerTransportEvent {
    pub fn peer_id(&self) -> PeerId {
        match self {
            Self::LocalCandidate(id, _)
            | Self::IceStateChanged(id, _)
            | Self::DataChannelMessage(id, _) => *id,
        }
    }
}

/// Событие вместе с поколением сессии, чье соединение его подняло.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampedTransportEvent {
    pub generation: u64,
    pub event: PeerTransportEvent,
}

/// Канал событий одного peer connection. Каждое событие получает
/// поколение сессии, так что оркестратор отбрасывает хвосты закрытого
/// соединения, если сессию с тем же пиром уже пересоздали.
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    generation: u64,
    tx: mpsc::Sender<StampedTransportEvent>,
}

impl TransportEventSink {
    pub fn new(generation: u64, tx: mpsc::Sender<StampedTransportEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// `false`, если оркестратор уже остановлен.
    pub async fn send(&self, event: PeerTransportEvent) -> bool {
        let stamped = StampedTransportEvent {
            generation: self.generation,
            event,
        };
        self.tx.send(stamped).await.is_ok()
    }
}
