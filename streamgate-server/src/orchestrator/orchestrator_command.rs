use crate::session::NegotiationState;
use streamgate_core::{OutboundEnvelope, PeerId};
use tokio::sync::oneshot;

/// Команды, поступающие в оркестратор из других задач.
#[derive(Debug)]
pub enum OrchestratorCommand {
    /// Получить учетные данные и войти на сигнальный сервер под этим именем.
    Connect { display_name: String },

    /// Начать сессию по инициативе сервера: отправить пиру offer.
    ConnectToPeer { peer_id: PeerId },

    /// Попрощаться с текущим собеседником (режим одного пира).
    DisconnectFromCurrentPeer,

    /// Выйти с сервера, закрыть все сессии и остановить цикл.
    Close { done: oneshot::Sender<()> },

    Snapshot {
        reply: oneshot::Sender<OrchestratorSnapshot>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: PeerId,
    pub name: String,
    pub state: NegotiationState,
    pub has_remote_description: bool,
    pub pending_candidates: usize,
}

/// Состояние оркестратора на момент запроса.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorSnapshot {
    pub signed_in: bool,
    pub own_id: Option<PeerId>,
    pub peers: Vec<(PeerId, String)>,
    pub sessions: Vec<SessionSnapshot>,
    pub queued: Vec<OutboundEnvelope>,
    pub in_flight: Option<OutboundEnvelope>,
    pub partner: Option<PeerId>,
}

impl OrchestratorSnapshot {
    pub fn session(&self, id: PeerId) -> Option<&SessionSnapshot> {
        self.sessions.iter().find(|s| s.id == id)
    }
}
