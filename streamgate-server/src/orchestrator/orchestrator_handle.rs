use crate::orchestrator::{OrchestratorCommand, OrchestratorEvent, OrchestratorSnapshot};
use streamgate_core::PeerId;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Доступ к оркестратору из других задач и потоков. Все вызовы уходят
/// командами в его цикл; `false` значит, что цикл уже остановлен.
#[derive(Clone)]
pub struct OrchestratorHandle {
    command_tx: mpsc::Sender<OrchestratorCommand>,
    events: broadcast::Sender<OrchestratorEvent>,
}

impl OrchestratorHandle {
    pub(crate) fn new(
        command_tx: mpsc::Sender<OrchestratorCommand>,
        events: broadcast::Sender<OrchestratorEvent>,
    ) -> Self {
        Self { command_tx, events }
    }

    pub async fn connect(&self, display_name: impl Into<String>) -> bool {
        self.send(OrchestratorCommand::Connect {
            display_name: display_name.into(),
        })
        .await
    }

    pub async fn connect_to_peer(&self, peer_id: PeerId) -> bool {
        self.send(OrchestratorCommand::ConnectToPeer { peer_id })
            .await
    }

    pub async fn disconnect_from_current_peer(&self) -> bool {
        self.send(OrchestratorCommand::DisconnectFromCurrentPeer)
            .await
    }

    /// Ждет, пока оркестратор выйдет с сервера и закроет сессии.
    pub async fn close(&self) -> bool {
        let (done, done_rx) = oneshot::channel();
        if !self.send(OrchestratorCommand::Close { done }).await {
            return false;
        }
        done_rx.await.is_ok()
    }

    pub async fn snapshot(&self) -> Option<OrchestratorSnapshot> {
        let (reply, reply_rx) = oneshot::channel();
        if !self.send(OrchestratorCommand::Snapshot { reply }).await {
            return None;
        }
        reply_rx.await.ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: OrchestratorCommand) -> bool {
        self.command_tx.send(command).await.is_ok()
    }
}
