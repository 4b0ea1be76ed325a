use serde::{Deserialize, Serialize};

/// Состояние ICE-соединения, которое сессия сообщает оркестратору.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Completed)
    }

    /// Соединение потеряно и сессию можно удалять.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}
