use streamgate_core::PeerId;

/// События соединения с сигнальным сервером.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    SignedIn { id: PeerId },
    Disconnected,
    PeerConnected { id: PeerId, name: String },
    PeerDisconnected { id: PeerId },
    MessageFromPeer { id: PeerId, message: String },
    /// Завершилась отправка, начатая `send_to_peer`.
    MessageSent { success: bool },
    ServerConnectionFailure,
}
