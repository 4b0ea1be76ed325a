use crate::session::NegotiationState;
use streamgate_core::{IceConnectionState, PeerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    TurnCredentialsReady { success: bool },
    SignedIn(PeerId),
    SignedOut,
    ConnectFailed(String),
    PeerConnected(PeerId, String),
    PeerDisconnected(PeerId),
    SessionStateChanged(PeerId, NegotiationState),
    IceStateChanged(PeerId, IceConnectionState),
    SessionClosed(PeerId),
}
