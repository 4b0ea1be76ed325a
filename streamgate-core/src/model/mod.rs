mod auth;
mod ice;
mod peer;
mod signaling;
mod turn;

pub use auth::{BearerToken, DeviceCodeData};
pub use ice::IceConnectionState;
pub use peer::PeerId;
pub use signaling::{
    HANG_UP_MESSAGE, IceCandidate, IceServerConfig, OutboundEnvelope, PeerMessage,
    PeerMessageError, SdpType, SessionDescription,
};
pub use turn::TurnCredentials;
