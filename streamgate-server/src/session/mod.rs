mod peer_session;

pub use peer_session::*;
