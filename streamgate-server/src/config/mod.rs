mod webrtc_config;

pub use webrtc_config::*;
