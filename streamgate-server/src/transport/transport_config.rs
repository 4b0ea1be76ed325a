use crate::config::WebRtcConfig;
use streamgate_core::{IceServerConfig, TurnCredentials};

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Конфигурация ICE для новых peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub ice_servers: Vec<IceServerConfig>,
    /// Только relay-кандидаты (TURN).
    pub relay_only: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig {
                urls: vec![DEFAULT_STUN_SERVER.to_owned()],
                username: None,
                credential: None,
            }],
            relay_only: false,
        }
    }
}

impl TransportConfig {
    /// `iceConfiguration`: `relay` берет TURN-сервер и запрещает прямые
    /// кандидаты, `stun` берет настроенный STUN, иначе публичный STUN Google.
    /// Для `relay` учетные данные от сервиса TURN важнее статических из файла.
    pub fn from_webrtc(config: &WebRtcConfig, credentials: Option<&TurnCredentials>) -> Self {
        match config.ice_configuration.as_str() {
            "relay" if !config.turn_server.uri.is_empty() => {
                let (username, credential) = match credentials.filter(|c| c.success) {
                    Some(c) => (c.username.clone(), c.password.clone()),
                    None => (
                        config.turn_server.username.clone(),
                        config.turn_server.password.clone(),
                    ),
                };
                Self {
                    ice_servers: vec![IceServerConfig {
                        urls: vec![config.turn_server.uri.clone()],
                        username: Some(username),
                        credential: Some(credential),
                    }],
                    relay_only: true,
                }
            }
            "stun" if !config.stun_server.uri.is_empty() => Self {
                ice_servers: vec![IceServerConfig {
                    urls: vec![config.stun_server.uri.clone()],
                    username: None,
                    credential: None,
                }],
                relay_only: false,
            },
            _ => Self::default(),
        }
    }
}
