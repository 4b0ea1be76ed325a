use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Ошибки конфигурации: обнаруживаются при создании объектов, до начала работы.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("invalid uri {uri:?}: {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    #[error("uri {0:?} has no host")]
    MissingHost(String),

    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connection closed before the response was complete")]
    Incomplete,

    #[error("http protocol error: {0}")]
    Protocol(#[source] hyper::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] http::Error),
}

impl From<hyper::Error> for HttpError {
    fn from(e: hyper::Error) -> Self {
        if e.is_incomplete_message() {
            HttpError::Incomplete
        } else {
            HttpError::Protocol(e)
        }
    }
}

/// Причина, по которой фоновый поток провайдера завершился неудачей.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("unexpected http status {0}")]
    UnexpectedStatus(u16),

    #[error("response body is not valid JSON: {0}")]
    InvalidBody(#[from] serde_json::Error),

    #[error("response carries no token")]
    EmptyToken,

    #[error("upstream authentication failed")]
    AuthenticationFailed,

    #[error("upstream event stream closed")]
    EventsClosed,

    #[error("not connected to the signaling server")]
    NotConnected,

    #[error("response carries no peer id")]
    MissingPeerId,
}
