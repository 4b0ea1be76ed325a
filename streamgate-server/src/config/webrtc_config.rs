use crate::auth::{
    AuthenticationProvider, ClientCredentialsConfig, ClientCredentialsProvider,
    DeviceCodeProvider,
};
use crate::error::ConfigError;
use crate::net::Transport;
use crate::turn::TurnCredentialProvider;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TurnServerConfig {
    pub uri: String,
    /// Адрес сервиса, выдающего временные учетные данные.
    pub provider: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StunServerConfig {
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthenticationConfig {
    pub authority: String,
    pub resource: String,
    pub client_id: String,
    pub client_secret: String,
    pub code_uri: String,
    pub poll_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationMethod {
    ClientCredentials(ClientCredentialsConfig),
    DeviceCode { code_uri: String, poll_uri: String },
    None,
}

impl AuthenticationConfig {
    /// Секрет клиента важнее device code: сервер без пользователя.
    pub fn method(&self) -> AuthenticationMethod {
        if !self.client_secret.is_empty() {
            return AuthenticationMethod::ClientCredentials(ClientCredentialsConfig {
                authority: self.authority.clone(),
                client_id: self.client_id.clone(),
                client_secret: self.client_secret.clone(),
                resource: self.resource.clone(),
            });
        }
        if !self.code_uri.is_empty() && !self.poll_uri.is_empty() {
            return AuthenticationMethod::DeviceCode {
                code_uri: self.code_uri.clone(),
                poll_uri: self.poll_uri.clone(),
            };
        }
        AuthenticationMethod::None
    }
}

/// Конфигурация сервера, формат `webrtcConfig.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebRtcConfig {
    /// `relay`, `stun` или пусто.
    pub ice_configuration: String,
    pub turn_server: TurnServerConfig,
    pub stun_server: StunServerConfig,
    pub server: String,
    pub port: u16,
    /// Период heartbeat в миллисекундах, 0 отключает.
    pub heartbeat: u64,
    /// Сколько зрителей сервер принимает одновременно. 0 отключает
    /// отчеты о емкости.
    pub capacity: u32,
    pub authentication: AuthenticationConfig,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_configuration: String::new(),
            turn_server: TurnServerConfig::default(),
            stun_server: StunServerConfig::default(),
            server: "localhost".to_owned(),
            port: 8888,
            heartbeat: 0,
            capacity: 0,
            authentication: AuthenticationConfig::default(),
        }
    }
}

impl WebRtcConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn authentication_provider(
        &self,
        transport: Arc<dyn Transport>,
    ) -> Result<Option<Arc<dyn AuthenticationProvider>>, ConfigError> {
        let provider: Arc<dyn AuthenticationProvider> = match self.authentication.method() {
            AuthenticationMethod::ClientCredentials(config) => {
                Arc::new(ClientCredentialsProvider::new(config, transport)?)
            }
            AuthenticationMethod::DeviceCode { code_uri, poll_uri } => {
                Arc::new(DeviceCodeProvider::new(&code_uri, &poll_uri, transport)?)
            }
            AuthenticationMethod::None => return Ok(None),
        };
        Ok(Some(provider))
    }

    pub fn turn_provider(
        &self,
        transport: Arc<dyn Transport>,
    ) -> Result<Option<TurnCredentialProvider>, ConfigError> {
        if self.turn_server.provider.is_empty() {
            return Ok(None);
        }
        TurnCredentialProvider::new(&self.turn_server.provider, transport).map(Some)
    }
}
