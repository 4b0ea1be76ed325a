use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Временные учетные данные TURN-сервера.
///
/// В JSON сериализуются только `username` и `password`, как их отдает сервис.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnCredentials {
    #[serde(skip)]
    pub success: bool,
    pub username: String,
    pub password: String,
}

impl TurnCredentials {
    pub fn failed() -> Self {
        Self::default()
    }

    /// `success` выставляется, только если оба поля присутствуют и не пусты.
    pub fn from_body(body: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(body) else {
            return Self::failed();
        };
        let field = |key: &str| value.get(key).and_then(Value::as_str).unwrap_or_default();

        let username = field("username");
        let password = field("password");
        if username.is_empty() || password.is_empty() {
            return Self::failed();
        }

        Self {
            success: true,
            username: username.to_owned(),
            password: password.to_owned(),
        }
    }
}
