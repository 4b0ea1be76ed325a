use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Результат одного прохода аутентификации.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BearerToken {
    pub success: bool,
    pub token: String,
}

impl BearerToken {
    pub fn granted(token: impl Into<String>) -> Self {
        Self {
            success: true,
            token: token.into(),
        }
    }

    pub fn failed() -> Self {
        Self::default()
    }

    /// Значение заголовка `Authorization`.
    pub fn authorization_value(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

/// Ответ endpoint'а выдачи device code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCodeData {
    pub device_code: String,
    pub user_code: String,
    pub interval_seconds: u64,
    pub verification_url: String,
}

impl DeviceCodeData {
    /// Разбирает тело ответа. Отсутствующие или битые поля остаются по умолчанию,
    /// ошибкой считается только невалидный JSON.
    pub fn from_body(body: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(body)?;
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_default()
        };

        let interval_seconds = match value.get("interval") {
            Some(Value::Number(n)) => n.as_u64().unwrap_or_default(),
            Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
            _ => 0,
        };

        Ok(Self {
            device_code: text("device_code"),
            user_code: text("user_code"),
            interval_seconds,
            verification_url: text("verification_url"),
        })
    }
}
