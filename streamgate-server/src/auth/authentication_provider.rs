use streamgate_core::{BearerToken, DeviceCodeData};
use tokio::sync::broadcast;

pub(crate) const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// Device code получен, пользователю нужно ввести `user_code`.
    CodeReady(DeviceCodeData),

    /// Проход завершен, успешно или нет.
    Complete(BearerToken),
}

/// Провайдер bearer-токена.
///
/// `authenticate` только запускает проход в фоне и возвращает `false`, если
/// проход уже идет. Результат приходит событием `AuthEvent::Complete`.
/// Вызывать нужно внутри tokio runtime.
pub trait AuthenticationProvider: Send + Sync {
    fn authenticate(&self) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}
