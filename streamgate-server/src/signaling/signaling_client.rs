use streamgate_core::PeerId;

/// Соединение с сигнальным сервером. Методы не блокируют: результат
/// приходит событием `SignalingEvent` в канал, выданный при создании клиента.
pub trait SignalingClient: Send + Sync {
    fn connect(&self, server: &str, port: u16, client_name: &str);

    /// `false`, если отправку начать нельзя (нет входа или идет другая).
    fn send_to_peer(&self, peer_id: PeerId, message: &str) -> bool;

    fn is_sending_message(&self) -> bool;

    fn sign_out(&self) -> bool;

    /// Сообщает серверу, сколько еще зрителей можно принять.
    /// `false`, если входа нет.
    fn update_capacity(&self, value: u32) -> bool;

    /// Значение заголовка `Authorization` для всех последующих запросов.
    fn set_authorization(&self, value: &str);

    fn is_connected(&self) -> bool;

    fn id(&self) -> Option<PeerId>;

    fn peers(&self) -> Vec<(PeerId, String)>;
}
