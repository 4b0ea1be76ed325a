use async_trait::async_trait;
use streamgate_core::PeerId;

/// Приложение, которому уходит текст из data channel пиров.
#[async_trait]
pub trait DataChannelHandler: Send + Sync {
    async fn on_data_channel_message(&self, peer_id: PeerId, text: String);
}
