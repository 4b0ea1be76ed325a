mod relay_client;
mod signaling_client;
mod signaling_event;

pub use relay_client::*;
pub use signaling_client::*;
pub use signaling_event::*;
