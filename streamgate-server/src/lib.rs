pub mod auth;
pub mod config;
pub mod error;
mod flow_state;
pub mod net;
pub mod orchestrator;
pub mod session;
pub mod signaling;
pub mod transport;
pub mod turn;

pub use auth::*;
pub use config::*;
pub use error::*;
pub use orchestrator::*;
pub use session::*;
pub use signaling::*;
pub use transport::*;
pub use turn::*;
