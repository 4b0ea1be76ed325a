mod bootstrap;
mod data_channel_handler;
mod orchestrator_command;
mod orchestrator_event;
mod orchestrator_handle;
mod session_orchestrator;

pub use data_channel_handler::*;
pub use orchestrator_command::*;
pub use orchestrator_event::*;
pub use orchestrator_handle::*;
pub use session_orchestrator::*;
