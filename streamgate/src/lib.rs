pub use streamgate_core::model::PeerId;

pub mod model {
    pub use streamgate_core::model::*;
}

#[cfg(feature = "server")]
pub mod server {
    pub use streamgate_server::*;
}
