mod endpoint;
mod http_client;
mod transport;

pub use endpoint::*;
pub use http_client::*;
pub use transport::*;
