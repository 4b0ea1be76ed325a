mod authentication_provider;
mod client_credentials_provider;
mod device_code_provider;

pub use authentication_provider::*;
pub use client_credentials_provider::*;
pub use device_code_provider::*;
