mod turn_credential_provider;

pub use turn_credential_provider::*;
