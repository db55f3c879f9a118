#![doc = include_str!("../README.md")]

pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod session;
pub mod store;
pub mod token;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-exports for convenient access
pub use clock::{Clock, SystemClock};
pub use config::GatewayConfig;
pub use error::{Error, RefreshFailure};
pub use gateway::RequestGateway;
pub use session::SessionReader;
pub use store::{FileTokenStore, MemoryTokenStore, STORAGE_KEY, StoreError, TokenStore};
pub use token::{TokenError, decode_identity};
#[cfg(feature = "http")]
pub use transport::ReqwestTransport;
pub use transport::{ApiRequest, ApiResponse, HttpRequest, Method, Transport};
pub use types::{
    CredentialPair, IdentityRecord, LoginCredentials, Registration, Role, UserId,
};
