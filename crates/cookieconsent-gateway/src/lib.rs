//! Cookieconsent Gateway - HTTP surface over the consent data layer

pub mod error;
pub mod idempotency;
pub mod server;

pub use error::ApiError;
pub use idempotency::IdempotencyCache;
pub use server::{router, start_gateway, GatewayState};
