pub mod auth;
pub mod config;

pub use auth::{AppTokenProvider, EbayAuthError};
