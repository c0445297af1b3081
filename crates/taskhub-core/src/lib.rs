//! Core library for taskhub.
//!
//! Provides the session lifecycle (token storage, claim decoding, identity
//! lookup), the REST client for the user, team and task services, the data
//! models those services exchange, and application configuration.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod utils;

pub use api::{ApiClient, ApiError};
pub use auth::{Session, SessionManager, SessionState};
pub use config::Config;
