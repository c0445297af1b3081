//! REST API client module for the taskhub services.
//!
//! This module provides the `ApiClient` for communicating with the user,
//! team and task services. Each service lives at its own base URL and all
//! of them accept the bearer token issued by the user service's
//! `/users/token` endpoint.

pub mod client;
pub mod error;

pub use client::{ApiClient, ServiceUrls};
pub use error::ApiError;
