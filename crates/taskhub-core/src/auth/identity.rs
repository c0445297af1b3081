use async_trait::async_trait;

use crate::api::ApiError;
use crate::models::User;

/// Lookup of the profile that owns a bearer token.
///
/// Implemented by [`crate::api::ApiClient`] against `GET /users/me`.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    async fn fetch_self(&self, token: &str) -> Result<User, ApiError>;
}

/// Exchange of credentials for a bearer token.
///
/// Implemented by [`crate::api::ApiClient`] against `POST /users/token`.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str) -> Result<String, ApiError>;
}
