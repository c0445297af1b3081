//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `TokenStore`: persistence of the single bearer token string
//! - `codec`: unverified decoding of the token's claims and expiry checks
//! - `IdentityClient`: lookup of the authenticated user's profile
//! - `SessionManager`: derives the current session from the stored token
//!
//! Tokens are not signature-checked on the client. The issuing user service
//! is trusted and every other service re-validates the token on each call.

pub mod codec;
pub mod identity;
pub mod session;
pub mod store;

pub use codec::{Claims, DecodeError};
pub use identity::{Authenticator, IdentityClient};
pub use session::{Session, SessionError, SessionManager, SessionState};
pub use store::{FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenStore};
