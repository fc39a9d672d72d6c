//! Caller identity for livehub.
//!
//! The hub performs no authentication of its own. Whatever sits in front
//! of it verifies the caller and hands over an [`Identity`]; this crate
//! defines that identity and the [`Authenticator`] hook used to obtain it
//! from the [`Credentials`] presented during the WebSocket upgrade.
//!
//! ```text
//! Upgrade request → Credentials → Authenticator → Identity → Hub admission
//! ```

mod auth;
mod error;
mod identity;

pub use auth::{ACCESS_TOKEN_COOKIE, Authenticator, Credentials};
pub use error::SessionError;
pub use identity::{AccountType, Identity};
