//! Error types for the session layer.

/// Errors that can occur while establishing who a caller is.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The upgrade request carried no token at all.
    #[error("no credentials supplied")]
    MissingCredentials,

    /// The [`Authenticator`](crate::Authenticator) rejected the token.
    #[error("authentication failed: {0}")]
    AuthFailed(String),
}
