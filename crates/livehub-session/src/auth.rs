//! Authentication hook for validating caller identity.
//!
//! livehub doesn't issue or verify tokens. It pulls whatever token the
//! client presented out of the upgrade request ([`Credentials`]) and asks
//! an [`Authenticator`] to turn it into an [`Identity`].

use std::future::Future;

use livehub_transport::UpgradeRequest;

use crate::{Identity, SessionError};

/// Cookie consulted when no bearer header or `token` query parameter is present.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// The token a client presented while upgrading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub token: Option<String>,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Extracts the token from an upgrade request.
    ///
    /// Looked up in order: `Authorization: Bearer <token>`, the `token`
    /// query parameter, then the `access_token` cookie. Browsers can't set
    /// headers on WebSocket requests, hence the fallbacks.
    pub fn from_request(request: &UpgradeRequest) -> Self {
        let bearer = request
            .header("authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|v| v.trim().to_owned());
        let token = bearer
            .or_else(|| request.query_param("token"))
            .or_else(|| request.cookie(ACCESS_TOKEN_COOKIE).map(str::to_owned))
            .filter(|t| !t.is_empty());
        Self { token }
    }

    /// Returns the token or [`SessionError::MissingCredentials`].
    pub fn require_token(&self) -> Result<&str, SessionError> {
        self.token
            .as_deref()
            .ok_or(SessionError::MissingCredentials)
    }
}

/// Validates credentials and returns the caller's identity.
///
/// # Example
///
/// ```rust
/// use livehub_session::{AccountType, Authenticator, Credentials, Identity, SessionError};
///
/// /// Treats the token as a guest username. Development only.
/// struct GuestAuthenticator;
///
/// impl Authenticator for GuestAuthenticator {
///     async fn authenticate(&self, credentials: &Credentials) -> Result<Identity, SessionError> {
///         let name = credentials.require_token()?;
///         Ok(Identity::new(name, name, AccountType::Guest))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Returns the verified identity behind `credentials`.
    ///
    /// # Errors
    /// - [`SessionError::MissingCredentials`]: nothing to verify
    /// - [`SessionError::AuthFailed`]: the token was rejected
    fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Identity, SessionError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccountType;

    fn request(target: &str, headers: &[(&str, &str)]) -> UpgradeRequest {
        UpgradeRequest {
            target: target.into(),
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_bearer_header_wins() {
        let req = request(
            "/ws?token=from-query",
            &[("authorization", "Bearer from-header"), ("cookie", "access_token=from-cookie")],
        );
        assert_eq!(Credentials::from_request(&req), Credentials::new("from-header"));
    }

    #[test]
    fn test_query_then_cookie_fallback() {
        let req = request("/ws?token=from-query", &[("cookie", "access_token=from-cookie")]);
        assert_eq!(Credentials::from_request(&req).token.as_deref(), Some("from-query"));

        let req = request("/ws", &[("cookie", "access_token=from-cookie")]);
        assert_eq!(Credentials::from_request(&req).token.as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_query_token_is_percent_decoded() {
        let req = request("/ws?token=ana%3AAna%20B", &[]);
        assert_eq!(Credentials::from_request(&req), Credentials::new("ana:Ana B"));
    }

    #[test]
    fn test_no_token() {
        let creds = Credentials::from_request(&request("/ws?token=", &[]));
        assert_eq!(creds.token, None);
        assert!(matches!(creds.require_token(), Err(SessionError::MissingCredentials)));
    }

    struct Fixed;

    impl Authenticator for Fixed {
        async fn authenticate(&self, credentials: &Credentials) -> Result<Identity, SessionError> {
            match credentials.require_token()? {
                "good" => Ok(Identity::new("ana", "Ana", AccountType::Registered)),
                other => Err(SessionError::AuthFailed(format!("unknown token {other}"))),
            }
        }
    }

    #[tokio::test]
    async fn test_authenticator_contract() {
        let id = Fixed.authenticate(&Credentials::new("good")).await.unwrap();
        assert_eq!(id.username, "ana");

        let err = Fixed.authenticate(&Credentials::new("bad")).await.unwrap_err();
        assert!(matches!(err, SessionError::AuthFailed(_)));

        let err = Fixed.authenticate(&Credentials::default()).await.unwrap_err();
        assert!(matches!(err, SessionError::MissingCredentials));
    }
}
