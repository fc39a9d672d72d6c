//! The verified identity attached to every connection.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What kind of account a caller logged in with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// Temporary account without credentials of its own.
    #[default]
    Guest,
    /// Account with a verified login.
    Registered,
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guest => f.write_str("guest"),
            Self::Registered => f.write_str("registered"),
        }
    }
}

/// A verified caller. Immutable once a connection is admitted.
///
/// `username` is the registry key: the hub keeps at most one live
/// connection per username.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub username: String,
    pub display_name: String,
    pub account_type: AccountType,
}

impl Identity {
    pub fn new(
        username: impl Into<String>,
        display_name: impl Into<String>,
        account_type: AccountType,
    ) -> Self {
        Self {
            username: username.into(),
            display_name: display_name.into(),
            account_type,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}
