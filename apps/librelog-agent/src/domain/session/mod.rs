//! Session Lifecycle Types
//!
//! The ingest session moves through a small state machine:
//!
//! ```text
//!                ┌──────────────── fail + backoff ───────────────┐
//!                ▼                                               │
//!  start ─► Disconnected ──► Authenticating ──► Connected ──► Reauthenticating
//!                ▲                                 │   ▲             │
//!                └──────── transport lost ─────────┘   └── success ──┘
//!
//!  any state ──► Terminated (shutdown or exhausted retry policy)
//! ```

use std::fmt;

// =============================================================================
// Session State
// =============================================================================

/// Connection lifecycle state owned by the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No connection; possibly waiting out a backoff delay.
    #[default]
    Disconnected,
    /// Exchanging credentials and opening the stream.
    Authenticating,
    /// Stream open and usable for sends.
    Connected,
    /// Token rejected by the ingester; obtaining a fresh one.
    Reauthenticating,
    /// Stopped; no further transitions.
    Terminated,
}

impl SessionState {
    /// Whether moving to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use SessionState::{Authenticating, Connected, Disconnected, Reauthenticating, Terminated};

        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated)
            | (Disconnected, Authenticating)
            | (Authenticating, Connected | Disconnected)
            | (Connected, Disconnected | Reauthenticating)
            | (Reauthenticating, Connected | Disconnected) => true,
            _ => false,
        }
    }

    /// Whether sends are allowed.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether this is the final state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Lowercase state name for logs and the health endpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
            Self::Reauthenticating => "reauthenticating",
            Self::Terminated => "terminated",
        }
    }

    /// Numeric code for the state gauge.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Authenticating => 1,
            Self::Connected => 2,
            Self::Reauthenticating => 3,
            Self::Terminated => 4,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Errors building [`Credentials`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialsError {
    /// Account number was empty.
    #[error("account number cannot be empty")]
    EmptyAccount,
    /// Password was empty.
    #[error("password cannot be empty")]
    EmptySecret,
}

/// Long-lived account credentials exchanged for session tokens.
///
/// The `Debug` implementation redacts the secret for safe logging.
#[derive(Clone)]
pub struct Credentials {
    account: String,
    secret: String,
}

impl Credentials {
    /// Create new credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if either the account number or the secret is empty.
    pub fn new(
        account: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<Self, CredentialsError> {
        let account = account.into();
        let secret = secret.into();

        if account.is_empty() {
            return Err(CredentialsError::EmptyAccount);
        }
        if secret.is_empty() {
            return Err(CredentialsError::EmptySecret);
        }

        Ok(Self { account, secret })
    }

    /// Account number.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Account secret.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Session Token
// =============================================================================

/// Opaque bearer token returned by the login exchange.
///
/// `Debug` and `Display` never print the token itself.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wrap a token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for building the stream URL.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        use SessionState::*;

        assert!(Disconnected.can_transition_to(Authenticating));
        assert!(Authenticating.can_transition_to(Connected));
        assert!(Authenticating.can_transition_to(Disconnected));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(Connected.can_transition_to(Reauthenticating));
        assert!(Reauthenticating.can_transition_to(Connected));
        assert!(Reauthenticating.can_transition_to(Disconnected));

        for state in [Disconnected, Authenticating, Connected, Reauthenticating] {
            assert!(state.can_transition_to(Terminated));
        }
    }

    #[test]
    fn illegal_transitions() {
        use SessionState::*;

        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Authenticating));
        assert!(!Authenticating.can_transition_to(Reauthenticating));
        for state in [Disconnected, Authenticating, Connected, Reauthenticating, Terminated] {
            assert!(!Terminated.can_transition_to(state));
        }
    }

    #[test]
    fn state_names_and_codes() {
        assert_eq!(SessionState::Connected.as_str(), "connected");
        assert_eq!(SessionState::Reauthenticating.to_string(), "reauthenticating");
        assert_eq!(SessionState::Terminated.code(), 4);
        assert!(SessionState::Connected.is_connected());
        assert!(SessionState::Terminated.is_terminal());
    }

    #[test]
    fn credentials_validation() {
        assert_eq!(
            Credentials::new("", "pw").unwrap_err(),
            CredentialsError::EmptyAccount
        );
        assert_eq!(
            Credentials::new("acct-1", "").unwrap_err(),
            CredentialsError::EmptySecret
        );
        let creds = Credentials::new("acct-1", "pw").unwrap();
        assert_eq!(creds.account(), "acct-1");
        assert_eq!(creds.secret(), "pw");
    }

    #[test]
    fn credentials_debug_redacts_secret() {
        let creds = Credentials::new("acct-1", "super_secret").unwrap();
        let debug = format!("{creds:?}");
        assert!(debug.contains("acct-1"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super_secret"));
    }

    #[test]
    fn token_is_redacted() {
        let token = SessionToken::new("tok-abc");
        assert_eq!(token.expose(), "tok-abc");
        assert!(!format!("{token:?}").contains("tok-abc"));
        assert!(!token.to_string().contains("tok-abc"));
    }
}
