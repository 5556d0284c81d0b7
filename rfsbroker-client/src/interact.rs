//! Interactive collaborator seams: login prompting and server-identity
//! confirmation. Implementations live in the embedding application; the
//! connection never holds internal locks while calling them.

/// Credentials entered by the user.
#[derive(Debug, Clone)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

/// Prompts the user for credentials when the login mode is
/// [`crate::LoginMode::AskInteractive`].
pub trait InteractiveLogin: Send + Sync {
    /// `prior_failures` counts authorization failures already seen this
    /// handshake. Returns `None` when the user cancels.
    fn prompt(&self, site_label: &str, prior_failures: u32) -> Option<LoginCredentials>;
}

/// Login collaborator that always cancels, for headless embedders.
pub struct NonInteractive;

impl InteractiveLogin for NonInteractive {
    fn prompt(&self, _site_label: &str, _prior_failures: u32) -> Option<LoginCredentials> {
        None
    }
}

/// Outcome of a server-identity confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityDecision {
    /// Accept the new identity for this session only.
    AllowOnce,
    /// Accept and persist the new identity into the site configuration.
    AllowAlways,
    /// Reject; the handshake fails.
    Deny,
}

/// Confirms a changed server identity with the user.
pub trait ConfirmIdentity: Send + Sync {
    /// `site_backed` is false for ad-hoc connections whose options are
    /// never persisted.
    fn confirm(&self, site_label: &str, new_identity: &str, site_backed: bool) -> IdentityDecision;
}
