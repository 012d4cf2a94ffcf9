//! Credential access.
//!
//! The authentication lifecycle lives outside the engine; it is only asked
//! for the current credentials at request time.

use parking_lot::RwLock;

/// Source of request credentials.
pub trait CredentialProvider: Send + Sync {
    /// Bearer credential for REST calls, if signed in.
    fn bearer_token(&self) -> Option<String>;

    /// Account scope id, if known.
    fn account_id(&self) -> Option<String>;

    /// Short-lived credential for the push channel.
    ///
    /// Defaults to the bearer credential.
    fn push_token(&self) -> Option<String> {
        self.bearer_token()
    }
}

/// Credentials held in memory and swapped by the host application.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    token: RwLock<Option<String>>,
    push_token: RwLock<Option<String>>,
    account: RwLock<Option<String>>,
}

impl StaticCredentials {
    /// Creates signed-out credentials.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bearer credential.
    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.set_token(Some(token.into()));
        self
    }

    /// Sets the account scope.
    pub fn with_account(self, account: impl Into<String>) -> Self {
        self.set_account(Some(account.into()));
        self
    }

    /// Replaces the bearer credential.
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }

    /// Replaces the push credential. `None` falls back to the bearer credential.
    pub fn set_push_token(&self, token: Option<String>) {
        *self.push_token.write() = token;
    }

    /// Replaces the account scope.
    pub fn set_account(&self, account: Option<String>) {
        *self.account.write() = account;
    }

    /// Signs out.
    pub fn clear(&self) {
        self.set_token(None);
        self.set_push_token(None);
        self.set_account(None);
    }
}

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn account_id(&self) -> Option<String> {
        self.account.read().clone()
    }

    fn push_token(&self) -> Option<String> {
        self.push_token
            .read()
            .clone()
            .or_else(|| self.bearer_token())
    }
}
