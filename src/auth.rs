//! Bearer-token plumbing shared by the REST client and the push hubs.

use std::sync::{Arc, PoisonError, RwLock};

/// Shared, refreshable bearer token. An empty string means "no auth".
///
/// The REST transport reads the lock on every request and push channels
/// read it on every connect attempt, so writing a new value is enough to
/// rotate credentials.
pub type SharedToken = Arc<RwLock<String>>;

/// Produces the current credential, or `None` when signed out.
///
/// Push channels call the factory on every (re)connect attempt.
pub type TokenFactory = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Reads a [`SharedToken`] and renders it as an `Authorization` header value.
#[derive(Clone, Debug, Default)]
pub struct BearerAuth {
    /// Shared, refreshable token string.
    pub(crate) token: SharedToken,
}

impl BearerAuth {
    /// Wrap an existing shared token.
    pub fn new(token: SharedToken) -> Self {
        Self { token }
    }

    /// The `Authorization` header value, or `None` when the token is empty.
    pub fn header_value(&self) -> Option<String> {
        let token = self.token.read().unwrap_or_else(PoisonError::into_inner);
        if token.is_empty() {
            None
        } else {
            Some(format!("Bearer {token}"))
        }
    }

    /// The raw token, or `None` when empty.
    pub fn current(&self) -> Option<String> {
        let token = self.token.read().unwrap_or_else(PoisonError::into_inner);
        (!token.is_empty()).then(|| token.clone())
    }

    /// A [`TokenFactory`] reading this token.
    pub fn factory(&self) -> TokenFactory {
        let auth = self.clone();
        Arc::new(move || auth.current())
    }
}
