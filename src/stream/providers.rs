//! Capabilities a stream session borrows from its host application.
//!
//! The session never looks up credentials or the current household on its
//! own; both are injected through these traits.

use std::sync::RwLock;

use secrecy::SecretString;

/// Supplies a bearer token at the moment a connection is attempted.
pub trait TokenSupplier: Send + Sync {
    /// Returns the token to attach, or `None` to send no `Authorization`
    /// header.
    fn bearer_token(&self) -> Option<SecretString>;
}

impl<F> TokenSupplier for F
where
    F: Fn() -> Option<SecretString> + Send + Sync,
{
    fn bearer_token(&self) -> Option<SecretString> {
        self()
    }
}

/// Token supplier that always returns the same secret.
#[derive(Clone)]
pub struct StaticToken(SecretString);

impl StaticToken {
    pub fn new(token: SecretString) -> Self {
        Self(token)
    }
}

impl TokenSupplier for StaticToken {
    fn bearer_token(&self) -> Option<SecretString> {
        Some(self.0.clone())
    }
}

/// Read access to the subscription the user is currently following.
///
/// Reconnects resolve their target through this store rather than reusing the
/// identifier of the dropped connection.
pub trait SubscriptionStore: Send + Sync {
    fn current_subscription(&self) -> Option<String>;
}

/// In-memory [`SubscriptionStore`] for hosts without durable storage.
#[derive(Debug, Default)]
pub struct MemorySubscriptionStore {
    current: RwLock<Option<String>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscription(subscription_id: impl Into<String>) -> Self {
        Self {
            current: RwLock::new(Some(subscription_id.into())),
        }
    }

    pub fn set(&self, subscription_id: impl Into<String>) {
        if let Ok(mut guard) = self.current.write() {
            *guard = Some(subscription_id.into());
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.current.write() {
            *guard = None;
        }
    }
}

impl SubscriptionStore for MemorySubscriptionStore {
    fn current_subscription(&self) -> Option<String> {
        self.current.read().ok().and_then(|guard| guard.clone())
    }
}

#[cfg(test)]
mod tests {
    use secrecy::{ExposeSecret, SecretString};

    use super::{MemorySubscriptionStore, StaticToken, SubscriptionStore, TokenSupplier};

    #[test]
    fn closure_acts_as_token_supplier() {
        let supplier = || Some(SecretString::new("abc".to_string()));
        let token = supplier.bearer_token().expect("token");
        assert_eq!(token.expose_secret(), "abc");
    }

    #[test]
    fn static_token_repeats_secret() {
        let supplier = StaticToken::new(SecretString::new("fixed".to_string()));
        for _ in 0..2 {
            let token = supplier.bearer_token().expect("token");
            assert_eq!(token.expose_secret(), "fixed");
        }
    }

    #[test]
    fn memory_store_tracks_latest_subscription() {
        let store = MemorySubscriptionStore::new();
        assert_eq!(store.current_subscription(), None);

        store.set("household-1");
        store.set("household-2");
        assert_eq!(store.current_subscription().as_deref(), Some("household-2"));

        store.clear();
        assert_eq!(store.current_subscription(), None);
    }
}
