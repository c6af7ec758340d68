//! Thread-safe token storage using Papaya HashMap

use crate::types::{Scope, Token};
use papaya::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

/// Thread-safe token store using Papaya HashMap
///
/// Holds at most one token per scope. Cloning shares the same map.
#[derive(Clone)]
pub struct TokenStore {
    tokens: Arc<HashMap<Scope, Token>>,
}

impl TokenStore {
    /// Create a new token store
    pub fn new() -> Self {
        Self {
            tokens: Arc::new(HashMap::new()),
        }
    }

    /// Store a token, replacing any previous one for its scope
    pub fn store(&self, token: Token) {
        self.tokens.pin().insert(token.scope, token);
    }

    /// Get the token for a scope, expired or not
    pub fn get(&self, scope: Scope) -> Option<Token> {
        self.tokens.pin().get(&scope).cloned()
    }

    /// Get the token for a scope only if it is still valid at `now`
    pub fn get_valid(&self, scope: Scope, now: Instant) -> Option<Token> {
        self.tokens
            .pin()
            .get(&scope)
            .filter(|token| token.is_valid_at(now))
            .cloned()
    }

    /// Remove the token for a scope
    pub fn remove(&self, scope: Scope) {
        self.tokens.pin().remove(&scope);
    }

    /// Remove the token for a scope only if it still holds `value`
    ///
    /// Returns `true` when an entry was removed. A token stored by a newer
    /// exchange is left in place.
    pub fn remove_if_value(&self, scope: Scope, value: &str) -> bool {
        matches!(
            self.tokens
                .pin()
                .remove_if(&scope, |_, token| token.value == value),
            Ok(Some(_))
        )
    }

    /// Check if a token exists for a scope
    pub fn contains(&self, scope: Scope) -> bool {
        self.tokens.pin().contains_key(&scope)
    }

    /// Get all scopes with stored tokens
    pub fn scopes(&self) -> Vec<Scope> {
        self.tokens.pin().iter().map(|(k, _)| *k).collect()
    }

    /// Clear all stored tokens
    pub fn clear(&self) {
        self.tokens.pin().clear();
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}
