//! Session-owned registry of request callbacks.
//!
//! Callbacks are live closures and cannot travel to a worker, so a request
//! only carries a [`CallbackToken`]. The registry resolves tokens back to
//! closures when an outcome returns. Entries are removed once dispatched and
//! the whole registry is cleared when its session closes.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::response::{ErrorResponse, Response};

use super::types::CallbackToken;

/// Callback invoked with a successful response.
pub type SuccessCallback = Arc<dyn Fn(&Response) + Send + Sync>;

/// Callback invoked with an error response.
pub type ErrorCallback = Arc<dyn Fn(&ErrorResponse) + Send + Sync>;

#[derive(Default)]
struct Entries {
    success: HashMap<CallbackToken, SuccessCallback>,
    error: HashMap<CallbackToken, ErrorCallback>,
}

/// Token to callback mapping shared between request builders and the
/// dispatch path. Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    entries: Arc<RwLock<Entries>>,
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.read();
        f.debug_struct("CallbackRegistry")
            .field("success", &entries.success.len())
            .field("error", &entries.error.len())
            .finish()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a success callback and return its token.
    pub fn register_success<F>(&self, callback: F) -> CallbackToken
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        self.insert_success(Arc::new(callback))
    }

    /// Register an error callback and return its token.
    pub fn register_error<F>(&self, callback: F) -> CallbackToken
    where
        F: Fn(&ErrorResponse) + Send + Sync + 'static,
    {
        self.insert_error(Arc::new(callback))
    }

    pub(crate) fn insert_success(&self, callback: SuccessCallback) -> CallbackToken {
        let token = CallbackToken::generate();
        self.write().success.insert(token.clone(), callback);
        token
    }

    pub(crate) fn insert_error(&self, callback: ErrorCallback) -> CallbackToken {
        let token = CallbackToken::generate();
        self.write().error.insert(token.clone(), callback);
        token
    }

    /// Look up a success callback without removing it.
    pub fn success_callback(&self, token: &CallbackToken) -> Option<SuccessCallback> {
        self.read().success.get(token).cloned()
    }

    /// Look up an error callback without removing it.
    pub fn error_callback(&self, token: &CallbackToken) -> Option<ErrorCallback> {
        self.read().error.get(token).cloned()
    }

    /// Remove a token from the registry. Returns true if anything was removed.
    pub fn remove(&self, token: &CallbackToken) -> bool {
        let mut entries = self.write();
        let success = entries.success.remove(token).is_some();
        let error = entries.error.remove(token).is_some();
        success || error
    }

    /// Number of registered callbacks of both kinds.
    pub fn len(&self) -> usize {
        let entries = self.read();
        entries.success.len() + entries.error.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registered callback.
    pub fn clear(&self) {
        let mut entries = self.write();
        entries.success.clear();
        entries.error.clear();
    }

    // A callback that panicked while a guard was held must not wedge the registry.
    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_register_and_lookup() {
        let registry = CallbackRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let token = registry.register_success(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let callback = registry.success_callback(&token).unwrap();
        callback(&Response::new("req", 200, Vec::new(), HashMap::new()));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.error_callback(&token).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_tokens_are_unique() {
        let registry = CallbackRegistry::new();
        let a = registry.register_success(|_| {});
        let b = registry.register_success(|_| {});
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove() {
        let registry = CallbackRegistry::new();
        let token = registry.register_error(|_| {});

        assert!(registry.remove(&token));
        assert!(!registry.remove(&token));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear() {
        let registry = CallbackRegistry::new();
        registry.register_success(|_| {});
        registry.register_error(|_| {});

        registry.clear();

        assert!(registry.is_empty());
    }

    #[test]
    fn test_clones_share_entries() {
        let registry = CallbackRegistry::new();
        let handle = registry.clone();
        let token = handle.register_success(|_| {});

        assert!(registry.success_callback(&token).is_some());
        assert_eq!(format!("{:?}", registry), "CallbackRegistry { success: 1, error: 0 }");
    }
}
