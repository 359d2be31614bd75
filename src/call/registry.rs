//! Process-wide table of active calls

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;

use super::{CallHandle, CallId, CallSession};
use crate::{Error, Result};

/// Active calls keyed by call identifier
///
/// The lock is never held across an await, so a slow call cannot stall
/// lookups for any other call.
pub struct CallRegistry {
    calls: RwLock<HashMap<CallId, Arc<CallHandle>>>,
    shutdown: watch::Sender<bool>,
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallRegistry {
    #[must_use]
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            calls: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    /// Register a new call and build its session
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateCall` if the id is already active, or
    /// `Error::ShuttingDown` once shutdown has been signalled
    pub fn create(
        &self,
        id: CallId,
        caller: impl Into<String>,
    ) -> Result<(Arc<CallHandle>, CallSession)> {
        let mut calls = self.write();

        if *self.shutdown.borrow() {
            return Err(Error::ShuttingDown);
        }
        if calls.contains_key(&id) {
            return Err(Error::DuplicateCall(id.to_string()));
        }

        let (session, handle) = CallSession::new(id.clone(), caller, self.shutdown.subscribe());
        let handle = Arc::new(handle);
        calls.insert(id, Arc::clone(&handle));
        Ok((handle, session))
    }

    /// Look up an active call
    ///
    /// # Errors
    ///
    /// Returns `Error::CallNotFound` if the id is not active
    pub fn get(&self, id: &CallId) -> Result<Arc<CallHandle>> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::CallNotFound(id.to_string()))
    }

    /// Remove a call from the table
    ///
    /// # Errors
    ///
    /// Returns `Error::CallNotFound` if the id is not active
    pub fn remove(&self, id: &CallId) -> Result<Arc<CallHandle>> {
        self.write()
            .remove(id)
            .ok_or_else(|| Error::CallNotFound(id.to_string()))
    }

    /// All active calls, in no particular order
    #[must_use]
    pub fn list(&self) -> Vec<Arc<CallHandle>> {
        self.read().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Refuse new calls and tell every session to close
    pub fn signal_shutdown(&self) {
        // Take the write lock so no create() can slip in after the flag flips
        let _calls = self.write();
        self.shutdown.send_replace(true);
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Receiver that flips to `true` on shutdown
    #[must_use]
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<CallId, Arc<CallHandle>>> {
        self.calls.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CallId, Arc<CallHandle>>> {
        self.calls.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_get_returns_same_call() {
        let registry = CallRegistry::new();
        let (handle, session) = registry.create(CallId::new("a"), "100").unwrap();

        let found = registry.get(&CallId::new("a")).unwrap();
        assert!(Arc::ptr_eq(&handle, &found));
        assert_eq!(session.id(), found.call_id());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let registry = CallRegistry::new();
        let _first = registry.create(CallId::new("a"), "100").unwrap();

        let err = registry.create(CallId::new("a"), "200").err().unwrap();
        assert!(matches!(err, Error::DuplicateCall(id) if id == "a"));
        assert_eq!(registry.get(&CallId::new("a")).unwrap().caller(), "100");
    }

    #[test]
    fn remove_then_get_is_not_found() {
        let registry = CallRegistry::new();
        let _call = registry.create(CallId::new("a"), "100").unwrap();

        registry.remove(&CallId::new("a")).unwrap();
        assert!(matches!(
            registry.get(&CallId::new("a")),
            Err(Error::CallNotFound(_))
        ));
        assert!(matches!(
            registry.remove(&CallId::new("a")),
            Err(Error::CallNotFound(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn shutdown_refuses_new_calls() {
        let registry = CallRegistry::new();
        let mut rx = registry.subscribe_shutdown();
        registry.signal_shutdown();

        assert!(registry.is_shutting_down());
        assert!(rx.has_changed().unwrap());
        assert!(matches!(
            registry.create(CallId::new("late"), "100"),
            Err(Error::ShuttingDown)
        ));
        assert!(*rx.borrow_and_update());
    }

    #[test]
    fn sessions_see_shutdown() {
        let registry = CallRegistry::new();
        let (_handle, mut session) = registry.create(CallId::new("a"), "100").unwrap();
        registry.signal_shutdown();
        assert_eq!(
            session.interruption(),
            Some(crate::call::StopReason::Shutdown)
        );
    }

    #[test]
    fn concurrent_creates_on_distinct_ids() {
        let registry = Arc::new(CallRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry
                        .create(CallId::new(format!("chan-{i}")), "100")
                        .map(|(handle, _)| handle)
                })
            })
            .collect();

        for t in threads {
            assert!(t.join().unwrap().is_ok());
        }
        assert_eq!(registry.len(), 8);
    }
}
