//! Per-entity in-flight guard for mutations.

use crate::{Result, VaultError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone, Default)]
pub(crate) struct InFlight {
    active: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    fn active(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claim `key`, failing if a mutation on it is already running
    pub(crate) fn acquire(&self, key: String) -> Result<InFlightPermit> {
        if !self.active().insert(key.clone()) {
            return Err(VaultError::OperationInProgress(key));
        }
        Ok(InFlightPermit {
            active: Arc::clone(&self.active),
            key,
        })
    }

    #[cfg(test)]
    pub(crate) fn is_idle(&self) -> bool {
        self.active().is_empty()
    }
}

/// Releases its key when dropped
pub(crate) struct InFlightPermit {
    active: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        active.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_released() {
        let guard = InFlight::default();

        let permit = guard.acquire("credential 1".to_string()).unwrap();
        assert!(matches!(
            guard.acquire("credential 1".to_string()),
            Err(VaultError::OperationInProgress(_))
        ));

        // Other keys are independent
        let other = guard.acquire("credential 2".to_string()).unwrap();

        drop(permit);
        drop(other);
        assert!(guard.is_idle());
        guard.acquire("credential 1".to_string()).unwrap();
    }
}
