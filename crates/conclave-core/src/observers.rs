//! Ordered observer registries
//!
//! One registry per event kind. Observers run in registration order; an
//! observer that errors or panics is logged and skipped, and the remaining
//! observers still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::warn;

type Observer<E> = Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>;

/// Ordered list of callbacks for one event kind
pub struct ObserverRegistry<E> {
    name: &'static str,
    observers: RwLock<Vec<Observer<E>>>,
}

impl<E> ObserverRegistry<E> {
    /// Create an empty registry; `name` labels log lines
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Append an observer
    pub fn register<F>(&self, observer: F)
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        observers.push(Arc::new(observer));
    }

    /// Number of registered observers
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether no observers are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every observer; returns how many succeeded
    pub fn notify(&self, event: &E) -> usize {
        let mut delivered = 0;
        for (index, observer) in self.snapshot().into_iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| observer(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(registry = self.name, index, error = %e, "Observer failed");
                }
                Err(_) => {
                    warn!(registry = self.name, index, "Observer panicked");
                }
            }
        }
        delivered
    }

    // Observers run outside the lock so they may register further observers
    fn snapshot(&self) -> Vec<Observer<E>> {
        self.observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl<E> std::fmt::Debug for ObserverRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("name", &self.name)
            .field("observers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_failures_are_isolated() {
        let registry: ObserverRegistry<u32> = ObserverRegistry::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        registry.register(move |v| {
            s.lock().unwrap().push(("first", *v));
            Ok(())
        });
        registry.register(|_| anyhow::bail!("observer exploded"));
        registry.register(|_| panic!("observer panicked"));
        let s = seen.clone();
        registry.register(move |v| {
            s.lock().unwrap().push(("last", *v));
            Ok(())
        });

        assert_eq!(registry.notify(&7), 2);
        assert_eq!(*seen.lock().unwrap(), vec![("first", 7), ("last", 7)]);
    }

    #[test]
    fn test_empty_registry() {
        let registry: ObserverRegistry<()> = ObserverRegistry::new("empty");
        assert!(registry.is_empty());
        assert_eq!(registry.notify(&()), 0);
    }
}
