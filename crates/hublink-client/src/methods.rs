//! Method registry
//!
//! Named handlers for hub-initiated direct methods. Registration order is
//! replay order: on every reconnect the session task re-binds every
//! registered name on the fresh receiver, oldest first, before the client
//! signals connected.

use async_trait::async_trait;
use hublink_core::{ClientError, MethodInvocation};
use std::future::Future;
use std::sync::Arc;

// ----------------------------------------------------------------------------
// Method Handler
// ----------------------------------------------------------------------------

/// Handles one direct method invocation.
///
/// Each invocation runs on its own spawned task, so a slow handler never
/// stalls the session loop or other handlers.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(&self, invocation: MethodInvocation);
}

#[async_trait]
impl<F, Fut> MethodHandler for F
where
    F: Fn(MethodInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn handle(&self, invocation: MethodInvocation) {
        self(invocation).await;
    }
}

// ----------------------------------------------------------------------------
// Method Registry
// ----------------------------------------------------------------------------

/// Insertion-ordered handler registry. One handler per name, for the
/// lifetime of the client.
pub(crate) struct MethodRegistry {
    entries: Vec<(String, Arc<dyn MethodHandler>)>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        MethodRegistry {
            entries: Vec::new(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Register a handler. Duplicate names are rejected and the original
    /// handler stays in place.
    pub fn register(
        &mut self,
        name: String,
        handler: Arc<dyn MethodHandler>,
    ) -> Result<(), ClientError> {
        if self.contains(&name) {
            return Err(ClientError::DuplicateRegistration { name });
        }
        self.entries.push((name, handler));
        Ok(())
    }

    /// Drop a name, e.g. to roll back a registration whose bind failed.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| n != name);
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn MethodHandler>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, handler)| Arc::clone(handler))
    }

    /// Names in registration order, for replay on a fresh receiver.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Registered handler total (for testing)
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop() -> Arc<dyn MethodHandler> {
        Arc::new(|_invocation: MethodInvocation| async {})
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let mut registry = MethodRegistry::new();
        registry.register("reboot".into(), noop()).unwrap();
        let err = registry.register("reboot".into(), noop()).unwrap_err();
        assert!(matches!(
            err,
            ClientError::DuplicateRegistration { name } if name == "reboot"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_names_keep_registration_order() {
        let mut registry = MethodRegistry::new();
        for name in ["reboot", "factory_reset", "ping"] {
            registry.register(name.into(), noop()).unwrap();
        }
        assert_eq!(registry.names(), vec!["reboot", "factory_reset", "ping"]);
    }

    #[test]
    fn test_remove_rolls_a_registration_back() {
        let mut registry = MethodRegistry::new();
        registry.register("reboot".into(), noop()).unwrap();
        registry.register("ping".into(), noop()).unwrap();
        registry.remove("reboot");
        assert!(!registry.contains("reboot"));
        assert_eq!(registry.names(), vec!["ping"]);
    }

    #[tokio::test]
    async fn test_closure_handlers_run() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&hits);
        let handler: Arc<dyn MethodHandler> = Arc::new(move |_invocation: MethodInvocation| {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
            }
        });

        let mut registry = MethodRegistry::new();
        registry.register("ping".into(), handler).unwrap();
        let found = registry.lookup("ping").expect("registered handler");
        found
            .handle(MethodInvocation::new("ping", "req-1", b"".to_vec()))
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
