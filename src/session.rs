//! The session handle: one client connection plus its plugin registry.
//!
//! A [`Session`] is a cheap-clone handle shared by reference across every
//! proxy derived from one site/entity tree. The registry behind it is read
//! on every conversion and mutated only by explicit registration calls;
//! hosts are expected to configure it before concurrent use begins.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::client::Client;
use crate::registry::Registry;

struct SessionInner {
    client: Box<dyn Client>,
    registry: RwLock<Registry>,
}

/// Shared handle to a client connection and the registry converting its
/// records.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// A session over a client, with the default registry (builtin typed
    /// entities, `Entity` fallback, `Site` site class).
    pub fn new(client: impl Client + 'static) -> Self {
        Self::with_registry(client, Registry::with_defaults())
    }

    /// A session with an explicitly configured registry. Sessions are
    /// independent: registrations on one never affect another.
    pub fn with_registry(client: impl Client + 'static, registry: Registry) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                client: Box::new(client),
                registry: RwLock::new(registry),
            }),
        }
    }

    /// The underlying RPC client.
    pub fn client(&self) -> &dyn Client {
        self.inner.client.as_ref()
    }

    /// Base URL of the remote site.
    pub fn base_url(&self) -> &str {
        self.inner.client.base_url()
    }

    /// Read access to the registry.
    pub fn registry(&self) -> RwLockReadGuard<'_, Registry> {
        // A poisoned lock only means a factory panicked mid-read; the map
        // itself is still consistent.
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access to the registry, for registration calls.
    pub fn registry_mut(&self) -> RwLockWriteGuard<'_, Registry> {
        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether two sessions share the same underlying connection.
    pub fn same_connection(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.base_url())
            .finish_non_exhaustive()
    }
}
