//! Write Client Registry
//!
//! Authenticated clients are expensive to build and safe to share, so one is
//! cached per distinct [`ClientKey`] and handed to sessions as `Arc<C>`.
//! The registry is an explicit value owned by the application; `shutdown`
//! releases every cached client exactly once.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Releases a client's connections
pub trait ShutdownClient: Send + Sync {
    fn shutdown(&self);
}

/// Identity of a write client. Two keys are equal iff every field is equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientKey {
    /// Stable identity of the credentials (e.g. service account email)
    pub credentials_id: String,
    /// Service endpoint override; `None` uses the default endpoint
    pub endpoint: Option<String>,
    /// Extra request headers; ordered so equal sets hash equally
    pub headers: BTreeMap<String, String>,
}

impl ClientKey {
    pub fn new(credentials_id: impl Into<String>) -> Self {
        ClientKey {
            credentials_id: credentials_id.into(),
            endpoint: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Cache of one shared client per key
pub struct ClientRegistry<C: ShutdownClient> {
    clients: Mutex<HashMap<ClientKey, Arc<C>>>,
}

impl<C: ShutdownClient> Default for ClientRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ShutdownClient> ClientRegistry<C> {
    pub fn new() -> Self {
        ClientRegistry {
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Cached client for `key`, building it with `create` on first use.
    ///
    /// The lock is held across `create`, so concurrent callers with the same
    /// key never build two clients. A failed build caches nothing.
    pub fn get_or_create<E>(
        &self,
        key: &ClientKey,
        create: impl FnOnce(&ClientKey) -> Result<C, E>,
    ) -> Result<Arc<C>, E> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(key) {
            return Ok(Arc::clone(client));
        }

        let client = Arc::new(create(key)?);
        debug!(
            credentials = %key.credentials_id,
            endpoint = key.endpoint.as_deref().unwrap_or("default"),
            "write client created"
        );
        clients.insert(key.clone(), Arc::clone(&client));
        Ok(client)
    }

    pub fn get(&self, key: &ClientKey) -> Option<Arc<C>> {
        self.clients.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &ClientKey) -> bool {
        self.clients.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Shut down and forget every cached client
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.clients.lock().drain().collect();
        for (key, client) in &drained {
            debug!(credentials = %key.credentials_id, "shutting down write client");
            client.shutdown();
        }
        info!(clients = drained.len(), "write client registry shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingClient {
        shutdowns: AtomicU32,
    }

    impl ShutdownClient for CountingClient {
        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn build(_: &ClientKey) -> Result<CountingClient, String> {
        Ok(CountingClient::default())
    }

    #[test]
    fn test_same_key_shares_client() {
        let registry = ClientRegistry::new();
        let key = ClientKey::new("svc@project").with_header("x-goog-user-project", "p");

        let a = registry.get_or_create(&key, build).unwrap();
        let b = registry
            .get_or_create(&key.clone(), |_| -> Result<CountingClient, String> {
                panic!("must not build twice")
            })
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_key_equality_covers_all_fields() {
        let base = ClientKey::new("svc@project");
        assert_ne!(base, base.clone().with_endpoint("localhost:9000"));
        assert_ne!(base, base.clone().with_header("h", "v"));
        assert_ne!(base, ClientKey::new("other@project"));

        let a = ClientKey::new("svc").with_header("a", "1").with_header("b", "2");
        let b = ClientKey::new("svc").with_header("b", "2").with_header("a", "1");
        assert_eq!(a, b);

        let registry = ClientRegistry::new();
        registry.get_or_create(&a, build).unwrap();
        assert!(registry.contains(&b));
    }

    #[test]
    fn test_failed_create_is_not_cached() {
        let registry: ClientRegistry<CountingClient> = ClientRegistry::new();
        let key = ClientKey::new("svc");

        let err = registry
            .get_or_create(&key, |_| Err::<CountingClient, _>("no credentials".to_string()))
            .err();
        assert_eq!(err.as_deref(), Some("no credentials"));
        assert!(registry.is_empty());

        registry.get_or_create(&key, build).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_shutdown_releases_each_client_once() {
        let registry = ClientRegistry::new();
        let a = registry.get_or_create(&ClientKey::new("a"), build).unwrap();
        let b = registry.get_or_create(&ClientKey::new("b"), build).unwrap();

        registry.shutdown();
        registry.shutdown();

        assert_eq!(a.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(b.shutdowns.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
        assert!(registry.get(&ClientKey::new("a")).is_none());
    }

    #[test]
    fn test_concurrent_get_or_create() {
        let registry = Arc::new(ClientRegistry::new());
        let created = Arc::new(AtomicU32::new(0));
        let key = ClientKey::new("shared");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let created = Arc::clone(&created);
                let key = key.clone();
                std::thread::spawn(move || {
                    registry
                        .get_or_create(&key, |_| {
                            created.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, String>(CountingClient::default())
                        })
                        .unwrap()
                })
            })
            .collect();

        let clients: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(clients.iter().all(|c| Arc::ptr_eq(c, &clients[0])));
    }
}
