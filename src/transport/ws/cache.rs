//! Connection cache
//!
//! Maps peer host identity (port discarded) to the open tunnel connection,
//! so outbound dials reuse warm tunnels and inbound accepts recognize
//! already-connected peers. One implementation covers both deployment
//! profiles: bounded with LRU eviction, or unbounded.
//!
//! Insertion is atomic insert-if-absent under a single lock; two racing
//! dials to one peer cannot silently overwrite (and leak) each other's
//! connection. The loser receives the cached winner and must hard-close its
//! redundant connection.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::common::{split_host_port, Address, Conn, Result};

/// Outcome of [`ConnStore::insert_or_get`]
pub enum CacheInsert {
    /// The connection was stored. When the bounded profile evicted the
    /// least-recently-used entry to make room, it is returned here and the
    /// caller must pair the eviction with exactly one physical close.
    Inserted { evicted: Option<Arc<dyn Conn>> },
    /// The host was already cached; the stored connection is returned and
    /// the caller's candidate must not be registered.
    Existing(Arc<dyn Conn>),
}

/// Host-identity-keyed store of open tunnel connections
pub struct ConnStore {
    inner: Mutex<LruCache<String, Arc<dyn Conn>>>,
}

impl ConnStore {
    /// `capacity: Some(n)` bounds the store to `n` entries with LRU
    /// eviction; `None` leaves it unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        let cache = match capacity.and_then(NonZeroUsize::new) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };

        Self {
            inner: Mutex::new(cache),
        }
    }

    /// Store `conn` under the host identity of `addr` unless one is already
    /// present. Fails only if the address cannot be reduced to a host.
    pub fn insert_or_get(&self, addr: &Address, conn: Arc<dyn Conn>) -> Result<CacheInsert> {
        let key = host_key(addr)?;
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.get(&key) {
            debug!("cache hit for {}, reusing connection", key);

            return Ok(CacheInsert::Existing(existing.clone()));
        }

        // Key is absent, so anything push() hands back is a capacity
        // eviction of the least-recently-used peer.
        let evicted = inner.push(key, conn).map(|(host, old)| {
            debug!("cache full, evicting {}", host);

            old
        });

        Ok(CacheInsert::Inserted { evicted })
    }

    /// Look up the connection for the host identity of `addr`. A miss is
    /// `Ok(None)`, not an error.
    pub fn get(&self, addr: &Address) -> Result<Option<Arc<dyn Conn>>> {
        let key = host_key(addr)?;

        Ok(self.inner.lock().get(&key).cloned())
    }

    /// Remove and return the entry for `addr`. Idempotent; malformed input
    /// degrades to a no-op because callers rely on remove never failing
    /// during cleanup.
    pub fn remove(&self, addr: &Address) -> Option<Arc<dyn Conn>> {
        let key = host_key(addr).ok()?;

        self.inner.lock().pop(&key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn host_key(addr: &Address) -> Result<String> {
    split_host_port(&addr.to_string()).map(|(host, _)| host)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error::Error;

    /// Conn stub that counts physical closes
    struct StubConn {
        hard_closes: AtomicUsize,
    }

    impl StubConn {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                hard_closes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Conn for StubConn {
        async fn recv(&self, _buf: &mut [u8]) -> Result<usize> {
            Err(Error::Unsupported("stub".into()))
        }

        async fn send(&self, _buf: &[u8]) -> Result<usize> {
            Err(Error::Unsupported("stub".into()))
        }

        async fn recv_from(&self, _buf: &mut [u8]) -> Result<(usize, Address)> {
            Err(Error::Unsupported("stub".into()))
        }

        fn local_addr(&self) -> Option<Address> {
            None
        }

        fn remote_addr(&self) -> Option<Address> {
            None
        }

        fn set_read_timeout(&self, _limit: Option<Duration>) {}

        fn set_write_timeout(&self, _limit: Option<Duration>) {}

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        async fn hard_close(&self) -> Result<()> {
            self.hard_closes.fetch_add(1, Ordering::SeqCst);

            Ok(())
        }
    }

    fn addr(text: &str) -> Address {
        Address::Stream(text.parse().unwrap())
    }

    #[test]
    fn get_returns_stored_conn_for_any_port() {
        let store = ConnStore::new(None);
        let conn = StubConn::new();

        match store.insert_or_get(&addr("10.0.0.5:9000"), conn.clone()).unwrap() {
            CacheInsert::Inserted { evicted } => assert!(evicted.is_none()),
            CacheInsert::Existing(_) => panic!("store was empty"),
        }

        // Same host, different port: identity is host-scoped
        let found = store.get(&addr("10.0.0.5:1234")).unwrap().unwrap();
        let conn: Arc<dyn Conn> = conn;
        assert!(Arc::ptr_eq(&found, &conn));
    }

    #[test]
    fn miss_is_not_an_error() {
        let store = ConnStore::new(None);
        assert!(store.get(&addr("10.0.0.5:9000")).unwrap().is_none());
    }

    #[test]
    fn insert_or_get_returns_existing() {
        let store = ConnStore::new(None);
        let first = StubConn::new();
        let second = StubConn::new();

        store.insert_or_get(&addr("10.0.0.5:9000"), first.clone()).unwrap();

        match store.insert_or_get(&addr("10.0.0.5:9001"), second).unwrap() {
            CacheInsert::Existing(existing) => {
                let first: Arc<dyn Conn> = first;
                assert!(Arc::ptr_eq(&existing, &first));
            }
            CacheInsert::Inserted { .. } => panic!("expected the cached winner"),
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let store = ConnStore::new(None);
        store.insert_or_get(&addr("10.0.0.5:9000"), StubConn::new()).unwrap();

        assert!(store.remove(&addr("10.0.0.5:9000")).is_some());
        assert!(store.remove(&addr("10.0.0.5:9000")).is_none());
        assert!(store.remove(&addr("10.0.0.5:9000")).is_none());
    }

    #[tokio::test]
    async fn lru_eviction_closes_exactly_once() {
        let store = ConnStore::new(Some(2));
        let oldest = StubConn::new();

        store.insert_or_get(&addr("10.0.0.1:1"), oldest.clone()).unwrap();
        store.insert_or_get(&addr("10.0.0.2:1"), StubConn::new()).unwrap();

        // Third insert evicts the least-recently-used entry
        match store.insert_or_get(&addr("10.0.0.3:1"), StubConn::new()).unwrap() {
            CacheInsert::Inserted { evicted } => {
                let evicted = evicted.expect("bounded store must evict");
                evicted.hard_close().await.unwrap();
            }
            CacheInsert::Existing(_) => panic!("distinct host"),
        }

        assert_eq!(oldest.hard_closes.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 2);
        assert!(store.get(&addr("10.0.0.1:1")).unwrap().is_none());
    }

    #[test]
    fn get_touch_protects_entry_from_eviction() {
        let store = ConnStore::new(Some(2));
        store.insert_or_get(&addr("10.0.0.1:1"), StubConn::new()).unwrap();
        store.insert_or_get(&addr("10.0.0.2:1"), StubConn::new()).unwrap();

        // Touch the older entry, then overflow: the untouched one goes
        store.get(&addr("10.0.0.1:1")).unwrap();
        store.insert_or_get(&addr("10.0.0.3:1"), StubConn::new()).unwrap();

        assert!(store.get(&addr("10.0.0.1:1")).unwrap().is_some());
        assert!(store.get(&addr("10.0.0.2:1")).unwrap().is_none());
    }
}
