//! Bounded caches for hot chain data
//!
//! The state store keeps the most recently touched blocks and accounts in
//! memory behind true-LRU eviction:
//! - recent blocks, keyed by height (100 entry default)
//! - accounts, keyed by address (1000 entry default)

use crate::account::Account;
use crate::block::Block;
use crate::crypto::Address;
use lru::LruCache;
use std::hash::Hash;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};

/// A trait for generic cache operations, so the shared wrapper works over
/// both evicting and unbounded backends.
pub trait CacheInner<K, V> {
    /// Retrieve a value without promoting it in the eviction order.
    fn peek_value<Q: ?Sized>(&self, key: &Q) -> Option<&V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq;

    /// Insert a value, evicting per the backend's policy.
    fn put(&mut self, key: K, value: V);

    /// Remove a value.
    fn remove<Q: ?Sized>(&mut self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq;

    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> CacheInner<K, V> for LruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn peek_value<Q: ?Sized>(&self, key: &Q) -> Option<&V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq,
    {
        self.peek(key)
    }

    fn put(&mut self, key: K, value: V) {
        self.put(key, value);
    }

    fn remove<Q: ?Sized>(&mut self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq,
    {
        self.pop(key)
    }

    fn clear(&mut self) {
        self.clear();
    }

    fn len(&self) -> usize {
        self.len()
    }
}

/// Generic, thread-safe cache wrapper.
#[derive(Debug)]
pub struct SharedCache<K, V, T: CacheInner<K, V>> {
    cache: Arc<RwLock<T>>,
    _phantom: PhantomData<(K, V)>,
}

impl<K, V> SharedCache<K, V, LruCache<K, V>>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a new LRU cache with the given capacity (0 is clamped to 1).
    pub fn new_lru(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        SharedCache {
            cache: Arc::new(RwLock::new(LruCache::new(capacity))),
            _phantom: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cache.read().map(|c| c.cap().get()).unwrap_or(0)
    }
}

impl<K, V, T: CacheInner<K, V>> SharedCache<K, V, T>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn get<Q: ?Sized>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq,
    {
        self.cache
            .read()
            .ok()
            .and_then(|c| c.peek_value(key).cloned())
    }

    pub fn put(&self, key: K, value: V) {
        if let Ok(mut cache) = self.cache.write() {
            cache.put(key, value);
        }
    }

    pub fn remove<Q: ?Sized>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq,
    {
        self.cache.write().ok().and_then(|mut c| c.remove(key))
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V, T: CacheInner<K, V>> Clone for SharedCache<K, V, T> {
    fn clone(&self) -> Self {
        SharedCache {
            cache: Arc::clone(&self.cache),
            _phantom: PhantomData,
        }
    }
}

/// Cache for recent blocks, keyed by height.
pub type BlockCache = SharedCache<u64, Block, LruCache<u64, Block>>;

impl BlockCache {
    pub const DEFAULT_CAPACITY: usize = 100;
}

/// Cache for recently touched accounts, keyed by address.
pub type AccountCache = SharedCache<Address, Account, LruCache<Address, Account>>;

impl AccountCache {
    pub const DEFAULT_CAPACITY: usize = 1000;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Amount;

    #[test]
    fn test_account_cache_round_trip() {
        let cache = AccountCache::new_lru(10);
        let addr = Address::derive(b"cache-test");
        let mut account = Account::new(addr.clone());
        account.mint(Amount::from_u64(7)).unwrap();

        cache.put(addr.clone(), account.clone());
        let fetched = cache.get(&addr).unwrap();
        assert_eq!(fetched.balance, Amount::from_u64(7));

        assert!(cache.remove(&addr).is_some());
        assert!(cache.get(&addr).is_none());
    }

    #[test]
    fn test_lru_eviction_drops_oldest() {
        let cache: SharedCache<u64, u64, LruCache<u64, u64>> = SharedCache::new_lru(3);
        for i in 0..3 {
            cache.put(i, i * 10);
        }
        assert_eq!(cache.len(), 3);

        cache.put(3, 30);
        assert_eq!(cache.len(), 3);
        assert!(cache.get(&0).is_none());
        assert_eq!(cache.get(&3), Some(30));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache: SharedCache<u64, u64, LruCache<u64, u64>> = SharedCache::new_lru(0);
        assert_eq!(cache.capacity(), 1);
        cache.put(1, 1);
        assert_eq!(cache.get(&1), Some(1));
    }
}
