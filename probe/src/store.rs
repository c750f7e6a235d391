//! 有界键值表
//!
//! `BoundedMap` 对应 BPF_MAP_TYPE_HASH：表满时拒绝新键；
//! `LruStore` 对应 BPF_MAP_TYPE_LRU_HASH：表满时淘汰最久未访问的键。
//! 两者都不阻塞调用方，也不会无限增长

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("map full ({capacity} entries)")]
    Full { capacity: usize },
}

/// 定容哈希表
pub struct BoundedMap<K, V> {
    inner: DashMap<K, V>,
    len: AtomicUsize,
    capacity: usize,
}

impl<K: Eq + Hash, V: Clone> BoundedMap<K, V> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: DashMap::with_capacity(capacity),
            len: AtomicUsize::new(0),
            capacity,
        }
    }

    /// 插入或覆盖；键不存在且表已满时失败
    pub fn insert(&self, key: K, value: V) -> Result<(), StoreError> {
        match self.inner.entry(key) {
            Entry::Occupied(mut e) => {
                e.insert(value);
            }
            Entry::Vacant(e) => {
                let capacity = self.capacity;
                self.len
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < capacity).then_some(n + 1)
                    })
                    .map_err(|_| StoreError::Full { capacity })?;
                e.insert(value);
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key).map(|v| v.value().clone())
    }

    /// 取出并删除；键不存在时返回 None
    pub fn remove(&self, key: &K) -> Option<V> {
        let (_, v) = self.inner.remove(key)?;
        // 与 clear 并发时计数可能已归零，不下溢
        let _ = self
            .len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        Some(v)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.inner.clear();
        self.len.store(0, Ordering::Release);
    }
}

/// 定容 LRU 表
/// 锁只覆盖查找/插入本身，值通常是 `Arc`，后续累加不持锁
pub struct LruStore<K: Hash + Eq, V> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> LruStore<K, V> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 查找并刷新访问时间；不存在时插入 `init()`。
    /// 返回值以及因插入而被淘汰的旧条目
    pub fn get_or_insert_with<F>(&self, key: K, init: F) -> (V, Option<(K, V)>)
    where
        F: FnOnce() -> V,
    {
        let mut cache = self.lock();
        if let Some(v) = cache.get(&key) {
            return (v.clone(), None);
        }
        let value = init();
        let evicted = cache.push(key, value.clone());
        (value, evicted)
    }

    /// 查找并刷新访问时间
    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().get(key).cloned()
    }

    /// 查找但不影响淘汰顺序
    pub fn peek(&self, key: &K) -> Option<V> {
        self.lock().peek(key).cloned()
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().pop(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    /// 全部条目，最近访问的在前
    pub fn entries(&self) -> Vec<(K, V)> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_bounded_map_rejects_when_full() {
        let map = BoundedMap::with_capacity(2);
        map.insert(1u32, 10u64).unwrap();
        map.insert(2, 20).unwrap();
        assert_eq!(map.insert(3, 30), Err(StoreError::Full { capacity: 2 }));
        assert!(!map.contains_key(&3));

        // 覆盖已有键不受容量限制
        map.insert(1, 11).unwrap();
        assert_eq!(map.get(&1), Some(11));

        assert_eq!(map.remove(&2), Some(20));
        assert_eq!(map.remove(&2), None);
        map.insert(3, 30).unwrap();
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_bounded_map_capacity_holds_under_contention() {
        let map = Arc::new(BoundedMap::with_capacity(64));
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for i in 0..100u32 {
                        let _ = map.insert(t * 1000 + i, i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(map.len(), 64);
    }

    #[test]
    fn test_remove_after_clear_keeps_accepting_inserts() {
        let map = BoundedMap::with_capacity(2);
        map.insert(1u32, 1u32).unwrap();
        map.len.store(0, Ordering::Release);
        // 计数已被清零时删除不应下溢
        assert_eq!(map.remove(&1), Some(1));
        assert_eq!(map.len(), 0);
        map.insert(2, 2).unwrap();
        map.insert(3, 3).unwrap();
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_lru_store_evicts_least_recently_touched() {
        let store = LruStore::with_capacity(2);
        store.get_or_insert_with(1u64, || "a");
        store.get_or_insert_with(2, || "b");
        // 访问 1，使 2 成为最久未访问
        let (v, evicted) = store.get_or_insert_with(1, || "x");
        assert_eq!(v, "a");
        assert!(evicted.is_none());

        let (_, evicted) = store.get_or_insert_with(3, || "c");
        assert_eq!(evicted, Some((2, "b")));
        assert!(store.peek(&2).is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_lru_store_zero_capacity_is_clamped() {
        let store: LruStore<u64, u64> = LruStore::with_capacity(0);
        assert_eq!(store.capacity(), 1);
    }
}
