//! I/O 指标聚合
//!
//! 以 (dev << 32) | (ino & 0xFFFFFFFF) 为键的 LRU 表（默认 4096 项），
//! 每个文件累计读写次数、字节数与延迟。被淘汰的键历史直接丢弃

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use nfs_trace_core::{IdentityRecord, METRICS_CAPACITY};

use crate::store::LruStore;

/// 文件聚合键
#[inline]
pub fn composite_key(dev: u64, ino: u64) -> u64 {
    (dev << 32) | (ino & 0xFFFF_FFFF)
}

/// 拆分聚合键为 (dev, ino 低 32 位)
#[inline]
pub fn split_key(key: u64) -> (u32, u32) {
    ((key >> 32) as u32, (key & 0xFFFF_FFFF) as u32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    Read,
    Write,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Labels {
    pod: String,
    container: String,
}

/// 单个文件的累计计数；计数器全部原子累加，多 CPU 并发写同一键安全
#[derive(Debug, Default)]
pub struct IoAggregate {
    read_count: AtomicU64,
    read_bytes: AtomicU64,
    read_latency_ns: AtomicU64,
    write_count: AtomicU64,
    write_bytes: AtomicU64,
    write_latency_ns: AtomicU64,
    labels: RwLock<Labels>,
}

/// 只在单次探针调用内使用，不跨调用保存
pub type AggregateHandle = Arc<IoAggregate>;

impl IoAggregate {
    /// latency_ns 为 None 表示没有拿到锚点：次数和字节照加，延迟不加
    pub fn accumulate(&self, direction: IoDirection, bytes: u64, latency_ns: Option<u64>) {
        let (count, total, latency) = match direction {
            IoDirection::Read => (&self.read_count, &self.read_bytes, &self.read_latency_ns),
            IoDirection::Write => (&self.write_count, &self.write_bytes, &self.write_latency_ns),
        };
        if let Some(ns) = latency_ns {
            latency.fetch_add(ns, Ordering::Relaxed);
        }
        count.fetch_add(1, Ordering::Relaxed);
        total.fetch_add(bytes, Ordering::Relaxed);
    }

    /// 身份命中时覆盖 pod / container；未命中保持原值
    pub fn enrich(&self, identity: Option<&IdentityRecord>) -> bool {
        let Some(identity) = identity else {
            return false;
        };
        let mut labels = self.labels.write().unwrap_or_else(PoisonError::into_inner);
        labels.pod.clone_from(&identity.pod);
        labels.container.clone_from(&identity.container);
        true
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        let labels = self
            .labels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        AggregateSnapshot {
            read_count: self.read_count.load(Ordering::Relaxed),
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            read_latency_ns: self.read_latency_ns.load(Ordering::Relaxed),
            write_count: self.write_count.load(Ordering::Relaxed),
            write_bytes: self.write_bytes.load(Ordering::Relaxed),
            write_latency_ns: self.write_latency_ns.load(Ordering::Relaxed),
            pod: labels.pod,
            container: labels.container,
        }
    }
}

/// 某一时刻的计数快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateSnapshot {
    pub read_count: u64,
    pub read_bytes: u64,
    pub read_latency_ns: u64,
    pub write_count: u64,
    pub write_bytes: u64,
    pub write_latency_ns: u64,
    pub pod: String,
    pub container: String,
}

pub struct MetricsAggregator {
    store: LruStore<u64, AggregateHandle>,
    evictions: AtomicU64,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::with_capacity(METRICS_CAPACITY)
    }
}

impl MetricsAggregator {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            store: LruStore::with_capacity(capacity),
            evictions: AtomicU64::new(0),
        }
    }

    /// 查找或创建键对应的聚合；表满时淘汰最久未访问的键
    pub fn get_or_create(&self, key: u64) -> AggregateHandle {
        let (handle, evicted) = self.store.get_or_insert_with(key, AggregateHandle::default);
        if evicted.is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        handle
    }

    pub fn accumulate_read(&self, handle: &AggregateHandle, bytes: u64, latency_ns: Option<u64>) {
        handle.accumulate(IoDirection::Read, bytes, latency_ns);
    }

    pub fn accumulate_write(&self, handle: &AggregateHandle, bytes: u64, latency_ns: Option<u64>) {
        handle.accumulate(IoDirection::Write, bytes, latency_ns);
    }

    pub fn enrich(&self, handle: &AggregateHandle, identity: Option<&IdentityRecord>) -> bool {
        handle.enrich(identity)
    }

    /// 读取单个键，不影响淘汰顺序
    pub fn get(&self, key: u64) -> Option<AggregateSnapshot> {
        self.store.peek(&key).map(|h| h.snapshot())
    }

    /// 全部键的快照，最近访问的在前
    pub fn snapshot(&self) -> Vec<(u64, AggregateSnapshot)> {
        self.store
            .entries()
            .into_iter()
            .map(|(key, h)| (key, h.snapshot()))
            .collect()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub(crate) fn clear(&self) {
        self.store.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_composite_key_layout() {
        let key = composite_key(0x31, 0x1_0000_0042);
        assert_eq!(key, 0x0000_0031_0000_0042);
        assert_eq!(split_key(key), (0x31, 0x42));
    }

    #[test]
    fn test_missing_latency_still_counts() {
        let agg = MetricsAggregator::default();
        let h = agg.get_or_create(1);
        agg.accumulate_read(&h, 4096, Some(1_000));
        agg.accumulate_read(&h, 4096, None);
        agg.accumulate_write(&h, 512, None);

        let snap = agg.get(1).unwrap();
        assert_eq!(snap.read_count, 2);
        assert_eq!(snap.read_bytes, 8192);
        assert_eq!(snap.read_latency_ns, 1_000);
        assert_eq!(snap.write_count, 1);
        assert_eq!(snap.write_latency_ns, 0);
    }

    #[test]
    fn test_lru_eviction_discards_history() {
        let agg = MetricsAggregator::with_capacity(2);
        let a = agg.get_or_create(composite_key(1, 1));
        agg.accumulate_read(&a, 100, Some(10));
        let b = agg.get_or_create(composite_key(1, 2));
        agg.accumulate_write(&b, 200, Some(20));

        // 再次访问 a，b 成为最久未访问
        agg.get_or_create(composite_key(1, 1));
        agg.get_or_create(composite_key(1, 3));

        assert_eq!(agg.evictions(), 1);
        assert!(agg.get(composite_key(1, 2)).is_none());
        assert_eq!(agg.get(composite_key(1, 1)).unwrap().read_bytes, 100);

        let fresh = agg.get_or_create(composite_key(1, 2));
        assert_eq!(fresh.snapshot(), AggregateSnapshot::default());
    }

    #[test]
    fn test_enrich_only_on_hit() {
        let agg = MetricsAggregator::default();
        let h = agg.get_or_create(9);
        assert!(!agg.enrich(&h, None));
        assert_eq!(h.snapshot().pod, "");

        let id = IdentityRecord::new("web-0", "nginx", 1);
        assert!(agg.enrich(&h, Some(&id)));
        assert!(!agg.enrich(&h, None));
        let snap = h.snapshot();
        assert_eq!(snap.pod, "web-0");
        assert_eq!(snap.container, "nginx");
    }

    #[test]
    fn test_concurrent_accumulate_same_key() {
        let agg = Arc::new(MetricsAggregator::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let agg = Arc::clone(&agg);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let h = agg.get_or_create(42);
                        agg.accumulate_read(&h, 1, Some(2));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = agg.get(42).unwrap();
        assert_eq!(snap.read_count, 8000);
        assert_eq!(snap.read_bytes, 8000);
        assert_eq!(snap.read_latency_ns, 16000);
    }
}
