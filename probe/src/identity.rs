//! pid -> {pod, container} 身份映射
//!
//! 由外部身份控制器维护（upsert / remove），引擎只做 resolve

use std::sync::Arc;

use nfs_trace_core::{IdentityRecord, IDENTITY_CAPACITY};

use crate::store::{BoundedMap, StoreError};

pub struct IdentityMap {
    entries: BoundedMap<u32, Arc<IdentityRecord>>,
}

impl Default for IdentityMap {
    fn default() -> Self {
        Self::with_capacity(IDENTITY_CAPACITY)
    }
}

impl IdentityMap {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: BoundedMap::with_capacity(capacity),
        }
    }

    /// 外部控制器写入；表满时拒绝
    pub fn upsert(&self, pid: u32, record: IdentityRecord) -> Result<(), StoreError> {
        self.entries.insert(pid, Arc::new(record))
    }

    pub fn remove(&self, pid: u32) -> Option<Arc<IdentityRecord>> {
        self.entries.remove(&pid)
    }

    /// 尽力查询，未命中返回 None
    pub fn resolve(&self, pid: u32) -> Option<Arc<IdentityRecord>> {
        self.entries.get(&pid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
