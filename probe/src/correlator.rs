//! 生命周期关联器
//!
//! begin -> dispatched -> end 三段状态机：
//! 1. nfs_initiate_read/write 记录 pid 的起始时间（OperationStart）
//! 2. RPC 任务开始时把起始时间挂到 task_id 上（RpcTaskLink）
//! 3. RPC 任务结束时把起始时间转成 pid 的延迟锚点（LatencyAnchor）
//! 4. I/O 完成回调取走锚点计算延迟
//!
//! 链上任何一环缺失都只是静默终止该次关联，不是错误

use nfs_trace_core::LINK_CAPACITY;

use crate::store::BoundedMap;

/// 某进程最近一次发起的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationStart {
    pub pid: u32,
    pub tid: u32,
    pub start_ns: u64,
}

/// 已派发到 RPC 任务的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcTaskLink {
    pub task_id: u64,
    pub pid: u32,
    pub tid: u32,
    pub start_ns: u64,
}

pub struct LifecycleCorrelator {
    starts: BoundedMap<u32, OperationStart>,
    links: BoundedMap<u64, RpcTaskLink>,
    anchors: BoundedMap<u32, u64>,
}

impl Default for LifecycleCorrelator {
    fn default() -> Self {
        Self::with_capacity(LINK_CAPACITY)
    }
}

impl LifecycleCorrelator {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            starts: BoundedMap::with_capacity(capacity),
            links: BoundedMap::with_capacity(capacity),
            anchors: BoundedMap::with_capacity(capacity),
        }
    }

    /// 记录 pid 的起始时间，无条件覆盖尚未消费的旧值
    pub fn record_start(&self, pid: u32, tid: u32, now_ns: u64) -> u64 {
        let start = OperationStart {
            pid,
            tid,
            start_ns: now_ns,
        };
        // 表满时丢弃
        let _ = self.starts.insert(pid, start);
        now_ns
    }

    /// 把 pid 的起始时间挂到 task_id 上；pid 没有起始记录时跳过
    pub fn link_task(&self, pid: u32, tid: u32, task_id: u64) -> bool {
        let Some(start) = self.starts.get(&pid) else {
            return false;
        };
        let link = RpcTaskLink {
            task_id,
            pid,
            tid,
            start_ns: start.start_ns,
        };
        self.links.insert(task_id, link).is_ok()
    }

    /// RPC 任务结束：把起始时间提升为 pid 的延迟锚点并删除 task 关联。
    /// 同一 pid 的锚点后写覆盖先写
    pub fn record_task_done(&self, task_id: u64) -> bool {
        let Some(link) = self.links.get(&task_id) else {
            return false;
        };
        if self.anchors.insert(link.pid, link.start_ns).is_err() {
            return false;
        }
        self.links.remove(&task_id);
        true
    }

    /// 取走并删除 pid 的延迟锚点
    pub fn consume_anchor(&self, pid: u32) -> Option<u64> {
        self.anchors.remove(&pid)
    }

    pub fn pending_start(&self, pid: u32) -> Option<OperationStart> {
        self.starts.get(&pid)
    }

    pub fn pending_link(&self, task_id: u64) -> Option<RpcTaskLink> {
        self.links.get(&task_id)
    }

    /// (starts, links, anchors) 三张表的条目数
    pub fn occupancy(&self) -> (usize, usize, usize) {
        (self.starts.len(), self.links.len(), self.anchors.len())
    }

    pub(crate) fn clear(&self) {
        self.starts.clear();
        self.links.clear();
        self.anchors.clear();
    }
}
