//! 路径重建
//!
//! 从文件的 dentry 沿 d_parent 向上走到挂载点根，每一层输出一个路径段。
//! 步数上限 MAX_PATH_DEPTH 是硬性安全约束：到达上限的最后一段标记为完整。
//! 任意一步读取失败即截断，不另行报错

use std::num::NonZeroUsize;

use lru::LruCache;

use nfs_trace_core::layout::{QSTR_LEN, QSTR_NAME};
use nfs_trace_core::{FixedStr, KernelLayout, PathSegmentEvent, MAX_PATH_DEPTH, NAME_LEN};

use crate::aggregator::composite_key;
use crate::memory::{field, Addr, MemoryReader, MemoryReaderExt, ReadError};

/// 惰性、有限的路径段序列
pub struct PathWalker<'a, M: ?Sized> {
    mem: &'a M,
    layout: &'a KernelLayout,
    current: Option<Addr>,
    root: Addr,
    file_id: u64,
    dev_id: u64,
    depth: usize,
    max_depth: usize,
}

impl<'a, M: MemoryReader + ?Sized> PathWalker<'a, M> {
    pub fn new(
        mem: &'a M,
        layout: &'a KernelLayout,
        leaf: Addr,
        root: Addr,
        file_id: u64,
        dev_id: u64,
    ) -> Self {
        Self {
            mem,
            layout,
            current: Some(leaf),
            root,
            file_id,
            dev_id,
            depth: 0,
            max_depth: MAX_PATH_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.clamp(1, u8::MAX as usize);
        self
    }

    /// 读取当前层；段先生成，父指针读取失败只影响下一步
    fn step(&self, dentry: Addr) -> Result<(PathSegmentEvent, Option<Addr>), ReadError> {
        let d_name = field(dentry, self.layout.dentry_d_name)?;
        let len = self.mem.read_u32(d_name + QSTR_LEN)?;
        let name_ptr = self.mem.read_ptr(d_name + QSTR_NAME)?;

        let mut name = [0u8; NAME_LEN];
        self.mem.read_kernel_str(name_ptr, &mut name)?;

        let segment = PathSegmentEvent {
            file_id: self.file_id,
            dev_id: self.dev_id,
            len,
            is_complete: dentry == self.root || self.depth >= self.max_depth - 1,
            depth: self.depth as u8,
            name: FixedStr::from_raw(name),
        };

        let next = match self.mem.read_u64(dentry + self.layout.dentry_d_parent) {
            Ok(parent) if parent != 0 && parent != dentry && dentry != self.root => Some(parent),
            _ => None,
        };
        Ok((segment, next))
    }
}

impl<M: MemoryReader + ?Sized> Iterator for PathWalker<'_, M> {
    type Item = PathSegmentEvent;

    fn next(&mut self) -> Option<Self::Item> {
        if self.depth >= self.max_depth {
            return None;
        }
        let dentry = self.current.take()?;
        let (segment, next) = self.step(dentry).ok()?;
        self.current = next;
        self.depth += 1;
        Some(segment)
    }
}

/// 逐段重建并立即交给 `emit`，返回输出的段数
pub fn reconstruct<M, F>(
    mem: &M,
    layout: &KernelLayout,
    leaf: Addr,
    root: Addr,
    file_id: u64,
    dev_id: u64,
    mut emit: F,
) -> usize
where
    M: MemoryReader + ?Sized,
    F: FnMut(&PathSegmentEvent),
{
    let mut emitted = 0;
    for segment in PathWalker::new(mem, layout, leaf, root, file_id, dev_id) {
        emit(&segment);
        emitted += 1;
    }
    emitted
}

/// 同时等待完整段的文件数上限
pub const ASSEMBLER_CAPACITY: usize = 1024;

/// 消费端：按 (dev, file) 缓存路径段，收到完整段后拼出路径。
/// depth 0 的段开启新一轮遍历，丢弃该文件上一轮未完成的段；
/// 未完成的文件超过容量时淘汰最久未更新的
pub struct PathAssembler {
    partial: LruCache<u64, Vec<PathSegmentEvent>>,
}

impl Default for PathAssembler {
    fn default() -> Self {
        Self::with_capacity(ASSEMBLER_CAPACITY)
    }
}

impl PathAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            partial: LruCache::new(capacity),
        }
    }

    /// 返回拼好的 (key, path)；路径未完整时返回 None
    pub fn push(&mut self, segment: PathSegmentEvent) -> Option<(u64, String)> {
        let key = composite_key(segment.dev_id, segment.file_id);
        if segment.depth == 0 {
            self.partial.pop(&key);
        }
        let complete = segment.is_complete;
        self.partial.get_or_insert_mut(key, Vec::new).push(segment);
        if !complete {
            return None;
        }
        let segments = self.partial.pop(&key)?;
        Some((key, rebuild_path(segments)))
    }

    /// 等待完整段的文件数
    pub fn pending(&self) -> usize {
        self.partial.len()
    }
}

/// 根在前拼接路径段，折叠重复的分隔符
pub fn rebuild_path(mut segments: Vec<PathSegmentEvent>) -> String {
    segments.sort_by(|a, b| b.depth.cmp(&a.depth));

    let mut path = String::new();
    for seg in &segments {
        let name = String::from_utf8_lossy(seg.name.as_bytes());
        if name != "/" {
            path.push('/');
        }
        path.push_str(&name);
    }
    while path.contains("//") {
        path = path.replace("//", "/");
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeMemory;

    fn walk(mem: &FakeMemory, leaf: Addr, root: Addr) -> Vec<PathSegmentEvent> {
        PathWalker::new(mem, &mem.layout, leaf, root, 42, 7).collect()
    }

    #[test]
    fn test_four_level_chain() {
        let mem = FakeMemory::default();
        let chain = mem.dentry_chain(&["/", "dir1", "dir2", "leaf"]);
        let segs = walk(&mem, chain[3], chain[0]);

        assert_eq!(segs.len(), 4);
        let depths: Vec<u8> = segs.iter().map(|s| s.depth).collect();
        assert_eq!(depths, vec![0, 1, 2, 3]);
        let complete: Vec<bool> = segs.iter().map(|s| s.is_complete).collect();
        assert_eq!(complete, vec![false, false, false, true]);
        assert_eq!(segs[0].name.as_bytes(), b"leaf");
        assert_eq!(segs[0].len, 4);
        assert_eq!((segs[0].file_id, segs[0].dev_id), (42, 7));
    }

    #[test]
    fn test_chain_deeper_than_bound() {
        let mem = FakeMemory::default();
        let names: Vec<String> = (0..15).map(|i| format!("d{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let chain = mem.dentry_chain(&refs);

        let segs = walk(&mem, chain[14], chain[0]);
        assert_eq!(segs.len(), MAX_PATH_DEPTH);
        assert!(segs[..MAX_PATH_DEPTH - 1].iter().all(|s| !s.is_complete));
        assert!(segs[MAX_PATH_DEPTH - 1].is_complete);
        assert_eq!(segs[MAX_PATH_DEPTH - 1].name.as_bytes(), b"d5");
    }

    #[test]
    fn test_self_parent_stops_early_incomplete() {
        let mem = FakeMemory::default();
        let chain = mem.dentry_chain(&["top", "a", "b"]);
        // 挂载点根不在链上
        let unrelated = mem.dentry("/", None);
        let segs = walk(&mem, chain[2], unrelated);

        assert_eq!(segs.len(), 3);
        assert!(segs.iter().all(|s| !s.is_complete));
    }

    #[test]
    fn test_failed_name_read_truncates() {
        let mem = FakeMemory::default();
        let chain = mem.dentry_chain(&["/", "mid", "leaf"]);
        // 让 mid 的名字指针指向未映射地址
        mem.write_u64(
            chain[1] + mem.layout.dentry_d_name + QSTR_NAME,
            0xdead_0000_0000,
        );
        let segs = walk(&mem, chain[2], chain[0]);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].name.as_bytes(), b"leaf");
    }

    #[test]
    fn test_reconstruct_emits_each_segment() {
        let mem = FakeMemory::default();
        let chain = mem.dentry_chain(&["/", "export", "data.bin"]);
        let mut seen = Vec::new();
        let n = reconstruct(&mem, &mem.layout, chain[2], chain[0], 1, 2, |s| {
            seen.push(s.depth)
        });
        assert_eq!(n, 3);
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn test_assembler_rebuilds_root_first() {
        let mem = FakeMemory::default();
        let chain = mem.dentry_chain(&["/", "export", "logs", "app.log"]);
        let mut assembler = PathAssembler::new();
        let mut done = None;
        for seg in walk(&mem, chain[3], chain[0]) {
            if let Some(result) = assembler.push(seg) {
                done = Some(result);
            }
        }
        let (key, path) = done.unwrap();
        assert_eq!(key, composite_key(7, 42));
        assert_eq!(path, "/export/logs/app.log");
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_assembler_drops_truncated_walk() {
        let mem = FakeMemory::default();
        let chain = mem.dentry_chain(&["/", "mid", "leaf"]);
        let mut assembler = PathAssembler::new();

        // 第一轮只拿到叶子
        let first = walk(&mem, chain[2], chain[0]);
        assert!(assembler.push(first[0]).is_none());
        assert_eq!(assembler.pending(), 1);

        let mut done = None;
        for seg in walk(&mem, chain[2], chain[0]) {
            if let Some(result) = assembler.push(seg) {
                done = Some(result);
            }
        }
        assert_eq!(done.map(|(_, p)| p).as_deref(), Some("/mid/leaf"));
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_assembler_bounds_incomplete_files() {
        let mut assembler = PathAssembler::with_capacity(2);
        for file_id in 0..5 {
            let seg = PathSegmentEvent {
                file_id,
                dev_id: 1,
                name: FixedStr::from_bytes(b"x"),
                ..Default::default()
            };
            assert!(assembler.push(seg).is_none());
        }
        assert_eq!(assembler.pending(), 2);
    }

    #[test]
    fn test_custom_depth_bound() {
        let mem = FakeMemory::default();
        let chain = mem.dentry_chain(&["/", "a", "b", "c"]);
        let segs: Vec<_> = PathWalker::new(&mem, &mem.layout, chain[3], chain[0], 1, 1)
            .with_max_depth(2)
            .collect();
        assert_eq!(segs.len(), 2);
        assert!(!segs[0].is_complete);
        assert!(segs[1].is_complete);
    }
}
