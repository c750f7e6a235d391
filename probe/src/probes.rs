//! 探针表：被监控的函数符号 -> 携带 `struct kiocb *` 的参数位置
//!
//! 所有文件操作入口共用一个分发函数，参数位置由表决定。
//! 表的文本格式为 `symbol:index,symbol:index`，index 取 1..=5

use std::collections::HashMap;
use std::str::FromStr;

use thiserror::Error;

use nfs_trace_core::MAX_PROBE_ARGS;

/// 缺省监控的 NFS 文件操作
pub const DEFAULT_PROBES: &[(&str, usize)] = &[
    ("nfs_file_read", 1),
    ("nfs_file_write", 1),
    ("nfs_file_direct_read", 1),
    ("nfs_file_direct_write", 1),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeTableError {
    #[error("probe entry {0:?} is not of the form symbol:index")]
    Malformed(String),
    #[error("argument index {index} of {symbol} is outside 1..={max}", max = MAX_PROBE_ARGS)]
    IndexOutOfRange { symbol: String, index: usize },
    #[error("probe {0} listed twice")]
    Duplicate(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTable {
    entries: HashMap<String, usize>,
}

impl Default for ProbeTable {
    fn default() -> Self {
        Self {
            entries: DEFAULT_PROBES
                .iter()
                .map(|(sym, idx)| (sym.to_string(), *idx))
                .collect(),
        }
    }
}

impl ProbeTable {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// 解析表；空串返回缺省表
    pub fn parse(text: &str) -> Result<Self, ProbeTableError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut table = Self::empty();
        for item in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (symbol, index) = item
                .split_once(':')
                .ok_or_else(|| ProbeTableError::Malformed(item.to_string()))?;
            let symbol = symbol.trim();
            let index: usize = index
                .trim()
                .parse()
                .map_err(|_| ProbeTableError::Malformed(item.to_string()))?;
            if symbol.is_empty() {
                return Err(ProbeTableError::Malformed(item.to_string()));
            }
            table.insert(symbol, index)?;
        }
        Ok(table)
    }

    pub fn insert(&mut self, symbol: &str, index: usize) -> Result<(), ProbeTableError> {
        if !(1..=MAX_PROBE_ARGS).contains(&index) {
            return Err(ProbeTableError::IndexOutOfRange {
                symbol: symbol.to_string(),
                index,
            });
        }
        if self.entries.contains_key(symbol) {
            return Err(ProbeTableError::Duplicate(symbol.to_string()));
        }
        self.entries.insert(symbol.to_string(), index);
        Ok(())
    }

    /// 符号对应的 kiocb 参数位置
    pub fn arg_index(&self, symbol: &str) -> Option<usize> {
        self.entries.get(symbol).copied()
    }

    /// 按符号排序，便于日志输出
    pub fn symbols(&self) -> Vec<&str> {
        let mut syms: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        syms.sort_unstable();
        syms
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromStr for ProbeTable {
    type Err = ProbeTableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
