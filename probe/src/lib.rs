//! nfs-trace-probe: NFS / RPC / DNS 事件关联引擎
//!
//! 每个探针入口对应一个内核挂载点，可在多个 CPU 上并发执行；
//! 所有共享状态都是有界表，入口函数不阻塞、不失败

/// 探针内部调试日志，仅在配置打开 debug_log 时输出
macro_rules! probe_debug {
    ($cfg:expr, $($arg:tt)+) => {
        if $cfg.debug_log {
            log::debug!(target: "nfs_trace::probe", $($arg)+);
        }
    };
}

pub mod aggregator;
pub mod clock;
pub mod context;
pub mod correlator;
pub mod dns;
pub mod emitter;
pub mod engine;
pub mod identity;
pub mod memory;
pub mod path;
pub mod probes;
pub mod store;

#[cfg(test)]
mod testutil;

pub use aggregator::{composite_key, split_key, AggregateSnapshot, MetricsAggregator};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use context::{ProbeArgs, TaskContext};
pub use correlator::LifecycleCorrelator;
pub use dns::{decode_domain, DnsExtractor, DnsQuery, IterLayout};
pub use emitter::{EventStreams, RecordStream};
pub use engine::{AttachError, DetachStats, Engine};
pub use identity::IdentityMap;
pub use memory::{Addr, MemoryReader, MemoryReaderExt, ReadError};
pub use path::{rebuild_path, PathAssembler, PathWalker};
pub use probes::{ProbeTable, ProbeTableError};
