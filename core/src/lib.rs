//! nfs-trace-core: 共享底座
//!
//! 包含输出记录（固定布局编解码）、身份映射记录、内核结构体偏移表、配置加载
//! 供 probe 引擎与下游消费者共同使用

pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod layout;

// 重新导出常用类型
pub use config::{Config, Features, KernelVersion};
pub use error::{ConfigError, DecodeError};
pub use event::{DnsEvent, FixedStr, PathSegmentEvent, Record, RpcTaskEvent};
pub use identity::IdentityRecord;
pub use layout::KernelLayout;

/// 路径重建最大深度（叶子为 0）
pub const MAX_PATH_DEPTH: usize = 10;

/// DNS 目的端口
pub const DNS_PORT: u16 = 53;

/// DNS 固定报文头长度
pub const DNS_HEADER_LEN: u64 = 12;

/// 路径段名字字段宽度
pub const NAME_LEN: usize = 100;

/// pod / container 字段宽度
pub const LABEL_LEN: usize = 100;

/// DNS 记录中进程名字段宽度
pub const COMM_LEN: usize = 100;

/// 内核 task comm 长度
pub const TASK_COMM_LEN: usize = 16;

/// DNS 记录中域名字段宽度
pub const DOMAIN_LEN: usize = 200;

/// 关联链三张表（OperationStart / RpcTaskLink / LatencyAnchor）的容量
pub const LINK_CAPACITY: usize = 1024;

/// pid -> 身份映射表容量
pub const IDENTITY_CAPACITY: usize = 1024;

/// I/O 聚合表（LRU）默认容量
pub const METRICS_CAPACITY: usize = 4096;

/// kprobe 可用的位置参数个数
pub const MAX_PROBE_ARGS: usize = 5;
