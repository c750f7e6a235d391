//! DNS 查询提取
//!
//! 挂在 udp_sendmsg 上：只看目的端口 53 的报文，从 msghdr.msg_iter 找到第一个 iovec，
//! 跳过 12 字节报文头，从发送进程的用户地址空间读出查询内容。
//!
//! struct iov_iter 的布局随内核变化，按内核版本选三种读取方式之一：
//! - Legacy（4.19 ~ 5.0）：`unsigned int type` + 联合体里的 iovec 指针 + nr_segs
//! - Mid（5.10 ~ 6.0）：同形，类型标记缩成 `u8 iter_type`
//! - Modern（6.8+）：ITER_UBUF 时 iovec 内联在迭代器里，否则是 iovec 数组指针

use thiserror::Error;

use nfs_trace_core::layout::{IOVEC_BASE, IOVEC_LEN, IOVEC_SIZE};
use nfs_trace_core::{
    DnsEvent, FixedStr, KernelLayout, KernelVersion, COMM_LEN, DNS_HEADER_LEN, DNS_PORT,
    DOMAIN_LEN,
};

pub use nfs_trace_core::event::decode_domain;

use crate::context::TaskContext;
use crate::memory::{field, Addr, MemoryReader, ReadError};

/// sizeof(struct iov_iter)，三代布局相同
pub const IOV_ITER_SIZE: usize = 40;

/// ITER_UBUF 的类型值（6.8+）
const ITER_UBUF: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DnsError {
    #[error("destination port {0} is not DNS")]
    NotDns(u16),
    #[error("unsupported kernel version {0}")]
    Unsupported(KernelVersion),
    #[error("kernel version unknown")]
    UnknownVersion,
    #[error("message has no io vector")]
    NoVector,
    #[error("payload of {0} bytes holds no question")]
    ShortPayload(u64),
    #[error(transparent)]
    Read(#[from] ReadError),
}

/// udp_sendmsg(struct sock *sk, struct msghdr *msg, size_t len) 的前两个参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendMsg {
    pub sock: Addr,
    pub msg: Addr,
}

/// 解析出的 iovec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoVector {
    pub base: Addr,
    pub len: u64,
}

/// struct iov_iter 的三种布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterLayout {
    /// 4.19 ~ 5.0：`unsigned int type`
    Legacy,
    /// 5.10 ~ 6.0：`u8 iter_type`。iovec 指针与 nr_segs 的偏移和 Legacy 相同，
    /// 只有类型标记宽度不同；类型标记两者都不参与判断，读取行为一致
    Mid,
    /// 6.8+：ITER_UBUF 时 iovec 内联在偏移 16
    Modern,
}

struct IterOffsets {
    tag: usize,
    tag_width: usize,
    vector: usize,
    nr_segs: usize,
}

impl IterLayout {
    /// 按内核版本选择布局；不在已知区间内返回 None
    pub fn for_kernel(version: KernelVersion) -> Option<Self> {
        if version >= KernelVersion::new(4, 19, 0) && version < KernelVersion::new(5, 0, 0) {
            Some(Self::Legacy)
        } else if version >= KernelVersion::new(5, 10, 0) && version < KernelVersion::new(6, 0, 0)
        {
            Some(Self::Mid)
        } else if version >= KernelVersion::new(6, 8, 0) {
            Some(Self::Modern)
        } else {
            None
        }
    }

    const fn offsets(self) -> IterOffsets {
        match self {
            Self::Legacy => IterOffsets {
                tag: 0,
                tag_width: 4,
                vector: 24,
                nr_segs: 32,
            },
            Self::Mid => IterOffsets {
                tag: 0,
                tag_width: 1,
                vector: 24,
                nr_segs: 32,
            },
            Self::Modern => IterOffsets {
                tag: 0,
                tag_width: 1,
                vector: 16,
                nr_segs: 32,
            },
        }
    }

    /// 从迭代器副本中取第一个 iovec
    pub fn first_vector<M>(self, mem: &M, iter: &[u8; IOV_ITER_SIZE]) -> Result<IoVector, DnsError>
    where
        M: MemoryReader + ?Sized,
    {
        let off = self.offsets();
        let tag = read_le(iter, off.tag, off.tag_width);

        if self == Self::Modern && tag as u8 == ITER_UBUF {
            return Ok(IoVector {
                base: read_le(iter, off.vector + IOVEC_BASE as usize, 8),
                len: read_le(iter, off.vector + IOVEC_LEN as usize, 8),
            });
        }

        if read_le(iter, off.nr_segs, 8) == 0 {
            return Err(DnsError::NoVector);
        }
        let iov = read_le(iter, off.vector, 8);
        if iov == 0 {
            return Err(DnsError::NoVector);
        }
        let mut raw = [0u8; IOVEC_SIZE];
        mem.read_kernel(iov, &mut raw)?;
        Ok(IoVector {
            base: read_le(&raw, IOVEC_BASE as usize, 8),
            len: read_le(&raw, IOVEC_LEN as usize, 8),
        })
    }
}

fn read_le(buf: &[u8], offset: usize, width: usize) -> u64 {
    let mut b = [0u8; 8];
    b[..width].copy_from_slice(&buf[offset..offset + width]);
    u64::from_le_bytes(b)
}

/// 一次 DNS 查询
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery {
    pub pid: u32,
    /// 整个 UDP 载荷长度（含报文头）
    pub len: u32,
    pub comm: FixedStr<COMM_LEN>,
    /// 报文头之后的原始字节
    pub domain: Vec<u8>,
}

impl DnsQuery {
    pub fn to_event(&self) -> DnsEvent {
        DnsEvent {
            pid: self.pid,
            len: self.len,
            comm: self.comm,
            domain: FixedStr::from_bytes(&self.domain),
        }
    }

    pub fn name(&self) -> String {
        decode_domain(&self.domain)
    }
}

pub struct DnsExtractor {
    layout: KernelLayout,
    version: Option<KernelVersion>,
}

impl DnsExtractor {
    pub fn new(layout: KernelLayout, version: Option<KernelVersion>) -> Self {
        Self { layout, version }
    }

    pub fn version(&self) -> Option<KernelVersion> {
        self.version
    }

    /// 提取查询；非 53 端口最先返回
    pub fn extract<M>(&self, mem: &M, task: &TaskContext, msg: SendMsg) -> Result<DnsQuery, DnsError>
    where
        M: MemoryReader + ?Sized,
    {
        let mut port = [0u8; 2];
        mem.read_kernel(field(msg.sock, self.layout.sock_skc_dport)?, &mut port)?;
        let dport = u16::from_be_bytes(port);
        if dport != DNS_PORT {
            return Err(DnsError::NotDns(dport));
        }

        let version = self.version.ok_or(DnsError::UnknownVersion)?;
        let iter_layout = IterLayout::for_kernel(version).ok_or(DnsError::Unsupported(version))?;

        let mut iter = [0u8; IOV_ITER_SIZE];
        mem.read_kernel(field(msg.msg, self.layout.msghdr_msg_iter)?, &mut iter)?;
        let iov = iter_layout.first_vector(mem, &iter)?;
        if iov.base == 0 {
            return Err(ReadError::Null.into());
        }
        if iov.len <= DNS_HEADER_LEN {
            return Err(DnsError::ShortPayload(iov.len));
        }

        let read_len = ((iov.len - DNS_HEADER_LEN) as usize).min(DOMAIN_LEN);
        let mut domain = vec![0u8; read_len];
        mem.read_user(task.pid, iov.base + DNS_HEADER_LEN, &mut domain)?;

        Ok(DnsQuery {
            pid: task.pid,
            len: iov.len as u32,
            comm: FixedStr::from_bytes(&task.comm),
            domain,
        })
    }
}
