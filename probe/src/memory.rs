//! 内存读取接口
//!
//! 对应 bpf_probe_read_kernel / bpf_probe_read_kernel_str / bpf_probe_read_user。
//! 任何读取失败都只返回 `ReadError`，由探针入口吞掉

use thiserror::Error;

/// 内核或用户态地址
pub type Addr = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("null pointer dereference")]
    Null,
    #[error("kernel address {addr:#x} not readable ({len} bytes)")]
    Kernel { addr: Addr, len: usize },
    #[error("user address {addr:#x} of pid {pid} not readable ({len} bytes)")]
    User { pid: u32, addr: Addr, len: usize },
}

pub trait MemoryReader: Send + Sync {
    /// 从内核地址空间读取 buf.len() 字节
    fn read_kernel(&self, addr: Addr, buf: &mut [u8]) -> Result<(), ReadError>;

    /// 读取 NUL 结尾字符串，返回写入 buf 的字节数（不含 NUL）；
    /// buf 总以 NUL 结尾
    fn read_kernel_str(&self, addr: Addr, buf: &mut [u8]) -> Result<usize, ReadError>;

    /// 从进程 pid 的用户地址空间读取；页面不在内存时允许失败
    fn read_user(&self, pid: u32, addr: Addr, buf: &mut [u8]) -> Result<(), ReadError>;
}

impl<M: MemoryReader + ?Sized> MemoryReader for std::sync::Arc<M> {
    fn read_kernel(&self, addr: Addr, buf: &mut [u8]) -> Result<(), ReadError> {
        (**self).read_kernel(addr, buf)
    }

    fn read_kernel_str(&self, addr: Addr, buf: &mut [u8]) -> Result<usize, ReadError> {
        (**self).read_kernel_str(addr, buf)
    }

    fn read_user(&self, pid: u32, addr: Addr, buf: &mut [u8]) -> Result<(), ReadError> {
        (**self).read_user(pid, addr, buf)
    }
}

/// 定宽读取辅助函数（小端）
pub trait MemoryReaderExt: MemoryReader {
    fn read_u16(&self, addr: Addr) -> Result<u16, ReadError> {
        let mut b = [0u8; 2];
        self.read_kernel(addr, &mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn read_u32(&self, addr: Addr) -> Result<u32, ReadError> {
        let mut b = [0u8; 4];
        self.read_kernel(addr, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn read_u64(&self, addr: Addr) -> Result<u64, ReadError> {
        let mut b = [0u8; 8];
        self.read_kernel(addr, &mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    /// 读取指针字段，空指针视为失败
    fn read_ptr(&self, addr: Addr) -> Result<Addr, ReadError> {
        match self.read_u64(addr)? {
            0 => Err(ReadError::Null),
            p => Ok(p),
        }
    }
}

impl<M: MemoryReader + ?Sized> MemoryReaderExt for M {}

/// 结构体字段地址：base + offset，base 为空时失败
#[inline]
pub(crate) fn field(base: Addr, offset: u64) -> Result<Addr, ReadError> {
    if base == 0 {
        return Err(ReadError::Null);
    }
    Ok(base.wrapping_add(offset))
}
