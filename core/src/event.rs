use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DecodeError;
use crate::{COMM_LEN, DOMAIN_LEN, LABEL_LEN, NAME_LEN};

/// 三类输出流
/// 使用点分格式，便于跨语言协作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "nfs.rpc_task")]
    RpcTask,        // 文件操作与 RPC 生命周期
    #[serde(rename = "nfs.path_segment")]
    PathSegment,    // 路径段
    #[serde(rename = "net.dns")]
    Dns,            // DNS 查询
}

/// 固定布局记录：内核态与用户态共享同一字节布局（小端，含 C 对齐填充）
pub trait Record: Sized {
    /// 编码后的字节数
    const SIZE: usize;
    const KIND: EventKind;

    fn encode(&self, buf: &mut BytesMut);

    fn decode(buf: &[u8]) -> Result<Self, DecodeError>;

    /// 渲染为 JSONL 行使用的 JSON 值
    fn to_json(&self) -> serde_json::Value;
}

fn ensure_len(record: &'static str, need: usize, buf: &[u8]) -> Result<(), DecodeError> {
    if buf.len() < need {
        return Err(DecodeError::TooShort {
            record,
            need,
            got: buf.len(),
        });
    }
    Ok(())
}

/// 定长、NUL 结尾的字节串（对应 C 的 `char name[N]`）
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FixedStr<const N: usize>([u8; N]);

impl<const N: usize> FixedStr<N> {
    /// 截断拷贝，保留至少一个结尾 NUL
    pub fn from_bytes(src: &[u8]) -> Self {
        let mut out = [0u8; N];
        let n = src.len().min(N.saturating_sub(1));
        out[..n].copy_from_slice(&src[..n]);
        Self(out)
    }

    /// 原样拷贝全部 N 字节（不强制 NUL 结尾）
    pub fn from_raw(raw: [u8; N]) -> Self {
        Self(raw)
    }

    /// 第一个 NUL 之前的内容
    pub fn as_bytes(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(N);
        &self.0[..end]
    }

    pub fn raw(&self) -> &[u8; N] {
        &self.0
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).trim().to_string()
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }

    fn get(buf: &mut &[u8]) -> Self {
        let mut out = [0u8; N];
        buf.copy_to_slice(&mut out);
        Self(out)
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self([0u8; N])
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

/// 文件操作事件（struct rpc_task_fields）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RpcTaskEvent {
    pub pid: i32,
    pub mount_id: i32,
    pub pod: FixedStr<LABEL_LEN>,
    pub container: FixedStr<LABEL_LEN>,
    pub caller_addr: u64,
    pub dev_id: u32,
    pub file_id: u32,
    pub key: u64, // (dev << 32) | (ino & 0xFFFFFFFF)
}

impl Record for RpcTaskEvent {
    const SIZE: usize = 232;
    const KIND: EventKind = EventKind::RpcTask;

    fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(Self::SIZE);
        buf.put_i32_le(self.pid);
        buf.put_i32_le(self.mount_id);
        self.pod.put(buf);
        self.container.put(buf);
        buf.put_u64_le(self.caller_addr);
        buf.put_u32_le(self.dev_id);
        buf.put_u32_le(self.file_id);
        buf.put_u64_le(self.key);
    }

    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        ensure_len("RpcTaskEvent", Self::SIZE, buf)?;
        Ok(Self {
            pid: buf.get_i32_le(),
            mount_id: buf.get_i32_le(),
            pod: FixedStr::get(&mut buf),
            container: FixedStr::get(&mut buf),
            caller_addr: buf.get_u64_le(),
            dev_id: buf.get_u32_le(),
            file_id: buf.get_u32_le(),
            key: buf.get_u64_le(),
        })
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "event_type": Self::KIND,
            "pid": self.pid,
            "mount_id": self.mount_id,
            "pod": self.pod.to_string_lossy(),
            "container": self.container.to_string_lossy(),
            "caller_addr": format!("{:#x}", self.caller_addr),
            "dev_id": self.dev_id,
            "file_id": self.file_id,
            "key": self.key,
        })
    }
}

/// 路径段事件（struct path_segment）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathSegmentEvent {
    pub file_id: u64,
    pub dev_id: u64,
    pub len: u32,
    pub is_complete: bool,
    pub depth: u8,
    pub name: FixedStr<NAME_LEN>,
}

impl PathSegmentEvent {
    const PADDING: usize = 6;
}

impl Record for PathSegmentEvent {
    const SIZE: usize = 128;
    const KIND: EventKind = EventKind::PathSegment;

    fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(Self::SIZE);
        buf.put_u64_le(self.file_id);
        buf.put_u64_le(self.dev_id);
        buf.put_u32_le(self.len);
        buf.put_u8(self.is_complete as u8);
        buf.put_u8(self.depth);
        self.name.put(buf);
        buf.put_bytes(0, Self::PADDING);
    }

    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        ensure_len("PathSegmentEvent", Self::SIZE, buf)?;
        Ok(Self {
            file_id: buf.get_u64_le(),
            dev_id: buf.get_u64_le(),
            len: buf.get_u32_le(),
            is_complete: buf.get_u8() != 0,
            depth: buf.get_u8(),
            name: FixedStr::get(&mut buf),
        })
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "event_type": Self::KIND,
            "file_id": self.file_id,
            "dev_id": self.dev_id,
            "len": self.len,
            "is_complete": self.is_complete,
            "depth": self.depth,
            "name": self.name.to_string_lossy(),
        })
    }
}

/// DNS 查询事件（struct dns_event）
/// domain 保存报文头之后的原始字节（label 编码），用 `decode_domain` 还原
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DnsEvent {
    pub pid: u32,
    pub len: u32,
    pub comm: FixedStr<COMM_LEN>,
    pub domain: FixedStr<DOMAIN_LEN>,
}

impl Record for DnsEvent {
    const SIZE: usize = 308;
    const KIND: EventKind = EventKind::Dns;

    fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(Self::SIZE);
        buf.put_u32_le(self.pid);
        buf.put_u32_le(self.len);
        self.comm.put(buf);
        self.domain.put(buf);
    }

    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        ensure_len("DnsEvent", Self::SIZE, buf)?;
        Ok(Self {
            pid: buf.get_u32_le(),
            len: buf.get_u32_le(),
            comm: FixedStr::get(&mut buf),
            domain: FixedStr::get(&mut buf),
        })
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "event_type": Self::KIND,
            "pid": self.pid,
            "len": self.len,
            "comm": self.comm.to_string_lossy(),
            "domain": decode_domain(self.domain.as_bytes()),
        })
    }
}

/// 解码 DNS label 序列：`\x03www\x07example\x03com\x00` -> `www.example.com`
pub fn decode_domain(query: &[u8]) -> String {
    let mut labels: Vec<String> = Vec::new();
    let mut rest = query;
    while let Some((&len, tail)) = rest.split_first() {
        let len = len as usize;
        // 0 结束；>63 是压缩指针，查询里不应出现
        if len == 0 || len > 63 || tail.len() < len {
            break;
        }
        labels.push(String::from_utf8_lossy(&tail[..len]).into_owned());
        rest = &tail[len..];
    }
    labels.join(".")
}
