//! 事件输出
//!
//! 三条独立的有界通道，每条只承载一种定长记录。
//! 发送永不阻塞：通道满或接收端已关闭时记录被丢弃并计数

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use nfs_trace_core::{DecodeError, DnsEvent, PathSegmentEvent, Record, RpcTaskEvent};

/// 发送端
pub struct Emitter<R> {
    tx: mpsc::Sender<Bytes>,
    dropped: Arc<AtomicU64>,
    _record: PhantomData<fn(R)>,
}

impl<R: Record> Emitter<R> {
    /// 编码并尝试发送；返回是否送达
    pub fn emit(&self, record: &R) -> bool {
        let mut buf = BytesMut::with_capacity(R::SIZE);
        record.encode(&mut buf);
        if self.tx.try_send(buf.freeze()).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 接收端，按记录类型解码
pub struct RecordStream<R> {
    rx: mpsc::Receiver<Bytes>,
    dropped: Arc<AtomicU64>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> RecordStream<R> {
    /// 等待下一条记录；发送端全部释放且缓冲读空后返回 None
    pub async fn recv(&mut self) -> Option<Result<R, DecodeError>> {
        let raw = self.rx.recv().await?;
        Some(R::decode(&raw))
    }

    /// 非阻塞读取
    pub fn try_recv(&mut self) -> Option<Result<R, DecodeError>> {
        let raw = self.rx.try_recv().ok()?;
        Some(R::decode(&raw))
    }

    /// 读出当前缓冲中的全部记录，解码失败的跳过
    pub fn drain(&mut self) -> Vec<R> {
        let mut out = Vec::new();
        while let Some(record) = self.try_recv() {
            if let Ok(record) = record {
                out.push(record);
            }
        }
        out
    }

    /// 原始字节（与内核态 perf 缓冲的载荷一致）
    pub async fn recv_raw(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// 发送端因通道满而丢弃的条数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// 建立一对发送/接收端
pub fn channel<R: Record>(capacity: usize) -> (Emitter<R>, RecordStream<R>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        Emitter {
            tx,
            dropped: Arc::clone(&dropped),
            _record: PhantomData,
        },
        RecordStream {
            rx,
            dropped,
            _record: PhantomData,
        },
    )
}

/// 引擎持有的三个发送端
pub struct Emitters {
    pub rpc_tasks: Emitter<RpcTaskEvent>,
    pub paths: Emitter<PathSegmentEvent>,
    pub dns: Emitter<DnsEvent>,
}

impl Emitters {
    /// (rpc_tasks, paths, dns) 各自的丢弃数
    pub fn dropped(&self) -> (u64, u64, u64) {
        (
            self.rpc_tasks.dropped(),
            self.paths.dropped(),
            self.dns.dropped(),
        )
    }
}

/// 交给消费者的三个接收端
pub struct EventStreams {
    pub rpc_tasks: RecordStream<RpcTaskEvent>,
    pub paths: RecordStream<PathSegmentEvent>,
    pub dns: RecordStream<DnsEvent>,
}

pub fn streams(capacity: usize) -> (Emitters, EventStreams) {
    let (rpc_tx, rpc_rx) = channel(capacity);
    let (path_tx, path_rx) = channel(capacity);
    let (dns_tx, dns_rx) = channel(capacity);
    (
        Emitters {
            rpc_tasks: rpc_tx,
            paths: path_tx,
            dns: dns_tx,
        },
        EventStreams {
            rpc_tasks: rpc_rx,
            paths: path_rx,
            dns: dns_rx,
        },
    )
}
