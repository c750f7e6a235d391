//! 关联引擎
//!
//! 持有挂载期间的全部状态（三张关联表、聚合表、输出通道、探针表），
//! 并提供各探针的入口函数。入口函数永不失败：内部错误在入口处吞掉，
//! 被监控的内核路径感知不到探针的存在

use std::sync::Arc;

use log::{info, warn};
use thiserror::Error;

use nfs_trace_core::layout::{PATH_DENTRY, PATH_MNT};
use nfs_trace_core::{
    Config, ConfigError, FixedStr, IdentityRecord, KernelLayout, KernelVersion, RpcTaskEvent,
    LABEL_LEN,
};

use crate::aggregator::{composite_key, IoDirection, MetricsAggregator};
use crate::clock::Clock;
use crate::context::{ProbeArgs, TaskContext};
use crate::correlator::LifecycleCorrelator;
use crate::dns::{DnsError, DnsExtractor, SendMsg};
use crate::emitter::{self, Emitters, EventStreams};
use crate::identity::IdentityMap;
use crate::memory::{field, Addr, MemoryReader, MemoryReaderExt, ReadError};
use crate::path;
use crate::probes::{ProbeTable, ProbeTableError};

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid probe table: {0}")]
    Probes(#[from] ProbeTableError),
}

/// 卸载时的丢弃统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetachStats {
    pub rpc_tasks_dropped: u64,
    pub paths_dropped: u64,
    pub dns_dropped: u64,
    pub metrics_evicted: u64,
}

/// 文件操作解析出的文件信息
#[derive(Debug, Clone, Copy)]
struct FileInfo {
    dev: u32,
    ino: u64,
    dentry: Addr,
    mnt_root: Addr,
    mount_id: i32,
}

pub struct Engine<M, C> {
    config: Config,
    layout: KernelLayout,
    memory: M,
    clock: C,
    identity: Arc<IdentityMap>,
    correlator: LifecycleCorrelator,
    aggregator: MetricsAggregator,
    dns: DnsExtractor,
    probes: ProbeTable,
    emitters: Emitters,
}

impl<M: MemoryReader, C: Clock> Engine<M, C> {
    /// 挂载：建立所有表与输出通道
    pub fn attach(
        config: Config,
        memory: M,
        identity: Arc<IdentityMap>,
        clock: C,
    ) -> Result<(Self, EventStreams), AttachError> {
        config.validate()?;
        let probes = ProbeTable::parse(&config.probes)?;
        let version = config.resolve_kernel_version()?;
        let layout = config.layout;

        match version {
            Some(v) => info!("内核版本 {}", v),
            None if config.features.dns => warn!("无法确定内核版本，DNS 提取将被跳过"),
            None => {}
        }
        info!(
            "挂载 {} 个文件操作探针: {}",
            probes.len(),
            probes.symbols().join(", ")
        );

        let (emitters, streams) = emitter::streams(config.channel_capacity);
        let engine = Self {
            layout,
            memory,
            clock,
            identity,
            correlator: LifecycleCorrelator::default(),
            aggregator: MetricsAggregator::with_capacity(config.metrics_capacity),
            dns: DnsExtractor::new(layout, version),
            probes,
            emitters,
            config,
        };
        Ok((engine, streams))
    }

    /// 卸载：清空所有表并关闭输出通道，消费者随后读到流结束
    pub fn detach(self) -> DetachStats {
        self.correlator.clear();
        self.aggregator.clear();

        let (rpc, paths, dns) = self.emitters.dropped();
        let stats = DetachStats {
            rpc_tasks_dropped: rpc,
            paths_dropped: paths,
            dns_dropped: dns,
            metrics_evicted: self.aggregator.evictions(),
        };
        info!(
            "探针已卸载，丢弃记录 rpc_task={} path_segment={} dns={}，淘汰聚合 {}",
            rpc, paths, dns, stats.metrics_evicted
        );
        stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn kernel_version(&self) -> Option<KernelVersion> {
        self.dns.version()
    }

    pub fn probes(&self) -> &ProbeTable {
        &self.probes
    }

    pub fn correlator(&self) -> &LifecycleCorrelator {
        &self.correlator
    }

    pub fn aggregator(&self) -> &MetricsAggregator {
        &self.aggregator
    }

    pub fn identity(&self) -> &Arc<IdentityMap> {
        &self.identity
    }

    // ---- 生命周期关联 ----

    pub fn on_nfs_initiate_read(&self, task: &TaskContext) {
        self.record_start("nfs_initiate_read", task);
    }

    pub fn on_nfs_initiate_write(&self, task: &TaskContext) {
        self.record_start("nfs_initiate_write", task);
    }

    fn record_start(&self, probe: &str, task: &TaskContext) {
        if !self.config.features.nfs_metrics {
            return;
        }
        let ts = self
            .correlator
            .record_start(task.pid, task.tid, self.clock.now_ns());
        probe_debug!(self.config, "{}: pid={} tid={} ts={}", probe, task.pid, task.tid, ts);
    }

    /// tracepoint rpc_task_begin
    pub fn on_rpc_task_begin(&self, task: &TaskContext, task_id: u64) {
        if !self.config.features.nfs_metrics {
            return;
        }
        if self.correlator.link_task(task.pid, task.tid, task_id) {
            probe_debug!(self.config, "rpc_task_begin: pid={} task={:#x}", task.pid, task_id);
        }
    }

    /// kprobe rpc_make_runnable(struct rpc_wait_queue *, struct rpc_task *)
    pub fn on_rpc_make_runnable(&self, task: &TaskContext, args: &ProbeArgs) {
        if !self.config.features.nfs_metrics {
            return;
        }
        match self.rpc_task_id(args.arg(2).unwrap_or(0)) {
            Ok(task_id) => self.on_rpc_task_begin(task, task_id),
            Err(err) => probe_debug!(self.config, "rpc_make_runnable: {}", err),
        }
    }

    /// tracepoint rpc_task_end
    pub fn on_rpc_task_end(&self, task_id: u64) {
        if !self.config.features.nfs_metrics {
            return;
        }
        if self.correlator.record_task_done(task_id) {
            probe_debug!(self.config, "rpc_task_end: task={:#x}", task_id);
        }
    }

    /// kprobe rpc_exit_task(struct rpc_task *)
    pub fn on_rpc_exit_task(&self, args: &ProbeArgs) {
        if !self.config.features.nfs_metrics {
            return;
        }
        match self.rpc_task_id(args.arg(1).unwrap_or(0)) {
            Ok(task_id) => self.on_rpc_task_end(task_id),
            Err(err) => probe_debug!(self.config, "rpc_exit_task: {}", err),
        }
    }

    fn rpc_task_id(&self, rpc_task: Addr) -> Result<u64, ReadError> {
        let tk_pid = self
            .memory
            .read_u16(field(rpc_task, self.layout.rpc_task_tk_pid)?)?;
        Ok(tk_pid as u64)
    }

    // ---- I/O 完成：聚合 ----

    /// nfs_readpage_done(struct rpc_task *, struct nfs_pgio_header *, struct inode *)
    pub fn on_nfs_readpage_done(&self, args: &ProbeArgs) {
        if !self.config.features.nfs_metrics {
            return;
        }
        if let Err(err) = self.try_io_done(IoDirection::Read, args) {
            probe_debug!(self.config, "nfs_readpage_done: {}", err);
        }
    }

    /// nfs_writeback_done(struct rpc_task *, struct nfs_pgio_header *, struct inode *)
    pub fn on_nfs_writeback_done(&self, args: &ProbeArgs) {
        if !self.config.features.nfs_metrics {
            return;
        }
        if let Err(err) = self.try_io_done(IoDirection::Write, args) {
            probe_debug!(self.config, "nfs_writeback_done: {}", err);
        }
    }

    fn try_io_done(&self, direction: IoDirection, args: &ProbeArgs) -> Result<(), ReadError> {
        let l = &self.layout;
        let rpc_task = args.arg(1).unwrap_or(0);
        let hdr = args.arg(2).unwrap_or(0);
        let inode = args.arg(3).unwrap_or(0);

        // 先完成全部读取，失败时不触碰任何表
        let owner = self.memory.read_u32(field(rpc_task, l.rpc_task_tk_owner)?)?;
        let bytes = self.memory.read_u32(field(hdr, l.pgio_header_res_count)?)?;
        let (dev, ino) = self.inode_identity(inode)?;

        let pid = owner;
        let key = composite_key(dev as u64, ino);
        let handle = self.aggregator.get_or_create(key);
        let identity = self.identity.resolve(pid);
        self.aggregator.enrich(&handle, identity.as_deref());

        let now = self.clock.now_ns();
        let latency = self
            .correlator
            .consume_anchor(pid)
            .map(|start| now.saturating_sub(start));
        match direction {
            IoDirection::Read => self.aggregator.accumulate_read(&handle, bytes as u64, latency),
            IoDirection::Write => self.aggregator.accumulate_write(&handle, bytes as u64, latency),
        }

        probe_debug!(
            self.config,
            "{:?} done: pid={} key={:#x} bytes={} latency={:?}",
            direction,
            pid,
            key,
            bytes,
            latency
        );
        Ok(())
    }

    fn inode_identity(&self, inode: Addr) -> Result<(u32, u64), ReadError> {
        let l = &self.layout;
        let sb = self.memory.read_ptr(field(inode, l.inode_i_sb)?)?;
        let dev = self.memory.read_u32(sb + l.super_block_s_dev)?;
        let ino = self.memory.read_u64(inode + l.inode_i_ino)?;
        Ok((dev, ino))
    }

    // ---- 文件操作：路径与生命周期记录 ----

    /// 所有文件操作探针的统一入口，按探针表取出 kiocb 参数
    pub fn dispatch(&self, symbol: &str, task: &TaskContext, args: &ProbeArgs) {
        if !self.config.features.nfs_metrics {
            return;
        }
        let Some(index) = self.probes.arg_index(symbol) else {
            probe_debug!(self.config, "{}: not in probe table", symbol);
            return;
        };
        let kiocb = args.arg(index).unwrap_or(0);
        if let Err(err) = self.try_file_operation(task, kiocb) {
            probe_debug!(self.config, "{}: {}", symbol, err);
        }
    }

    fn try_file_operation(&self, task: &TaskContext, kiocb: Addr) -> Result<(), ReadError> {
        let file = self.resolve_file(kiocb)?;
        let key = composite_key(file.dev as u64, file.ino);

        // 栈顶即返回地址；读不到时整次调用放弃，路径段也不输出
        let caller_addr = self.memory.read_u64(field(task.stack_pointer, 0)?)?;

        let segments = path::reconstruct(
            &self.memory,
            &self.layout,
            file.dentry,
            file.mnt_root,
            file.ino,
            file.dev as u64,
            |segment| {
                self.emitters.paths.emit(segment);
            },
        );

        let identity = self.identity.resolve(task.pid);
        let (pod, container) = labels(identity.as_deref());
        let record = RpcTaskEvent {
            pid: task.pid as i32,
            mount_id: file.mount_id,
            pod,
            container,
            caller_addr,
            dev_id: file.dev,
            file_id: file.ino as u32,
            key,
        };
        self.emitters.rpc_tasks.emit(&record);

        probe_debug!(
            self.config,
            "file op: pid={} key={:#x} mount={} segments={}",
            task.pid,
            key,
            file.mount_id,
            segments
        );
        Ok(())
    }

    fn resolve_file(&self, kiocb: Addr) -> Result<FileInfo, ReadError> {
        let l = &self.layout;
        let filp = self.memory.read_ptr(field(kiocb, l.kiocb_ki_filp)?)?;
        let inode = self.memory.read_ptr(filp + l.file_f_inode)?;
        let (dev, ino) = self.inode_identity(inode)?;

        let vfsmount = self.memory.read_ptr(filp + l.file_f_path + PATH_MNT)?;
        let dentry = self.memory.read_ptr(filp + l.file_f_path + PATH_DENTRY)?;
        let mnt_root = self.memory.read_ptr(vfsmount + l.vfsmount_mnt_root)?;
        // container_of(vfsmount, struct mount, mnt)
        let mount = vfsmount.wrapping_sub(l.mount_mnt);
        let mount_id = self.memory.read_u32(mount + l.mount_mnt_id)? as i32;

        Ok(FileInfo {
            dev,
            ino,
            dentry,
            mnt_root,
            mount_id,
        })
    }

    // ---- DNS ----

    /// kprobe udp_sendmsg(struct sock *, struct msghdr *, size_t)
    pub fn on_udp_sendmsg(&self, task: &TaskContext, args: &ProbeArgs) {
        if !self.config.features.dns {
            return;
        }
        let msg = SendMsg {
            sock: args.arg(1).unwrap_or(0),
            msg: args.arg(2).unwrap_or(0),
        };
        match self.dns.extract(&self.memory, task, msg) {
            Ok(query) => {
                probe_debug!(
                    self.config,
                    "dns: pid={} len={} name={}",
                    query.pid,
                    query.len,
                    query.name()
                );
                self.emitters.dns.emit(&query.to_event());
            }
            Err(DnsError::NotDns(_)) => {}
            Err(err @ (DnsError::Unsupported(_) | DnsError::UnknownVersion)) => {
                if self.config.debug_log {
                    warn!(target: "nfs_trace::probe", "dns: {}", err);
                }
            }
            Err(err) => probe_debug!(self.config, "dns: {}", err),
        }
    }
}

fn labels(identity: Option<&IdentityRecord>) -> (FixedStr<LABEL_LEN>, FixedStr<LABEL_LEN>) {
    match identity {
        Some(id) => (id.pod_field(), id.container_field()),
        None => (FixedStr::default(), FixedStr::default()),
    }
}
