use nfs_trace_core::{MAX_PROBE_ARGS, TASK_COMM_LEN};

use crate::memory::Addr;

/// 探针触发时当前任务的上下文
/// 对应 bpf_get_current_pid_tgid / bpf_get_current_comm / PT_REGS_SP
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskContext {
    pub pid: u32,
    pub tid: u32,
    pub comm: [u8; TASK_COMM_LEN],
    pub stack_pointer: Addr,
}

impl TaskContext {
    pub fn new(pid: u32, tid: u32, comm: &str) -> Self {
        let mut buf = [0u8; TASK_COMM_LEN];
        let n = comm.len().min(TASK_COMM_LEN - 1);
        buf[..n].copy_from_slice(&comm.as_bytes()[..n]);
        Self {
            pid,
            tid,
            comm: buf,
            stack_pointer: 0,
        }
    }

    /// 由 bpf_get_current_pid_tgid 的返回值拆出 pid / tid
    pub fn from_pid_tgid(pid_tgid: u64, comm: &str) -> Self {
        Self::new((pid_tgid >> 32) as u32, pid_tgid as u32, comm)
    }

    pub fn with_stack_pointer(mut self, sp: Addr) -> Self {
        self.stack_pointer = sp;
        self
    }
}

/// kprobe 的位置参数寄存器，下标从 1 开始（PT_REGS_PARM1..5）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeArgs([u64; MAX_PROBE_ARGS]);

impl ProbeArgs {
    pub fn new(args: [u64; MAX_PROBE_ARGS]) -> Self {
        Self(args)
    }

    /// 取前几个参数，其余为 0
    pub fn from_slice(args: &[u64]) -> Self {
        let mut out = [0u64; MAX_PROBE_ARGS];
        let n = args.len().min(MAX_PROBE_ARGS);
        out[..n].copy_from_slice(&args[..n]);
        Self(out)
    }

    pub fn arg(&self, index: usize) -> Option<u64> {
        if index == 0 {
            return None;
        }
        self.0.get(index - 1).copied()
    }
}
