//! 内核结构体字段偏移表
//!
//! 内核态探针依靠 BTF 重定位读取字段，这里由加载方解析 BTF 后填入偏移；
//! 默认值对应 x86_64 6.x 内核

use serde::{Deserialize, Serialize};

/// struct path 内 mnt / dentry 偏移
pub const PATH_MNT: u64 = 0;
pub const PATH_DENTRY: u64 = 8;

/// struct qstr 内 len / name 偏移
pub const QSTR_LEN: u64 = 4;
pub const QSTR_NAME: u64 = 8;

/// struct iovec 内 iov_base / iov_len 偏移
pub const IOVEC_BASE: u64 = 0;
pub const IOVEC_LEN: u64 = 8;
pub const IOVEC_SIZE: usize = 16;

/// 探针读取的各字段偏移（字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelLayout {
    pub kiocb_ki_filp: u64,
    pub file_f_path: u64,
    pub file_f_inode: u64,
    pub inode_i_sb: u64,
    pub inode_i_ino: u64,
    pub super_block_s_dev: u64,
    pub vfsmount_mnt_root: u64,
    /// struct mount 内嵌 vfsmount 的偏移（container_of 用）
    pub mount_mnt: u64,
    pub mount_mnt_id: u64,
    pub dentry_d_parent: u64,
    pub dentry_d_name: u64,
    pub rpc_task_tk_owner: u64,
    pub rpc_task_tk_pid: u64,
    pub pgio_header_res_count: u64,
    pub sock_skc_dport: u64,
    pub msghdr_msg_iter: u64,
}

impl Default for KernelLayout {
    fn default() -> Self {
        Self {
            kiocb_ki_filp: 0,
            file_f_path: 16,
            file_f_inode: 32,
            inode_i_sb: 40,
            inode_i_ino: 64,
            super_block_s_dev: 16,
            vfsmount_mnt_root: 0,
            mount_mnt: 32,
            mount_mnt_id: 284,
            dentry_d_parent: 24,
            dentry_d_name: 32,
            rpc_task_tk_owner: 196,
            rpc_task_tk_pid: 200,
            pgio_header_res_count: 152,
            sock_skc_dport: 12,
            msghdr_msg_iter: 16,
        }
    }
}
