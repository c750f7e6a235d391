//! 测试用的假内存：按地址布置内核结构体与用户缓冲区

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use nfs_trace_core::layout::{PATH_DENTRY, PATH_MNT, QSTR_LEN, QSTR_NAME};
use nfs_trace_core::KernelLayout;

use crate::memory::{Addr, MemoryReader, ReadError};

const KERNEL_BASE: Addr = 0xffff_8880_0000_0000;
const USER_BASE: Addr = 0x0000_7f00_0000_0000;

#[derive(Default)]
struct Space {
    regions: BTreeMap<Addr, Vec<u8>>,
    next: Addr,
}

impl Space {
    fn alloc(&mut self, base: Addr, size: usize) -> Addr {
        if self.next == 0 {
            self.next = base;
        }
        let addr = self.next;
        self.regions.insert(addr, vec![0u8; size.max(1)]);
        self.next += ((size as u64 + 15) & !15) + 64;
        addr
    }

    fn region(&self, addr: Addr, len: usize) -> Option<&[u8]> {
        let (start, bytes) = self.regions.range(..=addr).next_back()?;
        let off = (addr - start) as usize;
        if off + len > bytes.len() {
            return None;
        }
        Some(&bytes[off..off + len])
    }

    fn tail(&self, addr: Addr) -> Option<&[u8]> {
        let (start, bytes) = self.regions.range(..=addr).next_back()?;
        let off = (addr - start) as usize;
        bytes.get(off..)
    }

    fn write(&mut self, addr: Addr, data: &[u8]) {
        let (start, bytes) = self
            .regions
            .range_mut(..=addr)
            .next_back()
            .expect("write outside allocated region");
        let off = (addr - *start) as usize;
        bytes[off..off + data.len()].copy_from_slice(data);
    }
}

pub struct FakeMemory {
    pub layout: KernelLayout,
    kernel: RwLock<Space>,
    user: RwLock<HashMap<u32, Space>>,
}

impl Default for FakeMemory {
    fn default() -> Self {
        Self::new(KernelLayout::default())
    }
}

impl FakeMemory {
    pub fn new(layout: KernelLayout) -> Self {
        Self {
            layout,
            kernel: RwLock::new(Space::default()),
            user: RwLock::new(HashMap::new()),
        }
    }

    pub fn alloc(&self, size: usize) -> Addr {
        self.kernel.write().unwrap().alloc(KERNEL_BASE, size)
    }

    pub fn write(&self, addr: Addr, data: &[u8]) {
        self.kernel.write().unwrap().write(addr, data);
    }

    pub fn write_u16(&self, addr: Addr, v: u16) {
        self.write(addr, &v.to_le_bytes());
    }

    pub fn write_u32(&self, addr: Addr, v: u32) {
        self.write(addr, &v.to_le_bytes());
    }

    pub fn write_u64(&self, addr: Addr, v: u64) {
        self.write(addr, &v.to_le_bytes());
    }

    /// 分配 NUL 结尾字符串
    pub fn cstr(&self, s: &str) -> Addr {
        let addr = self.alloc(s.len() + 1);
        self.write(addr, s.as_bytes());
        addr
    }

    /// 在 pid 的用户地址空间放置一段缓冲区
    pub fn user_buffer(&self, pid: u32, data: &[u8]) -> Addr {
        let mut user = self.user.write().unwrap();
        let space = user.entry(pid).or_default();
        let addr = space.alloc(USER_BASE, data.len());
        space.write(addr, data);
        addr
    }

    /// 目录项；parent 为 None 时指向自身
    pub fn dentry(&self, name: &str, parent: Option<Addr>) -> Addr {
        let l = self.layout;
        let addr = self.alloc(64);
        let name_ptr = self.cstr(name);
        self.write_u64(addr + l.dentry_d_parent, parent.unwrap_or(addr));
        self.write_u32(addr + l.dentry_d_name + QSTR_LEN, name.len() as u32);
        self.write_u64(addr + l.dentry_d_name + QSTR_NAME, name_ptr);
        addr
    }

    /// 按从根到叶的顺序建立目录项链，返回同序地址
    pub fn dentry_chain(&self, names: &[&str]) -> Vec<Addr> {
        let mut out: Vec<Addr> = Vec::with_capacity(names.len());
        for name in names {
            let parent = out.last().copied();
            out.push(self.dentry(name, parent));
        }
        out
    }

    /// 建立 kiocb -> file -> {inode, path{mnt, dentry}} 以及所属 mount，返回 kiocb 地址
    pub fn kiocb(&self, file: &FakeFile) -> Addr {
        let l = self.layout;

        let mount = self.alloc(320);
        let vfsmount = mount + l.mount_mnt;
        self.write_u64(vfsmount + l.vfsmount_mnt_root, file.mnt_root);
        self.write_u32(mount + l.mount_mnt_id, file.mount_id as u32);

        let sb = self.alloc(32);
        self.write_u32(sb + l.super_block_s_dev, file.dev);

        let inode = self.alloc(96);
        self.write_u64(inode + l.inode_i_sb, sb);
        self.write_u64(inode + l.inode_i_ino, file.ino);

        let f = self.alloc(48);
        self.write_u64(f + l.file_f_path + PATH_MNT, vfsmount);
        self.write_u64(f + l.file_f_path + PATH_DENTRY, file.dentry);
        self.write_u64(f + l.file_f_inode, inode);

        let kiocb = self.alloc(16);
        self.write_u64(kiocb + l.kiocb_ki_filp, f);
        kiocb
    }

    /// 只含 i_sb / i_ino 的 inode
    pub fn inode(&self, dev: u32, ino: u64) -> Addr {
        let l = self.layout;
        let sb = self.alloc(32);
        self.write_u32(sb + l.super_block_s_dev, dev);
        let inode = self.alloc(96);
        self.write_u64(inode + l.inode_i_sb, sb);
        self.write_u64(inode + l.inode_i_ino, ino);
        inode
    }

    pub fn rpc_task(&self, owner: i32, tk_pid: u16) -> Addr {
        let l = self.layout;
        let task = self.alloc(208);
        self.write_u32(task + l.rpc_task_tk_owner, owner as u32);
        self.write_u16(task + l.rpc_task_tk_pid, tk_pid);
        task
    }

    pub fn pgio_header(&self, res_count: u32) -> Addr {
        let hdr = self.alloc(160);
        self.write_u32(hdr + self.layout.pgio_header_res_count, res_count);
        hdr
    }

    /// 目的端口以网络字节序存放
    pub fn sock(&self, dport: u16) -> Addr {
        let sk = self.alloc(16);
        self.write(sk + self.layout.sock_skc_dport, &dport.to_be_bytes());
        sk
    }

    /// msghdr，msg_iter 内容由调用方按布局给出
    pub fn msghdr(&self, iter: &[u8]) -> Addr {
        let msg = self.alloc(64);
        self.write(msg + self.layout.msghdr_msg_iter, iter);
        msg
    }
}

pub struct FakeFile {
    pub dev: u32,
    pub ino: u64,
    pub dentry: Addr,
    pub mnt_root: Addr,
    pub mount_id: i32,
}

impl MemoryReader for FakeMemory {
    fn read_kernel(&self, addr: Addr, buf: &mut [u8]) -> Result<(), ReadError> {
        if addr == 0 {
            return Err(ReadError::Null);
        }
        let kernel = self.kernel.read().unwrap();
        let src = kernel.region(addr, buf.len()).ok_or(ReadError::Kernel {
            addr,
            len: buf.len(),
        })?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn read_kernel_str(&self, addr: Addr, buf: &mut [u8]) -> Result<usize, ReadError> {
        if addr == 0 || buf.is_empty() {
            return Err(ReadError::Null);
        }
        let kernel = self.kernel.read().unwrap();
        let tail = kernel.tail(addr).ok_or(ReadError::Kernel {
            addr,
            len: buf.len(),
        })?;
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(tail.len())
            .min(buf.len() - 1);
        buf[..len].copy_from_slice(&tail[..len]);
        buf[len] = 0;
        Ok(len)
    }

    fn read_user(&self, pid: u32, addr: Addr, buf: &mut [u8]) -> Result<(), ReadError> {
        let err = ReadError::User {
            pid,
            addr,
            len: buf.len(),
        };
        let user = self.user.read().unwrap();
        let src = user
            .get(&pid)
            .and_then(|space| space.region(addr, buf.len()))
            .ok_or(err)?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
