//! 进程对象与进程表
//!
//! 调度器在外部，这里只管地址空间、文件表和退出状态这些
//! 随进程生灭的资源。锁的获取顺序：inner、spt、pagedir、
//! 帧表、交换位图、文件系统，只许正序不许反序

use alloc::{
    collections::BTreeMap,
    format,
    sync::{Arc, Weak},
    vec::Vec,
};

use compact_str::CompactString;
use defines::{
    config::PHYS_BASE,
    error::{errno, Error},
};
use idallocator::RecycleAllocator;
use klocks::SpinMutex;

use crate::{
    fs::FdTable,
    memory::{mmap, MmapTable, SoftPageDir, SuppPageTable, VirtAddr},
    Kernel,
};

pub type Pid = usize;

pub struct Process {
    pid: Pid,
    pub name: CompactString,
    /// 进程的页目录，即它在 MMU 里的那张表
    pub pagedir: SpinMutex<SoftPageDir>,
    /// 补充页表
    pub spt: SpinMutex<SuppPageTable>,
    pub inner: SpinMutex<ProcessInner>,
}

pub struct ProcessInner {
    pub fd_table: FdTable,
    pub mmaps: MmapTable,
    /// 用户栈指针的内核侧副本。内核态缺页没有陷入栈帧可用，
    /// 栈增长判断就取这里的值
    pub saved_esp: VirtAddr,
    /// 数据段末尾，mmap 不允许映射到它之下
    pub data_end: VirtAddr,
    pub parent: Weak<Process>,
    pub children: Vec<Arc<Process>>,
    /// Some 表示已经退出（僵尸），等着父进程 wait
    pub exit_status: Option<i32>,
}

impl Process {
    fn new(pid: Pid, name: &str) -> Arc<Self> {
        Arc::new(Self {
            pid,
            name: CompactString::from(name),
            pagedir: SpinMutex::new(SoftPageDir::new()),
            spt: SpinMutex::new(SuppPageTable::new()),
            inner: SpinMutex::new(ProcessInner {
                fd_table: FdTable::new(),
                mmaps: MmapTable::new(),
                saved_esp: VirtAddr(PHYS_BASE),
                data_end: VirtAddr(0),
                parent: Weak::new(),
                children: Vec::new(),
                exit_status: None,
            }),
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn lock_inner_with<R>(&self, f: impl FnOnce(&mut ProcessInner) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn is_zombie(&self) -> bool {
        self.inner.lock().exit_status.is_some()
    }
}

/// 装载器是外部协作者。EXEC 在文件系统锁内同步地调用它，
/// 返回值就是装载是否成功
pub trait ProgramLoader: Send + Sync {
    fn load(&self, k: &Kernel, proc: &Arc<Process>, cmdline: &str) -> bool;
}

/// 没有装载器时的缺省实现，一切装载都失败
pub struct NoLoader;

impl ProgramLoader for NoLoader {
    fn load(&self, _k: &Kernel, _proc: &Arc<Process>, _cmdline: &str) -> bool {
        false
    }
}

struct ProcTableInner {
    procs: BTreeMap<Pid, Arc<Process>>,
    pid_allocator: RecycleAllocator,
}

pub struct ProcessTable {
    inner: SpinMutex<ProcTableInner>,
}

impl ProcessTable {
    pub(crate) fn new() -> Self {
        Self {
            inner: SpinMutex::new(ProcTableInner {
                procs: BTreeMap::new(),
                pid_allocator: RecycleAllocator::begin_with(1),
            }),
        }
    }

    pub fn spawn(&self, name: &str) -> Arc<Process> {
        let mut inner = self.inner.lock();
        let pid = inner.pid_allocator.alloc();
        let proc = Process::new(pid, name);
        inner.procs.insert(pid, Arc::clone(&proc));
        proc
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.inner.lock().procs.get(&pid).cloned()
    }

    /// 把进程摘出进程表，pid 可被复用
    pub fn remove(&self, pid: Pid) {
        let mut inner = self.inner.lock();
        if inner.procs.remove(&pid).is_some() {
            inner.pid_allocator.dealloc(pid);
        }
    }

    pub fn for_each(&self, mut f: impl FnMut(&Arc<Process>)) {
        let snapshot: Vec<Arc<Process>> = self.inner.lock().procs.values().cloned().collect();
        for proc in &snapshot {
            f(proc);
        }
    }
}

/// 进程终止的唯一路径。打印规范的退出行，然后回写并拆除
/// mmap 区域、归还帧和交换槽、关闭文件，最后留下僵尸状态
pub fn exit_process(k: &Kernel, proc: &Arc<Process>, status: i32) {
    {
        let mut inner = proc.inner.lock();
        if inner.exit_status.is_some() {
            return;
        }
        inner.exit_status = Some(status);
    }
    let line = format!("{}: exit({})\n", proc.name, status);
    k.console().put_buf(line.as_bytes());
    info!("process {} (pid {}) exited with {}", proc.name, proc.pid, status);

    // mmap 区域：先回写脏页再拆
    let regions = proc.inner.lock().mmaps.take_all();
    for region in regions {
        mmap::region_writeback(k, proc, &region);
        mmap::region_free(k, proc, region);
    }

    // 归还剩余的帧和交换槽
    {
        let mut spt = proc.spt.lock();
        let mut pagedir = proc.pagedir.lock();
        for (vpn, entry) in spt.drain() {
            if let Some(kpage) = entry.frame {
                pagedir.clear(vpn);
                k.frames().free(kpage);
            }
            if let Some(slot) = entry.swap_slot {
                k.swap().slot_free(slot);
            }
        }
    }

    proc.inner.lock().fd_table.clear();
}

/// 因非法行为终止进程，返回给 `?` 传播用的哨兵错误
pub(crate) fn terminate(k: &Kernel, proc: &Arc<Process>, status: i32) -> Error {
    exit_process(k, proc, status);
    errno::KILLED
}
