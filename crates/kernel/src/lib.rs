//! 一个教学内核的虚拟内存与系统调用核心
//!
//! 三张表协同工作：每进程的补充页表记录进程眼中的每个虚拟页，
//! 全局帧表登记物理帧的归属与可驱逐性，交换位图管理后备槽。
//! 缺页处理和系统调用分发驱动这三张表。调度器、真实 MMU、
//! 磁盘文件系统和控制台都是外部协作者，经由接口接入，
//! 因此整个核心可以在宿主机上直接测试

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use]
extern crate log;

pub mod drivers;
pub mod fs;
pub mod memory;
pub mod process;
pub mod syscall;
pub mod trap;

#[cfg(test)]
pub(crate) mod test_support;

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use alloc::boxed::Box;

use defines::config::{PAGE_SIZE, SECTORS_PER_PAGE, SWAP_POOL_PAGES, USER_POOL_PAGES};
use klocks::{SpinMutex, SpinMutexGuard};

use drivers::{
    block::{BlockDevice, MemDisk},
    console::{Console, NullConsole},
};
use fs::MemFs;
use memory::{FrameTable, SwapDevice};
use process::{NoLoader, ProcessTable, ProgramLoader};

pub struct BootArgs {
    pub user_pages: usize,
    pub swap_disk: Box<dyn BlockDevice>,
    pub console: Box<dyn Console>,
    pub loader: Box<dyn ProgramLoader>,
}

impl Default for BootArgs {
    fn default() -> Self {
        Self {
            user_pages: USER_POOL_PAGES,
            swap_disk: Box::new(MemDisk::new(SWAP_POOL_PAGES * SECTORS_PER_PAGE)),
            console: Box::new(NullConsole),
            loader: Box::new(NoLoader),
        }
    }
}

/// 内核单例。boot 之后存活到掉电，从不拆除
pub struct Kernel {
    frames: FrameTable,
    swap: SwapDevice,
    filesys: MemFs,
    fs_lock: SpinMutex<()>,
    procs: ProcessTable,
    console: Box<dyn Console>,
    loader: Box<dyn ProgramLoader>,
    fault_count: AtomicU64,
    halted: AtomicBool,
}

impl Kernel {
    pub fn boot(args: BootArgs) -> Self {
        let swap = SwapDevice::new(args.swap_disk);
        info!(
            "boot: {} user frames, {} swap slots",
            args.user_pages,
            swap.slots()
        );
        Self {
            frames: FrameTable::new(args.user_pages),
            swap,
            filesys: MemFs::new(),
            fs_lock: SpinMutex::new(()),
            procs: ProcessTable::new(),
            console: args.console,
            loader: args.loader,
            fault_count: AtomicU64::new(0),
            halted: AtomicBool::new(false),
        }
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    pub fn swap(&self) -> &SwapDevice {
        &self.swap
    }

    pub fn filesys(&self) -> &MemFs {
        &self.filesys
    }

    /// 全局文件系统锁。每个文件系统入口都要先拿到它
    pub fn fs_lock(&self) -> SpinMutexGuard<'_, ()> {
        self.fs_lock.lock()
    }

    pub fn procs(&self) -> &ProcessTable {
        &self.procs
    }

    pub fn console(&self) -> &dyn Console {
        &*self.console
    }

    pub(crate) fn loader(&self) -> &dyn ProgramLoader {
        &*self.loader
    }

    /// HALT 只是拉下电闸的请求，真正断电是平台的事
    pub fn halt(&self) {
        info!("power off requested");
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub(crate) fn count_fault(&self) {
        self.fault_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fault_count(&self) -> u64 {
        self.fault_count.load(Ordering::Relaxed)
    }

    /// 关机时打印的异常统计
    pub fn print_fault_stats(&self) {
        let line = alloc::format!("Exception: {} page faults\n", self.fault_count());
        self.console.put_buf(line.as_bytes());
    }

    /// 对三张表做一次全量一致性检查，测试在每个场景后调用。
    /// 任何断言失败都意味着内核不变量被破坏
    pub fn audit(&self) {
        use alloc::collections::BTreeMap;

        use crate::memory::VirtPageNum;
        use crate::process::Pid;

        let mut owners: BTreeMap<usize, (Pid, VirtPageNum)> = BTreeMap::new();
        let mut swapped = 0usize;
        self.procs.for_each(|proc| {
            let spt = proc.spt.lock();
            let pagedir = proc.pagedir.lock();
            for (&vpn, entry) in spt.iter() {
                assert_eq!(
                    entry.read_bytes + entry.zero_bytes,
                    PAGE_SIZE,
                    "byte split broken at {:#x}",
                    vpn.page_start().0
                );
                if let Some(kpage) = entry.frame {
                    assert!(entry.swap_slot.is_none(), "page both resident and swapped");
                    let slot = self.frames.find(kpage);
                    assert_eq!(
                        slot.page,
                        Some((proc.pid(), vpn)),
                        "frame table disagrees about frame {}",
                        kpage.0
                    );
                    assert_eq!(pagedir.get_page(vpn), Some(kpage), "page dir out of sync");
                    let prev = owners.insert(kpage.0, (proc.pid(), vpn));
                    assert!(prev.is_none(), "frame {} referenced by two pages", kpage.0);
                }
                if let Some(slot) = entry.swap_slot {
                    assert!(self.swap.is_allocated(slot), "swapped page in a free slot");
                    assert!(pagedir.get_page(vpn).is_none(), "swapped page still mapped");
                    swapped += 1;
                }
            }
        });

        // 帧表上的归属提示必须能在某张 SPT 里找到印证
        for (i, slot) in self.frames.snapshot().into_iter().enumerate() {
            if let Some((pid, vpn)) = slot.page {
                assert_eq!(
                    owners.get(&i),
                    Some(&(pid, vpn)),
                    "stale ownership hint on frame {i}"
                );
            }
        }
        assert_eq!(swapped, self.swap.allocated_count(), "swap bitmap leak");
    }
}
