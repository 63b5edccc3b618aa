//! 用户帧池的全局登记表
//!
//! 所有用户页帧在启动时一次性建立，之后只在进程之间流转。
//! 池耗尽时通过二次机会时钟挑一个牺牲帧换出

use alloc::vec::Vec;

use bitflags::bitflags;
use buddy_system_allocator::FrameAllocator;
use defines::config::PAGE_SIZE;
use klocks::SpinMutex;
use triomphe::Arc;

use crate::{
    process::Pid,
    memory::{address::VirtPageNum, spt::PagePurpose},
    Kernel,
};

/// 帧池支持的最大规模（2^FRAME_ORDER 页）
const FRAME_ORDER: usize = 16;

/// 内核侧的物理页句柄，即帧池中的下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Kpage(pub usize);

/// 一页物理内存的内容
pub struct PageBuf(pub [u8; PAGE_SIZE]);

impl PageBuf {
    pub const fn zeroed() -> Self {
        Self([0; PAGE_SIZE])
    }
}

pub type FrameData = Arc<SpinMutex<PageBuf>>;

bitflags! {
    #[derive(Clone, Copy, Debug)]
    pub struct AllocFlags: u8 {
        /// 分配后清零
        const ZERO = 1 << 0;
    }
}

/// 一个物理帧的登记信息
///
/// `page` 是可被打破的提示：它只在帧表锁内有效，
/// 权威的归属关系记录在拥有者进程的补充页表里
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSlot {
    pub page: Option<(Pid, VirtPageNum)>,
    pub evictable: bool,
    pub in_use: bool,
}

impl FrameSlot {
    const FREE: Self = Self {
        page: None,
        evictable: false,
        in_use: false,
    };
}

struct FrameTableInner {
    allocator: FrameAllocator<FRAME_ORDER>,
    slots: Vec<FrameSlot>,
    hand: usize,
}

pub struct FrameTable {
    /// 帧内容。Vec 本身启动后不再变化，按 Kpage 下标索引
    data: Vec<FrameData>,
    inner: SpinMutex<FrameTableInner>,
}

impl FrameTable {
    pub fn new(pages: usize) -> Self {
        assert!(pages > 0 && pages < (1 << FRAME_ORDER));
        let mut allocator = FrameAllocator::new();
        allocator.add_frame(0, pages);
        let data = (0..pages)
            .map(|_| Arc::new(SpinMutex::new(PageBuf::zeroed())))
            .collect();
        Self {
            data,
            inner: SpinMutex::new(FrameTableInner {
                allocator,
                slots: alloc::vec![FrameSlot::FREE; pages],
                hand: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// 帧内容的共享句柄，独立于帧表锁
    pub fn data(&self, kpage: Kpage) -> FrameData {
        Arc::clone(&self.data[kpage.0])
    }

    /// 结构化查找
    pub fn find(&self, kpage: Kpage) -> FrameSlot {
        self.inner.lock().slots[kpage.0]
    }

    /// 登记帧当前回填的用户页
    pub fn assign(&self, kpage: Kpage, pid: Pid, vpn: VirtPageNum) {
        let mut inner = self.inner.lock();
        let slot = &mut inner.slots[kpage.0];
        debug_assert!(slot.in_use);
        slot.page = Some((pid, vpn));
    }

    pub fn set_evictable(&self, kpage: Kpage, evictable: bool) {
        self.inner.lock().slots[kpage.0].evictable = evictable;
    }

    /// 释放帧回池，清除登记信息
    pub fn free(&self, kpage: Kpage) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.slots[kpage.0].in_use);
        inner.slots[kpage.0] = FrameSlot::FREE;
        inner.allocator.dealloc(kpage.0, 1);
    }

    fn try_alloc(&self) -> Option<Kpage> {
        let mut inner = self.inner.lock();
        let i = inner.allocator.alloc(1)?;
        inner.slots[i] = FrameSlot {
            page: None,
            evictable: false,
            in_use: true,
        };
        Some(Kpage(i))
    }

    /// 牺牲帧脱离原拥有者之后，抹掉提示以待新主
    fn detach(&self, kpage: Kpage) {
        self.inner.lock().slots[kpage.0].page = None;
    }

    pub(crate) fn snapshot(&self) -> Vec<FrameSlot> {
        self.inner.lock().slots.clone()
    }
}

/// 取一个用户帧，池空时驱逐。返回的帧始终是钉住的，
/// 调用者在写好 MMU 映射后再标记 evictable
pub fn frame_alloc(k: &Kernel, flags: AllocFlags, pinned: bool) -> Kpage {
    let kpage = match k.frames().try_alloc() {
        Some(kpage) => kpage,
        None => evict(k),
    };
    if flags.contains(AllocFlags::ZERO) {
        k.frames().data(kpage).lock().0.fill(0);
    }
    if !pinned {
        k.frames().set_evictable(kpage, true);
    }
    kpage
}

/// 二次机会时钟驱逐。仅在没有任何可驱逐帧时 panic
fn evict(k: &Kernel) -> Kpage {
    let frames = k.frames();
    loop {
        // 按时钟指针顺序取出候选，访问位的检查在帧表锁外进行
        let candidates: Vec<(usize, Pid, VirtPageNum)> = {
            let inner = frames.inner.lock();
            let n = inner.slots.len();
            (0..n)
                .filter_map(|i| {
                    let idx = (inner.hand + i) % n;
                    let slot = &inner.slots[idx];
                    let (pid, vpn) = slot.page?;
                    (slot.in_use && slot.evictable).then_some((idx, pid, vpn))
                })
                .collect()
        };
        assert!(!candidates.is_empty(), "no evictable frame");

        let mut chosen = None;
        for &(idx, pid, vpn) in &candidates {
            let Some(victim) = k.procs().get(pid) else {
                // 拥有者已经消亡，直接选中
                chosen = Some((idx, pid, vpn));
                break;
            };
            let mut pagedir = victim.pagedir.lock();
            if pagedir.is_accessed(vpn) {
                // 给一次机会，清访问位后放过
                pagedir.set_accessed(vpn, false);
            } else {
                chosen = Some((idx, pid, vpn));
                break;
            }
        }
        // 这一圈全部有访问位，已经都清零，下一圈必然选中
        let Some((idx, pid, vpn)) = chosen else {
            continue;
        };

        // 重新上锁钉住。期间状态已变的话重试
        {
            let mut inner = frames.inner.lock();
            let n = inner.slots.len();
            let slot = &mut inner.slots[idx];
            if !(slot.in_use && slot.evictable && slot.page == Some((pid, vpn))) {
                continue;
            }
            slot.evictable = false;
            inner.hand = (idx + 1) % n;
        }

        let kpage = Kpage(idx);
        spill(k, kpage, pid, vpn);
        frames.detach(kpage);
        return kpage;
    }
}

/// 把牺牲帧的内容转移到后备存储，并把受害进程的页表项改为非驻留
fn spill(k: &Kernel, kpage: Kpage, pid: Pid, vpn: VirtPageNum) {
    let Some(victim) = k.procs().get(pid) else {
        return;
    };
    // 先撤销映射，用户的写入就不会与换出竞争；脏位随映射一并取回
    let cleared = victim.pagedir.lock().clear(vpn);
    let dirty = cleared.is_some_and(|(_, dirty)| dirty);

    let mut spt = victim.spt.lock();
    let Some(entry) = spt.get_mut(vpn) else {
        return;
    };
    if entry.frame != Some(kpage) {
        return;
    }

    match entry.purpose {
        PagePurpose::Mmap => {
            // 脏的 mmap 页回写到文件本身，之后总能从文件重新装载
            if dirty {
                let file = entry.file.clone().expect("mmap page without backing file");
                let (ofs, read_bytes) = (entry.ofs, entry.read_bytes);
                let _fs = k.fs_lock();
                let data = k.frames().data(kpage);
                file.write_at(&data.lock().0[..read_bytes], ofs);
            }
        }
        PagePurpose::File => {
            // 只有被写脏的可写页才值得占交换槽，其余从文件重载
            if entry.writable && dirty {
                let slot = k.swap().slot_alloc().expect("swap full");
                let data = k.frames().data(kpage);
                k.swap().write_slot(slot, &data.lock());
                entry.swap_slot = Some(slot);
            }
        }
        PagePurpose::Stack => {
            // 栈页没有后备文件，无条件进交换区
            let slot = k.swap().slot_alloc().expect("swap full");
            let data = k.frames().data(kpage);
            k.swap().write_slot(slot, &data.lock());
            entry.swap_slot = Some(slot);
        }
    }
    entry.frame = None;
    debug!("evicted frame {} from pid {} page {:#x}", kpage.0, pid, vpn.page_start().0);
}
