//! 进程的内存映射文件区域
//!
//! 区域是所属 SPT 条目的拥有者，条目上的 mmap_id 只是非占有的回链标签。
//! 回写以区域自己的页清单为准

use alloc::vec::Vec;

use smallvec::SmallVec;
use triomphe::Arc;

use crate::{fs::File, process::Process, Kernel};

use super::address::VirtPageNum;

pub type MmapId = usize;

pub struct MmapRegion {
    pub id: MmapId,
    pub start: VirtPageNum,
    /// 映射的字节数，即建立映射时的文件长度
    pub size: usize,
    /// 区域私有的重开句柄，seek 位置与原 fd 无关
    pub file: Arc<File>,
    /// 映射来源的 fd，仅作记录
    pub fd: usize,
    pub pages: SmallVec<[VirtPageNum; 8]>,
}

/// 进程的 mmap 区域清单，id 单调递增
pub struct MmapTable {
    regions: Vec<MmapRegion>,
    next_id: MmapId,
}

impl Default for MmapTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MmapTable {
    pub fn new() -> Self {
        Self {
            regions: Vec::new(),
            next_id: 1,
        }
    }

    pub fn alloc_id(&mut self) -> MmapId {
        self.next_id += 1;
        self.next_id - 1
    }

    pub fn insert(&mut self, region: MmapRegion) {
        self.regions.push(region);
    }

    pub fn take(&mut self, id: MmapId) -> Option<MmapRegion> {
        let pos = self.regions.iter().position(|r| r.id == id)?;
        Some(self.regions.remove(pos))
    }

    pub fn take_all(&mut self) -> Vec<MmapRegion> {
        core::mem::take(&mut self.regions)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// munmap 的第一阶段：把区域内仍驻留且被写脏的页回写到文件
pub(crate) fn region_writeback(k: &Kernel, proc: &Process, region: &MmapRegion) {
    let spt = proc.spt.lock();
    let pagedir = proc.pagedir.lock();
    let _fs = k.fs_lock();
    for &vpn in &region.pages {
        let Some(entry) = spt.get(vpn) else { continue };
        let Some(kpage) = entry.frame else { continue };
        if pagedir.is_dirty(vpn) {
            let data = k.frames().data(kpage);
            region.file.write_at(&data.lock().0[..entry.read_bytes], entry.ofs);
        }
    }
}

/// munmap 的第二阶段：撤映射、还帧、摘掉 SPT 条目，随后区域
/// 连同重开的文件句柄一起析构
pub(crate) fn region_free(k: &Kernel, proc: &Process, region: MmapRegion) {
    let mut spt = proc.spt.lock();
    let mut pagedir = proc.pagedir.lock();
    for &vpn in &region.pages {
        let Some(entry) = spt.remove(vpn) else { continue };
        if let Some(kpage) = entry.frame {
            pagedir.clear(vpn);
            k.frames().free(kpage);
        }
        if let Some(slot) = entry.swap_slot {
            k.swap().slot_free(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::boot_kernel;

    #[test]
    fn ids_are_monotonic() {
        let mut table = MmapTable::new();
        let a = table.alloc_id();
        let b = table.alloc_id();
        assert!(b > a);
    }

    #[test]
    fn take_removes_exactly_one() {
        let (k, _console) = boot_kernel(4);
        k.filesys().create("f", 100);
        let file = {
            let _fs = k.fs_lock();
            k.filesys().open("f").unwrap()
        };

        let mut table = MmapTable::new();
        let id = table.alloc_id();
        table.insert(MmapRegion {
            id,
            start: VirtPageNum(0x10000),
            size: 100,
            file,
            fd: 2,
            pages: SmallVec::new(),
        });
        assert!(table.take(id + 1).is_none());
        assert!(table.take(id).is_some());
        assert!(table.is_empty());
    }
}
