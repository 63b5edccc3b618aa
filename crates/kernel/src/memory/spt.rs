//! 补充页表：进程眼中每个虚拟页的元数据，无论驻留与否

use alloc::collections::BTreeMap;

use defines::config::PAGE_SIZE;
use triomphe::Arc;

use crate::fs::File;

use super::{address::VirtPageNum, frame_table::Kpage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagePurpose {
    /// 可执行文件的段
    File,
    /// 用户栈
    Stack,
    /// 内存映射文件
    Mmap,
}

/// 一个用户虚拟页的描述符
#[derive(Clone)]
pub struct PageInfo {
    pub purpose: PagePurpose,
    /// 后备文件。纯栈页没有
    pub file: Option<Arc<File>>,
    /// 后备文件中的字节偏移
    pub ofs: usize,
    pub read_bytes: usize,
    pub zero_bytes: usize,
    pub writable: bool,
    /// Some 表示内容在交换区的这个槽里
    pub swap_slot: Option<usize>,
    /// Some 表示驻留在这个物理帧上
    pub frame: Option<Kpage>,
    /// 所属 mmap 区域的回链标签
    pub mmap_id: Option<usize>,
}

impl PageInfo {
    pub fn new_file(file: Arc<File>, ofs: usize, read_bytes: usize, writable: bool) -> Self {
        assert!(read_bytes <= PAGE_SIZE);
        Self {
            purpose: PagePurpose::File,
            file: Some(file),
            ofs,
            read_bytes,
            zero_bytes: PAGE_SIZE - read_bytes,
            writable,
            swap_slot: None,
            frame: None,
            mmap_id: None,
        }
    }

    pub fn new_stack() -> Self {
        Self {
            purpose: PagePurpose::Stack,
            file: None,
            ofs: 0,
            read_bytes: 0,
            zero_bytes: PAGE_SIZE,
            writable: true,
            swap_slot: None,
            frame: None,
            mmap_id: None,
        }
    }

    pub fn new_mmap(file: Arc<File>, ofs: usize, read_bytes: usize, mmap_id: usize) -> Self {
        assert!(read_bytes <= PAGE_SIZE);
        Self {
            purpose: PagePurpose::Mmap,
            file: Some(file),
            ofs,
            read_bytes,
            zero_bytes: PAGE_SIZE - read_bytes,
            writable: true,
            swap_slot: None,
            frame: None,
            mmap_id: Some(mmap_id),
        }
    }

    pub fn resident(&self) -> bool {
        self.frame.is_some()
    }
}

/// 以页对齐虚拟地址为键的进程级容器
pub struct SuppPageTable {
    entries: BTreeMap<VirtPageNum, PageInfo>,
}

impl Default for SuppPageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SuppPageTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// 键重复说明内核自身出了错
    #[track_caller]
    pub fn insert(&mut self, vpn: VirtPageNum, info: PageInfo) {
        let prev = self.entries.insert(vpn, info);
        assert!(prev.is_none(), "duplicate page {:#x}", vpn.page_start().0);
    }

    pub fn get(&self, vpn: VirtPageNum) -> Option<&PageInfo> {
        self.entries.get(&vpn)
    }

    pub fn get_mut(&mut self, vpn: VirtPageNum) -> Option<&mut PageInfo> {
        self.entries.get_mut(&vpn)
    }

    pub fn remove(&mut self, vpn: VirtPageNum) -> Option<PageInfo> {
        self.entries.remove(&vpn)
    }

    pub fn contains(&self, vpn: VirtPageNum) -> bool {
        self.entries.contains_key(&vpn)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VirtPageNum, &PageInfo)> {
        self.entries.iter()
    }

    /// 进程拆除时取走全部条目
    pub fn drain(&mut self) -> impl Iterator<Item = (VirtPageNum, PageInfo)> {
        core::mem::take(&mut self.entries).into_iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_split_invariant() {
        let info = PageInfo::new_stack();
        assert_eq!(info.read_bytes + info.zero_bytes, PAGE_SIZE);
        assert!(info.writable);
        assert!(!info.resident());
    }

    #[test]
    #[should_panic(expected = "duplicate page")]
    fn duplicate_insert_is_a_bug() {
        let mut spt = SuppPageTable::new();
        spt.insert(VirtPageNum(5), PageInfo::new_stack());
        spt.insert(VirtPageNum(5), PageInfo::new_stack());
    }

    #[test]
    fn lookup_and_remove() {
        let mut spt = SuppPageTable::new();
        spt.insert(VirtPageNum(5), PageInfo::new_stack());
        assert!(spt.contains(VirtPageNum(5)));
        assert!(spt.get(VirtPageNum(6)).is_none());

        let removed = spt.remove(VirtPageNum(5)).unwrap();
        assert_eq!(removed.purpose, PagePurpose::Stack);
        assert!(spt.is_empty());
    }
}
