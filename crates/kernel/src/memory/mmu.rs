//! 页目录，即对硬件 MMU 的软件模拟
//!
//! 内核只通过 install/clear/get_page 和脏位、访问位与它交互，
//! 其余的地址翻译细节都不外露

use alloc::collections::BTreeMap;

use super::{address::VirtPageNum, frame_table::Kpage};

struct PdEntry {
    kpage: Kpage,
    writable: bool,
    accessed: bool,
    dirty: bool,
}

/// 访存失败的原因，与硬件缺页错误码的语义一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchFault {
    /// 页不存在
    NotPresent,
    /// 页存在，但写入只读页
    Forbidden,
}

/// 每个进程一张的软件页目录
pub struct SoftPageDir {
    entries: BTreeMap<VirtPageNum, PdEntry>,
}

impl Default for SoftPageDir {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftPageDir {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// 建立 vpn 到 kpage 的映射。目标页已被映射时返回 false
    pub fn install(&mut self, vpn: VirtPageNum, kpage: Kpage, writable: bool) -> bool {
        if self.entries.contains_key(&vpn) {
            return false;
        }
        self.entries.insert(
            vpn,
            PdEntry {
                kpage,
                writable,
                accessed: false,
                dirty: false,
            },
        );
        true
    }

    /// 撤除映射，返回被撤除映射的 kpage 和脏位
    pub fn clear(&mut self, vpn: VirtPageNum) -> Option<(Kpage, bool)> {
        self.entries.remove(&vpn).map(|e| (e.kpage, e.dirty))
    }

    pub fn get_page(&self, vpn: VirtPageNum) -> Option<Kpage> {
        self.entries.get(&vpn).map(|e| e.kpage)
    }

    pub fn is_dirty(&self, vpn: VirtPageNum) -> bool {
        self.entries.get(&vpn).is_some_and(|e| e.dirty)
    }

    pub fn is_accessed(&self, vpn: VirtPageNum) -> bool {
        self.entries.get(&vpn).is_some_and(|e| e.accessed)
    }

    pub fn set_accessed(&mut self, vpn: VirtPageNum, accessed: bool) {
        if let Some(e) = self.entries.get_mut(&vpn) {
            e.accessed = accessed;
        }
    }

    /// 模拟一次访存经过 MMU：置访问位（写入还置脏位），
    /// 翻译失败时报告硬件会产生的缺页种类
    pub fn touch(&mut self, vpn: VirtPageNum, write: bool) -> Result<Kpage, TouchFault> {
        let Some(e) = self.entries.get_mut(&vpn) else {
            return Err(TouchFault::NotPresent);
        };
        if write && !e.writable {
            return Err(TouchFault::Forbidden);
        }
        e.accessed = true;
        if write {
            e.dirty = true;
        }
        Ok(e.kpage)
    }
}
