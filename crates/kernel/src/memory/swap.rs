//! 交换分区：把块设备切成页大小的槽，用位图记录占用
//!
//! 槽的内容没有任何头部或恢复信息，重启后全部作废

use alloc::{boxed::Box, vec::Vec};

use defines::{
    config::{SECTORS_PER_PAGE, SECTOR_SIZE},
    error::{errno, KResult},
};
use klocks::SpinMutex;

use crate::drivers::block::BlockDevice;

use super::frame_table::PageBuf;

struct SlotBitmap {
    bits: Vec<u64>,
    slots: usize,
}

impl SlotBitmap {
    fn new(slots: usize) -> Self {
        Self {
            bits: alloc::vec![0; slots.div_ceil(64)],
            slots,
        }
    }

    /// 首次适应扫描
    fn alloc(&mut self) -> Option<usize> {
        for (word_i, word) in self.bits.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = word.trailing_ones() as usize;
                let slot = word_i * 64 + bit;
                if slot >= self.slots {
                    return None;
                }
                *word |= 1 << bit;
                return Some(slot);
            }
        }
        None
    }

    fn free(&mut self, slot: usize) {
        assert!(slot < self.slots, "swap slot {slot} out of range");
        let mask = 1 << (slot % 64);
        assert!(self.bits[slot / 64] & mask != 0, "swap slot {slot} double free");
        self.bits[slot / 64] &= !mask;
    }

    fn is_set(&self, slot: usize) -> bool {
        slot < self.slots && self.bits[slot / 64] & (1 << (slot % 64)) != 0
    }

    fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }
}

pub struct SwapDevice {
    bitmap: SpinMutex<SlotBitmap>,
    disk: SpinMutex<Box<dyn BlockDevice>>,
}

impl SwapDevice {
    pub fn new(disk: Box<dyn BlockDevice>) -> Self {
        let slots = disk.num_sectors() / SECTORS_PER_PAGE;
        Self {
            bitmap: SpinMutex::new(SlotBitmap::new(slots)),
            disk: SpinMutex::new(disk),
        }
    }

    pub fn slots(&self) -> usize {
        self.bitmap.lock().slots
    }

    /// 原子地保留一个空闲槽，分区占满则失败
    pub fn slot_alloc(&self) -> KResult<usize> {
        self.bitmap.lock().alloc().ok_or(errno::ENOSPC)
    }

    pub fn slot_free(&self, slot: usize) {
        self.bitmap.lock().free(slot);
    }

    /// 把一个槽读入帧。槽保持占用，何时释放由调用者决定
    pub fn read_slot(&self, slot: usize, buf: &mut PageBuf) {
        assert!(self.is_allocated(slot), "read from free swap slot {slot}");
        let mut disk = self.disk.lock();
        for i in 0..SECTORS_PER_PAGE {
            let chunk = &mut buf.0[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE];
            disk.read_sector(slot * SECTORS_PER_PAGE + i, chunk.try_into().unwrap());
        }
    }

    pub fn write_slot(&self, slot: usize, buf: &PageBuf) {
        assert!(self.is_allocated(slot), "write to free swap slot {slot}");
        let mut disk = self.disk.lock();
        for i in 0..SECTORS_PER_PAGE {
            let chunk = &buf.0[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE];
            disk.write_sector(slot * SECTORS_PER_PAGE + i, chunk.try_into().unwrap());
        }
    }

    pub fn is_allocated(&self, slot: usize) -> bool {
        self.bitmap.lock().is_set(slot)
    }

    pub fn allocated_count(&self) -> usize {
        self.bitmap.lock().count()
    }
}
