use alloc::vec::Vec;
use defines::config::SECTOR_SIZE;

/// 块设备的抽象，读写都以扇区为单位进行
pub trait BlockDevice: Send {
    fn num_sectors(&self) -> usize;
    fn read_sector(&mut self, sector: usize, buf: &mut [u8; SECTOR_SIZE]);
    fn write_sector(&mut self, sector: usize, buf: &[u8; SECTOR_SIZE]);
}

/// 驻留在内存中的块设备，作为交换分区的默认载体
pub struct MemDisk {
    data: Vec<u8>,
}

impl MemDisk {
    pub fn new(sectors: usize) -> Self {
        Self {
            data: alloc::vec![0; sectors * SECTOR_SIZE],
        }
    }
}

impl BlockDevice for MemDisk {
    fn num_sectors(&self) -> usize {
        self.data.len() / SECTOR_SIZE
    }

    fn read_sector(&mut self, sector: usize, buf: &mut [u8; SECTOR_SIZE]) {
        let start = sector * SECTOR_SIZE;
        buf.copy_from_slice(&self.data[start..start + SECTOR_SIZE]);
    }

    fn write_sector(&mut self, sector: usize, buf: &[u8; SECTOR_SIZE]) {
        let start = sector * SECTOR_SIZE;
        self.data[start..start + SECTOR_SIZE].copy_from_slice(buf);
    }
}
