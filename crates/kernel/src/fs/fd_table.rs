//! 定宽的进程文件描述符表。0 和 1 保留给控制台

use defines::config::{FD_FIRST_FILE, FD_TABLE_SIZE};
use triomphe::Arc;

use super::file::File;

pub struct FdTable {
    slots: [Option<Arc<File>>; FD_TABLE_SIZE],
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    /// 从 2 号槽起找第一个空位放入，表满返回 None
    pub fn alloc(&mut self, file: Arc<File>) -> Option<usize> {
        let fd = (FD_FIRST_FILE..FD_TABLE_SIZE).find(|&fd| self.slots[fd].is_none())?;
        self.slots[fd] = Some(file);
        Some(fd)
    }

    pub fn get(&self, fd: usize) -> Option<Arc<File>> {
        if !(FD_FIRST_FILE..FD_TABLE_SIZE).contains(&fd) {
            return None;
        }
        self.slots[fd].clone()
    }

    /// 关闭并清空槽位
    pub fn close(&mut self, fd: usize) -> Option<Arc<File>> {
        if !(FD_FIRST_FILE..FD_TABLE_SIZE).contains(&fd) {
            return None;
        }
        self.slots[fd].take()
    }

    /// 进程退出时关掉一切
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }
}
