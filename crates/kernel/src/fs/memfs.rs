//! 驻留内存的文件系统：扁平的名字目录，文件即字节数组
//!
//! 目录操作本身有内部锁保护，但调用方仍然要按约定持有全局
//! 文件系统锁来序列化整个文件系统入口

use alloc::{collections::BTreeMap, vec::Vec};

use compact_str::CompactString;
use klocks::{RwLock, SpinMutex};
use triomphe::Arc;

use super::file::File;

pub(super) struct Inode {
    pub(super) data: SpinMutex<Vec<u8>>,
}

pub struct MemFs {
    catalog: RwLock<BTreeMap<CompactString, Arc<Inode>>>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(BTreeMap::new()),
        }
    }

    /// 建一个全零的定长文件。同名文件已存在时失败
    pub fn create(&self, name: &str, size: usize) -> bool {
        let mut catalog = self.catalog.write();
        if catalog.contains_key(name) {
            return false;
        }
        catalog.insert(
            CompactString::from(name),
            Arc::new(Inode {
                data: SpinMutex::new(alloc::vec![0; size]),
            }),
        );
        true
    }

    pub fn open(&self, name: &str) -> Option<Arc<File>> {
        self.catalog
            .read()
            .get(name)
            .map(|inode| Arc::new(File::new(Arc::clone(inode))))
    }

    /// 删除目录项。已打开的句柄不受影响，inode 随最后一个句柄消亡
    pub fn remove(&self, name: &str) -> bool {
        self.catalog.write().remove(name).is_some()
    }
}
